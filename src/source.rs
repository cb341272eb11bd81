//! Playback sources.

use crate::backend::{Backend, Voice, VoiceParams};
use crate::buffer::{Buffer, BufferFormat};
use crate::effect::{Submix, SubmixId};
use crate::error::{Result, SonanceError};
use crate::listener::ListenerSnapshot;
use crate::math::Vec3;
use crate::spatial::{DistanceCurve, Emitter, SpatialProcessor};
use std::f32::consts::TAU;
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Stopped,
    Playing,
    Paused,
}

/// What a source plays from.
#[derive(Debug, Clone, Default)]
enum Binding {
    #[default]
    Unbound,
    /// Non-owning reference to a buffer owned elsewhere
    Static(Weak<Buffer>),
    Streaming,
}

/// Send routing kept across voice reallocation.
#[derive(Debug, Clone, Copy)]
struct SendRoute {
    submix: SubmixId,
    bus: u64,
    level: f32,
}

/// A playback unit with 3D emitter state.
///
/// The backend voice is allocated lazily, the first time the source is played or fed
/// a streaming buffer, and reallocated only when the data format changes. Setters
/// record values and reach the backend on the next commit.
pub struct Source {
    id: SourceId,
    backend: Arc<dyn Backend>,
    voice: Option<Box<dyn Voice>>,
    binding: Binding,
    /// Buffer generation submitted with the current static playback
    prepared_generation: Option<u64>,
    state: SourceState,
    emitter: Emitter,
    looping: bool,
    send: Option<SendRoute>,
    curve_dirty: bool,
    output: VoiceParams,
}

impl Source {
    pub(crate) fn new(id: SourceId, backend: Arc<dyn Backend>) -> Self {
        Self {
            id,
            backend,
            voice: None,
            binding: Binding::Unbound,
            prepared_generation: None,
            state: SourceState::Stopped,
            emitter: Emitter::default(),
            looping: false,
            send: None,
            curve_dirty: true,
            output: VoiceParams::default(),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Backend voice currently serving this source.
    pub fn voice_id(&self) -> Option<u64> {
        self.voice.as_ref().map(|v| v.id())
    }

    /// Binds a static buffer, or unbinds with `None`. Stops playback and clears any
    /// streaming queue.
    pub fn set_static_buffer(&mut self, buffer: Option<&Arc<Buffer>>) {
        self.halt();
        self.binding = match buffer {
            Some(buffer) => Binding::Static(Arc::downgrade(buffer)),
            None => Binding::Unbound,
        };
    }

    /// The bound static buffer, if it is still alive.
    pub fn static_buffer(&self) -> Option<Arc<Buffer>> {
        match &self.binding {
            Binding::Static(weak) => weak.upgrade(),
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.binding, Binding::Streaming)
    }

    /// Appends a buffer to the streaming queue. Switches the source to streaming mode,
    /// dropping any static binding. Three buffers of about 100 ms is a good depth.
    pub fn submit_streaming_buffer(&mut self, buffer: Arc<Buffer>) -> Result<()> {
        let format = buffer.format().ok_or(SonanceError::FormatNotSet)?;
        if !self.is_streaming() {
            self.halt();
            self.binding = Binding::Streaming;
        }

        if self.voice.as_ref().is_some_and(|v| v.format() != format) {
            if self.count_streaming_buffers() > 0 {
                return Err(SonanceError::InvalidFormat {
                    format: format.format,
                    channels: format.channels,
                    bits: format.bits_per_sample,
                });
            }
            self.halt();
        }

        let voice = self.ensure_voice(format)?;
        voice.submit(buffer)
    }

    /// Buffers queued and not yet consumed by the backend.
    pub fn count_streaming_buffers(&self) -> usize {
        match (&self.binding, &self.voice) {
            (Binding::Streaming, Some(voice)) => voice.queued_buffers(),
            _ => 0,
        }
    }

    /// Starts or resumes playback. Returns false if nothing is bound or no voice could
    /// be allocated; the state is then left unchanged.
    pub fn play(&mut self) -> bool {
        match self.state() {
            SourceState::Paused => {
                if let Some(voice) = self.voice.as_mut() {
                    voice.resume();
                }
                self.state = SourceState::Playing;
                return true;
            }
            // Restarting would throw the queue away.
            SourceState::Playing if self.is_streaming() => return true,
            _ => {}
        }

        let started = match &self.binding {
            Binding::Unbound => {
                log::debug!("{}: play with nothing bound", self.id);
                false
            }
            Binding::Streaming => match self.voice.as_mut() {
                Some(voice) => voice.start().is_ok(),
                None => false,
            },
            Binding::Static(weak) => match weak.upgrade() {
                Some(buffer) => self.start_static(buffer),
                None => {
                    log::debug!("{}: bound buffer was dropped", self.id);
                    false
                }
            },
        };

        if started {
            self.state = SourceState::Playing;
        }
        started
    }

    fn start_static(&mut self, buffer: Arc<Buffer>) -> bool {
        let id = self.id;
        let Some(format) = buffer.format().filter(|_| buffer.is_loaded()) else {
            log::debug!("{}: buffer '{}' has no data", id, buffer.name());
            return false;
        };

        if let Some(voice) = self.voice.as_mut() {
            voice.stop();
        }
        let generation = buffer.generation();
        let looping = self.looping;
        let voice = match self.ensure_voice(format) {
            Ok(voice) => voice,
            Err(e) => {
                log::warn!("{}: cannot play: {}", id, e);
                return false;
            }
        };
        voice.set_looping(looping);
        if let Err(e) = voice.submit(buffer).and_then(|_| voice.start()) {
            log::warn!("{}: cannot play: {}", id, e);
            voice.stop();
            return false;
        }
        self.prepared_generation = Some(generation);
        true
    }

    /// Returns the voice for `format`, allocating or reallocating it as needed.
    fn ensure_voice(&mut self, format: BufferFormat) -> Result<&mut Box<dyn Voice>> {
        if self.voice.as_ref().is_some_and(|v| v.format() != format) {
            log::debug!("{}: format changed, releasing voice", self.id);
            self.voice = None;
        }
        if self.voice.is_none() {
            let mut voice = self.backend.create_voice(format)?;
            voice.set_looping(self.looping);
            if let Some(route) = self.send {
                if let Err(e) = voice.set_send(Some(route.bus), route.level) {
                    log::warn!("{}: send to {} unavailable: {}", self.id, route.submix, e);
                }
            }
            voice.apply(&self.output);
            self.curve_dirty = true;
            self.voice = Some(voice);
        }
        self.voice.as_mut().ok_or(SonanceError::NoData)
    }

    pub fn pause(&mut self) {
        if self.state() == SourceState::Playing {
            if let Some(voice) = self.voice.as_mut() {
                voice.pause();
            }
            self.state = SourceState::Paused;
        }
    }

    /// Stops playback and drains the streaming queue.
    pub fn stop(&mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(voice) = self.voice.as_mut() {
            voice.stop();
        }
        self.prepared_generation = None;
        self.state = SourceState::Stopped;
    }

    /// Current state. A voice that ran out of data is reported as stopped.
    pub fn state(&mut self) -> SourceState {
        if self.state != SourceState::Stopped
            && !self.voice.as_ref().is_some_and(|v| v.is_playing())
        {
            self.state = SourceState::Stopped;
            self.prepared_generation = None;
        }
        self.state
    }

    pub fn is_playing(&mut self) -> bool {
        self.state() == SourceState::Playing
    }

    pub fn set_pos(&mut self, position: Vec3) {
        self.emitter.position = position;
    }

    pub fn pos(&self) -> Vec3 {
        self.emitter.position
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.emitter.velocity = velocity;
    }

    pub fn velocity(&self) -> Vec3 {
        self.emitter.velocity
    }

    /// Cone axis. Zero makes the source omnidirectional.
    pub fn set_direction(&mut self, direction: Vec3) {
        self.emitter.direction = direction;
    }

    pub fn direction(&self) -> Vec3 {
        self.emitter.direction
    }

    /// Interprets position and velocity relative to the listener.
    pub fn set_relative(&mut self, relative: bool) {
        self.emitter.relative = relative;
    }

    pub fn is_relative(&self) -> bool {
        self.emitter.relative
    }

    /// Gain, clamped to [0, 1].
    pub fn set_gain(&mut self, gain: f32) {
        self.emitter.gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
    }

    pub fn gain(&self) -> f32 {
        self.emitter.gain
    }

    /// Pitch multiplier; must be greater than zero.
    pub fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        if !(pitch > 0.0) || !pitch.is_finite() {
            return Err(SonanceError::InvalidPitch(pitch));
        }
        self.emitter.pitch = pitch;
        Ok(())
    }

    pub fn pitch(&self) -> f32 {
        self.emitter.pitch
    }

    /// Distances are clamped to be non-negative with `max >= min`.
    pub fn set_min_max_distances(&mut self, min: f32, max: f32) {
        let min = min.max(0.0);
        self.emitter.min_distance = min;
        self.emitter.max_distance = max.max(min);
        self.curve_dirty = true;
    }

    pub fn min_max_distances(&self) -> (f32, f32) {
        (self.emitter.min_distance, self.emitter.max_distance)
    }

    /// Cone angles in radians, clamped to [0, 2π] with `outer >= inner`; the outer gain
    /// is clamped to [0, 1].
    pub fn set_cone(&mut self, inner: f32, outer: f32, outer_gain: f32) {
        let inner = inner.clamp(0.0, TAU);
        self.emitter.cone_inner = inner;
        self.emitter.cone_outer = outer.clamp(inner, TAU);
        self.emitter.cone_outer_gain = outer_gain.clamp(0.0, 1.0);
    }

    pub fn cone(&self) -> (f32, f32, f32) {
        (
            self.emitter.cone_inner,
            self.emitter.cone_outer,
            self.emitter.cone_outer_gain,
        )
    }

    /// Rolloff shape, clamped to [-1, 1]. See [`crate::spatial::attenuation`].
    pub fn set_alpha(&mut self, alpha: f64) {
        self.emitter.alpha = if alpha.is_nan() { -1.0 } else { alpha.clamp(-1.0, 1.0) };
        self.curve_dirty = true;
    }

    pub fn alpha(&self) -> f64 {
        self.emitter.alpha
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        if let Some(voice) = self.voice.as_mut() {
            voice.set_looping(looping);
        }
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Routes `level` of this source into `submix`, or removes the send.
    pub fn set_submix(&mut self, submix: Option<&Submix>, level: f32) -> Result<()> {
        let route = submix.map(|s| SendRoute {
            submix: s.id(),
            bus: s.bus_id(),
            level: level.clamp(0.0, 1.0),
        });
        if let Some(voice) = self.voice.as_mut() {
            voice.set_send(route.map(|r| r.bus), route.map_or(0.0, |r| r.level))?;
        }
        self.send = route;
        Ok(())
    }

    pub fn submix(&self) -> Option<SubmixId> {
        self.send.map(|r| r.submix)
    }

    /// Generation of the static buffer the current playback was prepared from.
    pub fn playback_generation(&self) -> Option<u64> {
        self.prepared_generation
    }

    /// Parameters pushed to the backend by the last commit.
    pub fn output_params(&self) -> VoiceParams {
        self.output
    }

    /// Recomputes gain, pan and pitch against `listener` and pushes them to the voice.
    ///
    /// A static buffer that was refilled or reformatted since playback started stops
    /// the source; it is prepared again by the next `play`.
    pub(crate) fn commit_3d(
        &mut self,
        processor: &SpatialProcessor,
        listener: &ListenerSnapshot,
        curve_points: usize,
    ) {
        if let (Binding::Static(weak), Some(generation)) = (&self.binding, self.prepared_generation)
        {
            if weak.upgrade().is_none_or(|b| b.generation() != generation) {
                log::debug!("{}: buffer changed under playback, stopping", self.id);
                self.halt();
                return;
            }
        }

        let Some(voice) = self.voice.as_mut() else {
            return;
        };

        let multi_channel = voice.format().is_stereo();
        self.output = processor.process(&self.emitter, listener, multi_channel);

        if !processor.manual_rolloff() && self.curve_dirty {
            let curve = DistanceCurve::sample(
                self.emitter.alpha,
                self.emitter.min_distance,
                self.emitter.max_distance,
                curve_points,
            );
            voice.set_distance_curve(&curve);
            self.curve_dirty = false;
        }
        voice.apply(&self.output);
    }

    pub(crate) fn clear_submix(&mut self, submix: SubmixId) {
        if self.send.is_some_and(|r| r.submix == submix) {
            self.send = None;
            if let Some(voice) = self.voice.as_mut() {
                let _ = voice.set_send(None, 0.0);
            }
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("binding", &self.binding)
            .field("state", &self.state)
            .field("emitter", &self.emitter)
            .field("voice", &self.voice_id())
            .finish()
    }
}
