//! The contract a native audio backend implements.
//!
//! The core never talks to a device directly. A [`Backend`] hands out [`Voice`]s (one
//! native playback channel each), effect slots, submix buses and music channels, and
//! advertises optional features through [`DriverOption`]. Backends are picked by name
//! from a [`BackendRegistry`] when a session is created.

pub mod software;

use crate::buffer::{Buffer, BufferFormat};
use crate::config::SonanceDesc;
use crate::effect::{EffectKind, ReverbParams};
use crate::error::{Result, SonanceError};
use crate::music::MusicChannel;
use crate::spatial::DistanceCurve;
use std::collections::HashMap;
use std::sync::Arc;

/// Optional backend features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOption {
    /// Effects and submixes are available
    EnvironmentEffects,
    /// Buffers may hold ADPCM data
    AllowAdpcm,
    /// All buffers are kept in software
    SoftwareBuffer,
    /// The core computes distance attenuation; otherwise the backend evaluates a curve
    ManualRolloff,
    /// Sources may be fed through a streaming queue
    HasBufferStreaming,
}

/// Per-voice output parameters pushed at every commit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    /// Final linear gain in [0, 1]
    pub gain: f32,
    /// -1 is full left, 1 is full right
    pub pan: f32,
    /// Playback rate ratio including Doppler
    pub pitch: f32,
    /// Listener distance after rolloff scaling, for curve-based backends
    pub distance: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            pan: 0.0,
            pitch: 1.0,
            distance: 0.0,
        }
    }
}

/// Notifications raised by the backend's audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    /// A queued buffer was fully consumed
    BufferProcessed { voice_id: u64 },
    /// The voice ran out of data and stopped
    VoiceFinished { voice_id: u64 },
    /// Buffer data changed while the voice was reading it; the voice was stopped
    VoiceInvalidated { voice_id: u64 },
}

impl BackendEvent {
    pub fn voice_id(&self) -> u64 {
        match self {
            Self::BufferProcessed { voice_id }
            | Self::VoiceFinished { voice_id }
            | Self::VoiceInvalidated { voice_id } => *voice_id,
        }
    }
}

/// One native playback channel, prepared for a fixed buffer format.
pub trait Voice: Send {
    fn id(&self) -> u64;

    /// Format this voice was prepared for.
    fn format(&self) -> BufferFormat;

    /// Appends a buffer to the voice's queue. Never blocks.
    fn submit(&mut self, buffer: Arc<Buffer>) -> Result<()>;

    /// Buffers submitted and not yet consumed.
    fn queued_buffers(&self) -> usize;

    fn start(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Stops playback and discards every pending submission.
    fn stop(&mut self);

    fn set_looping(&mut self, looping: bool);

    /// Whether the voice is still producing sound (paused counts as playing).
    fn is_playing(&self) -> bool;

    fn apply(&mut self, params: &VoiceParams);

    /// Rolloff curve for backends without manual rolloff.
    fn set_distance_curve(&mut self, _curve: &DistanceCurve) {}

    /// Routes `level` of the voice into a submix bus, or clears the send.
    fn set_send(&mut self, _bus: Option<u64>, _level: f32) -> Result<()> {
        Err(SonanceError::Unsupported("submix sends"))
    }
}

/// Native side of an [`Effect`](crate::effect::Effect).
pub trait EffectSlot: Send {
    fn id(&self) -> u64;

    fn kind(&self) -> EffectKind;

    /// Receives parameters that are already clamped to their documented ranges.
    fn set_reverb(&mut self, params: &ReverbParams);
}

/// Native side of a [`Submix`](crate::effect::Submix).
pub trait SubmixBus: Send {
    fn id(&self) -> u64;

    /// Attaches an effect slot by id, or detaches.
    fn set_effect(&mut self, effect: Option<u64>);

    fn set_gain(&mut self, gain: f32);
}

/// Pull-side of a backend that mixes in software. The host calls [`Mixer::render`]
/// from its audio callback.
pub trait Mixer: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Overwrites `out` with interleaved samples and returns the frame count written.
    fn render(&mut self, out: &mut [f32]) -> usize;
}

/// Factory and capability surface of a backend.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn option(&self, option: DriverOption) -> bool;

    /// Number of voices that can exist at once.
    fn max_voices(&self) -> usize;

    fn create_buffer(&self, name: &str) -> Result<Arc<Buffer>>;

    /// Allocates a voice for `format`. Fails with [`SonanceError::VoiceLimit`] when
    /// every voice is taken.
    fn create_voice(&self, format: BufferFormat) -> Result<Box<dyn Voice>>;

    fn create_effect(&self, _kind: EffectKind) -> Result<Box<dyn EffectSlot>> {
        Err(SonanceError::Unsupported("effects"))
    }

    fn create_submix(&self) -> Result<Box<dyn SubmixBus>> {
        Err(SonanceError::Unsupported("submixes"))
    }

    fn create_music_channel(&self) -> Result<Box<dyn MusicChannel>> {
        Err(SonanceError::Unsupported("music channels"))
    }

    /// Hands out the renderer once. Backends that own their device thread return `None`.
    fn take_mixer(&self) -> Option<Box<dyn Mixer>> {
        None
    }

    /// Drains events raised since the last call.
    fn poll_events(&self) -> Vec<BackendEvent>;

    /// End-of-frame hook, called once after every source has been committed.
    fn commit(&self) {}
}

/// Constructor stored in a [`BackendRegistry`].
pub type BackendConstructor = fn(&SonanceDesc) -> Result<Arc<dyn Backend>>;

/// Name to constructor table used to pick a backend at startup.
#[derive(Clone)]
pub struct BackendRegistry {
    constructors: HashMap<String, BackendConstructor>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: BackendConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, desc: &SonanceDesc) -> Result<Arc<dyn Backend>> {
        let constructor = self
            .constructors
            .get(&desc.backend)
            .ok_or_else(|| SonanceError::UnknownBackend(desc.backend.clone()))?;
        let backend = constructor(desc)?;
        log::info!("Opened audio backend '{}'", backend.name());
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("software", software::SoftwareBackend::open);
        registry
    }
}
