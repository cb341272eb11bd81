//! In-process software backend.
//!
//! Voices, buses and effect slots are thin handles on the application thread. Per-voice
//! parameters and playback state live in atomics shared with the [`SoftwareMixer`];
//! structural changes (new voice, removed bus, reverb parameters) travel over a command
//! channel that the mixer drains at the start of every block. Streaming submissions go
//! through a per-voice SPSC ring, so neither side ever waits on the other.
//!
//! The mixer runs wherever the host pulls audio from: a device callback (see
//! `DeviceOutput` behind the `device-output` feature) or a loop calling
//! [`Mixer::render`](crate::backend::Mixer::render) directly.

mod mixer;
mod music;
#[cfg(feature = "device-output")]
mod output;
mod playback;
mod reverb;

pub use mixer::SoftwareMixer;
pub use music::{MusicLibrary, SoftwareMusicChannel};
#[cfg(feature = "device-output")]
pub use output::DeviceOutput;
pub use reverb::Reverb;

use crate::backend::{
    Backend, BackendEvent, DriverOption, EffectSlot, Mixer, SubmixBus, Voice, VoiceParams,
};
use crate::buffer::{Buffer, BufferFormat};
use crate::config::SonanceDesc;
use crate::effect::{EffectKind, ReverbParams};
use crate::error::{Result, SonanceError};
use crate::music::MusicChannel;
use crate::spatial::DistanceCurve;
use crossbeam_channel::{Receiver, Sender, unbounded};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const STATE_STOPPED: u8 = 0;
const STATE_PLAYING: u8 = 1;
const STATE_PAUSED: u8 = 2;

const COUNT_MASK: u64 = 0xFFFF_FFFF;

/// A buffer waiting in a voice's queue.
#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    /// Stop epoch the entry was submitted in
    pub epoch: u32,
    /// Buffer generation at submit time
    pub generation: u64,
    pub buffer: Arc<Buffer>,
}

/// Voice state shared between the handle and the mixer.
#[derive(Debug)]
pub(crate) struct VoiceShared {
    pub id: u64,
    state: AtomicU8,
    /// Stop epoch in the high 32 bits, queued buffer count in the low 32 bits. Packing
    /// both lets the mixer retire a buffer only if no stop happened in between.
    queue: AtomicU64,
    gain: AtomicU32,
    pan: AtomicU32,
    pitch: AtomicU32,
    looping: AtomicBool,
}

impl VoiceShared {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(STATE_STOPPED),
            queue: AtomicU64::new(0),
            gain: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU32::new(0.0f32.to_bits()),
            pitch: AtomicU32::new(1.0f32.to_bits()),
            looping: AtomicBool::new(false),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_PLAYING
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u32 {
        (self.queue.load(Ordering::Acquire) >> 32) as u32
    }

    pub fn queued(&self) -> usize {
        (self.queue.load(Ordering::Acquire) & COUNT_MASK) as usize
    }

    fn enqueued(&self) {
        self.queue.fetch_add(1, Ordering::AcqRel);
    }

    /// Starts a new epoch with an empty queue.
    fn reset_queue(&self) {
        let _ = self
            .queue
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                let epoch = ((v >> 32) as u32).wrapping_add(1);
                Some((epoch as u64) << 32)
            });
    }

    /// Retires one buffer of `epoch`. No-op if the voice was stopped since.
    pub fn consume(&self, epoch: u32) {
        let _ = self
            .queue
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                ((v >> 32) as u32 == epoch && v & COUNT_MASK > 0).then(|| v - 1)
            });
    }

    /// Moves a playing voice of `epoch` to stopped. Returns false if the application
    /// stopped or restarted it first.
    pub fn finish(&self, epoch: u32) -> bool {
        self.epoch() == epoch
            && self
                .state
                .compare_exchange(
                    STATE_PLAYING,
                    STATE_STOPPED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }

    pub fn pitch(&self) -> f32 {
        f32::from_bits(self.pitch.load(Ordering::Relaxed))
    }

    pub fn looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }
}

/// Structural changes posted to the mixer.
pub(crate) enum MixerCommand {
    AddVoice {
        shared: Arc<VoiceShared>,
        format: BufferFormat,
        consumer: HeapCons<QueueEntry>,
    },
    RemoveVoice(u64),
    SetSend {
        voice: u64,
        bus: Option<u64>,
        level: f32,
    },
    AddEffect {
        id: u64,
        params: ReverbParams,
    },
    SetReverb {
        id: u64,
        params: ReverbParams,
    },
    RemoveEffect(u64),
    AddBus(u64),
    SetBusEffect {
        bus: u64,
        effect: Option<u64>,
    },
    SetBusGain {
        bus: u64,
        gain: f32,
    },
    RemoveBus(u64),
}

/// State every handle shares with the backend.
#[derive(Debug)]
pub(crate) struct BackendShared {
    sample_rate: u32,
    queue_capacity: usize,
    max_voices: usize,
    effects: bool,
    commands: Sender<MixerCommand>,
    active_voices: AtomicUsize,
    next_id: AtomicU64,
}

impl std::fmt::Debug for MixerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddVoice { shared, format, .. } => f
                .debug_struct("AddVoice")
                .field("id", &shared.id)
                .field("format", format)
                .finish(),
            Self::RemoveVoice(id) => f.debug_tuple("RemoveVoice").field(id).finish(),
            Self::SetSend { voice, bus, level } => f
                .debug_struct("SetSend")
                .field("voice", voice)
                .field("bus", bus)
                .field("level", level)
                .finish(),
            Self::AddEffect { id, .. } => f.debug_tuple("AddEffect").field(id).finish(),
            Self::SetReverb { id, .. } => f.debug_tuple("SetReverb").field(id).finish(),
            Self::RemoveEffect(id) => f.debug_tuple("RemoveEffect").field(id).finish(),
            Self::AddBus(id) => f.debug_tuple("AddBus").field(id).finish(),
            Self::SetBusEffect { bus, effect } => f
                .debug_struct("SetBusEffect")
                .field("bus", bus)
                .field("effect", effect)
                .finish(),
            Self::SetBusGain { bus, gain } => f
                .debug_struct("SetBusGain")
                .field("bus", bus)
                .field("gain", gain)
                .finish(),
            Self::RemoveBus(id) => f.debug_tuple("RemoveBus").field(id).finish(),
        }
    }
}

impl BackendShared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, command: MixerCommand) {
        // The mixer may already be gone during teardown; nothing is left to update then.
        if let Err(e) = self.commands.send(command) {
            log::debug!("Mixer is gone, dropped {:?}", e.into_inner());
        }
    }

    /// Allocates a voice. `counted` voices take a slot from the source limit.
    fn spawn_voice(self: &Arc<Self>, format: BufferFormat, counted: bool) -> Result<SoftwareVoice> {
        format.validate()?;
        if counted
            && self
                .active_voices
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.max_voices).then_some(n + 1)
                })
                .is_err()
        {
            log::warn!("Voice limit of {} reached", self.max_voices);
            return Err(SonanceError::VoiceLimit(self.max_voices));
        }

        let shared = Arc::new(VoiceShared::new(self.next_id()));
        // Stale entries from before a stop stay in the ring until the mixer skips them,
        // so the ring gets headroom beyond the logical queue capacity.
        let (producer, consumer) = HeapRb::<QueueEntry>::new(self.queue_capacity * 2).split();
        self.send(MixerCommand::AddVoice {
            shared: shared.clone(),
            format,
            consumer,
        });
        log::debug!("Created voice {} for {:?}", shared.id, format);

        Ok(SoftwareVoice {
            shared,
            format,
            producer,
            curve: None,
            backend: self.clone(),
            counted,
        })
    }
}

/// Software implementation of [`Voice`].
pub struct SoftwareVoice {
    shared: Arc<VoiceShared>,
    format: BufferFormat,
    producer: HeapProd<QueueEntry>,
    curve: Option<DistanceCurve>,
    backend: Arc<BackendShared>,
    counted: bool,
}

impl Voice for SoftwareVoice {
    fn id(&self) -> u64 {
        self.shared.id
    }

    fn format(&self) -> BufferFormat {
        self.format
    }

    fn submit(&mut self, buffer: Arc<Buffer>) -> Result<()> {
        let format = buffer.format().ok_or(SonanceError::FormatNotSet)?;
        if format != self.format {
            return Err(SonanceError::InvalidFormat {
                format: format.format,
                channels: format.channels,
                bits: format.bits_per_sample,
            });
        }
        if !buffer.is_loaded() {
            return Err(SonanceError::NoData);
        }

        let capacity = self.backend.queue_capacity;
        if self.shared.queued() >= capacity {
            log::warn!("Voice {} queue is full", self.shared.id);
            return Err(SonanceError::QueueFull(capacity));
        }

        let entry = QueueEntry {
            epoch: self.shared.epoch(),
            generation: buffer.generation(),
            buffer,
        };
        if self.producer.try_push(entry).is_err() {
            log::warn!("Voice {} ring is full of stale entries", self.shared.id);
            return Err(SonanceError::QueueFull(capacity));
        }
        self.shared.enqueued();
        Ok(())
    }

    fn queued_buffers(&self) -> usize {
        self.shared.queued()
    }

    fn start(&mut self) -> Result<()> {
        if self.shared.queued() == 0 {
            return Err(SonanceError::NoData);
        }
        self.shared.state.store(STATE_PLAYING, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) {
        let _ = self.shared.state.compare_exchange(
            STATE_PLAYING,
            STATE_PAUSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn resume(&mut self) {
        let _ = self.shared.state.compare_exchange(
            STATE_PAUSED,
            STATE_PLAYING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn stop(&mut self) {
        self.shared.state.store(STATE_STOPPED, Ordering::Release);
        self.shared.reset_queue();
    }

    fn set_looping(&mut self, looping: bool) {
        self.shared.looping.store(looping, Ordering::Relaxed);
    }

    fn is_playing(&self) -> bool {
        self.shared.state() != STATE_STOPPED
    }

    fn apply(&mut self, params: &VoiceParams) {
        let curve_gain = self
            .curve
            .as_ref()
            .map_or(1.0, |curve| curve.evaluate(params.distance));
        let gain = (params.gain * curve_gain).clamp(0.0, 1.0);
        self.shared.gain.store(gain.to_bits(), Ordering::Relaxed);
        self.shared
            .pan
            .store(params.pan.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
        self.shared
            .pitch
            .store(params.pitch.max(0.0).to_bits(), Ordering::Relaxed);
    }

    fn set_distance_curve(&mut self, curve: &DistanceCurve) {
        self.curve = Some(curve.clone());
    }

    fn set_send(&mut self, bus: Option<u64>, level: f32) -> Result<()> {
        if !self.backend.effects {
            return Err(SonanceError::Unsupported("submix sends"));
        }
        self.backend.send(MixerCommand::SetSend {
            voice: self.shared.id,
            bus,
            level: level.clamp(0.0, 1.0),
        });
        Ok(())
    }
}

impl Drop for SoftwareVoice {
    fn drop(&mut self) {
        self.shared.state.store(STATE_STOPPED, Ordering::Release);
        if self.counted {
            self.backend.active_voices.fetch_sub(1, Ordering::AcqRel);
        }
        // The mixer drops its buffer references when it handles the removal.
        self.backend.send(MixerCommand::RemoveVoice(self.shared.id));
        log::debug!("Released voice {}", self.shared.id);
    }
}

struct SoftwareEffect {
    id: u64,
    backend: Arc<BackendShared>,
}

impl EffectSlot for SoftwareEffect {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> EffectKind {
        EffectKind::Reverb
    }

    fn set_reverb(&mut self, params: &ReverbParams) {
        self.backend.send(MixerCommand::SetReverb {
            id: self.id,
            params: *params,
        });
    }
}

impl Drop for SoftwareEffect {
    fn drop(&mut self) {
        self.backend.send(MixerCommand::RemoveEffect(self.id));
    }
}

struct SoftwareSubmix {
    id: u64,
    backend: Arc<BackendShared>,
}

impl SubmixBus for SoftwareSubmix {
    fn id(&self) -> u64 {
        self.id
    }

    fn set_effect(&mut self, effect: Option<u64>) {
        self.backend.send(MixerCommand::SetBusEffect {
            bus: self.id,
            effect,
        });
    }

    fn set_gain(&mut self, gain: f32) {
        self.backend.send(MixerCommand::SetBusGain { bus: self.id, gain });
    }
}

impl Drop for SoftwareSubmix {
    fn drop(&mut self) {
        self.backend.send(MixerCommand::RemoveBus(self.id));
    }
}

/// Reference backend mixing every voice in software.
pub struct SoftwareBackend {
    shared: Arc<BackendShared>,
    allow_adpcm: bool,
    force_software: bool,
    manual_rolloff: bool,
    mixer: Mutex<Option<SoftwareMixer>>,
    events: Receiver<BackendEvent>,
    library: MusicLibrary,
}

impl SoftwareBackend {
    pub fn new(desc: &SonanceDesc) -> Result<Self> {
        if desc.sample_rate == 0 {
            return Err(SonanceError::DeviceInit("sample rate must be non-zero".into()));
        }
        if desc.channels != 2 {
            return Err(SonanceError::DeviceInit(format!(
                "software mixer renders stereo, {} channels requested",
                desc.channels
            )));
        }
        if desc.max_sources == 0 {
            return Err(SonanceError::DeviceInit("at least one voice is required".into()));
        }

        let (command_sender, command_receiver) = unbounded();
        let (event_sender, event_receiver) = unbounded();
        let mixer = SoftwareMixer::new(desc.sample_rate, command_receiver, event_sender);

        log::info!(
            "Software backend at {} Hz with {} voices",
            desc.sample_rate,
            desc.max_sources
        );

        Ok(Self {
            shared: Arc::new(BackendShared {
                sample_rate: desc.sample_rate,
                queue_capacity: desc.streaming_queue_capacity.max(1),
                max_voices: desc.max_sources,
                effects: desc.enable_effects,
                commands: command_sender,
                active_voices: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
            allow_adpcm: desc.allow_adpcm,
            force_software: desc.force_software_buffers,
            manual_rolloff: desc.manual_rolloff,
            mixer: Mutex::new(Some(mixer)),
            events: event_receiver,
            library: MusicLibrary::default(),
        })
    }

    /// Registry constructor.
    pub fn open(desc: &SonanceDesc) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(Self::new(desc)?))
    }

    /// Tracks available to this backend's music channels.
    pub fn music_library(&self) -> &MusicLibrary {
        &self.library
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn active_voices(&self) -> usize {
        self.shared.active_voices.load(Ordering::Acquire)
    }
}

impl Backend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn option(&self, option: DriverOption) -> bool {
        match option {
            DriverOption::EnvironmentEffects => self.shared.effects,
            DriverOption::AllowAdpcm => self.allow_adpcm,
            DriverOption::SoftwareBuffer => self.force_software,
            DriverOption::ManualRolloff => self.manual_rolloff,
            DriverOption::HasBufferStreaming => true,
        }
    }

    fn max_voices(&self) -> usize {
        self.shared.max_voices
    }

    fn create_buffer(&self, name: &str) -> Result<Arc<Buffer>> {
        Ok(Arc::new(Buffer::new(
            self.shared.next_id(),
            name,
            self.allow_adpcm,
            self.force_software,
        )))
    }

    fn create_voice(&self, format: BufferFormat) -> Result<Box<dyn Voice>> {
        Ok(Box::new(self.shared.spawn_voice(format, true)?))
    }

    fn create_effect(&self, kind: EffectKind) -> Result<Box<dyn EffectSlot>> {
        if !self.shared.effects {
            return Err(SonanceError::Unsupported("effects"));
        }
        let EffectKind::Reverb = kind;
        let id = self.shared.next_id();
        self.shared.send(MixerCommand::AddEffect {
            id,
            params: ReverbParams::default(),
        });
        Ok(Box::new(SoftwareEffect {
            id,
            backend: self.shared.clone(),
        }))
    }

    fn create_submix(&self) -> Result<Box<dyn SubmixBus>> {
        if !self.shared.effects {
            return Err(SonanceError::Unsupported("submixes"));
        }
        let id = self.shared.next_id();
        self.shared.send(MixerCommand::AddBus(id));
        Ok(Box::new(SoftwareSubmix {
            id,
            backend: self.shared.clone(),
        }))
    }

    fn create_music_channel(&self) -> Result<Box<dyn MusicChannel>> {
        Ok(Box::new(SoftwareMusicChannel::new(
            self.shared.clone(),
            self.library.clone(),
        )))
    }

    fn take_mixer(&self) -> Option<Box<dyn Mixer>> {
        let mut slot = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
        slot.take().map(|mixer| Box::new(mixer) as Box<dyn Mixer>)
    }

    fn poll_events(&self) -> Vec<BackendEvent> {
        self.events.try_iter().collect()
    }
}
