// Mixer module - renders every software voice into the output block.
// Voices mix into a scratch block first so the same signal can feed submix sends.

use super::playback::PlaybackCursor;
use super::reverb::Reverb;
use super::{MixerCommand, QueueEntry, VoiceShared};
use crate::backend::{BackendEvent, Mixer};
use crate::buffer::BufferFormat;
use crate::codec::CodecState;
use crossbeam_channel::{Receiver, Sender};
use ringbuf::HeapCons;
use ringbuf::traits::Consumer;
use std::collections::HashMap;
use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;

/// Mixer-side state of one voice.
struct MixVoice {
    shared: Arc<VoiceShared>,
    format: BufferFormat,
    consumer: HeapCons<QueueEntry>,
    epoch: u32,
    codec: CodecState,
    current: Option<PlaybackCursor>,
    /// Entry whose buffer was locked for writing when the mixer tried to read it
    pending: Option<QueueEntry>,
    send: Option<(u64, f32)>,
}

enum VoiceOutcome {
    Silent,
    Mixed,
}

impl MixVoice {
    fn new(shared: Arc<VoiceShared>, format: BufferFormat, consumer: HeapCons<QueueEntry>) -> Self {
        let epoch = shared.epoch();
        Self {
            shared,
            format,
            consumer,
            epoch,
            codec: CodecState::new(),
            current: None,
            pending: None,
            send: None,
        }
    }

    /// Drops everything read so far after a stop.
    fn reset(&mut self, epoch: u32) {
        self.epoch = epoch;
        self.current = None;
        self.pending = None;
        self.codec = CodecState::new();
    }

    /// Next queued entry of the current epoch. Entries from before a stop are dropped.
    fn pop_entry(&mut self) -> Option<QueueEntry> {
        if let Some(entry) = self.pending.take() {
            return Some(entry);
        }
        while let Some(entry) = self.consumer.try_pop() {
            if entry.epoch == self.epoch {
                return Some(entry);
            }
            if entry.epoch == self.shared.epoch() {
                // Submitted after a stop this block has not seen yet.
                self.reset(entry.epoch);
                return Some(entry);
            }
            log::debug!("Voice {}: skipped stale submission", self.shared.id);
        }
        None
    }

    fn has_queued_entry(&self) -> bool {
        self.pending.is_some() || self.consumer.iter().any(|e| e.epoch == self.epoch)
    }

    /// Loads the next cursor. Returns false if nothing is ready to play.
    fn load_next(&mut self) -> bool {
        let Some(entry) = self.pop_entry() else {
            return false;
        };
        match PlaybackCursor::load(&entry, &mut self.codec) {
            Some(cursor) => {
                self.current = Some(cursor);
                true
            }
            None => {
                self.pending = Some(entry);
                false
            }
        }
    }

    fn channel_gains(&self) -> (f32, f32) {
        let gain = self.shared.gain();
        if self.format.is_stereo() {
            return (gain, gain);
        }
        // Constant-power pan.
        let angle = (self.shared.pan().clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
        (gain * angle.cos(), gain * angle.sin())
    }

    fn render(
        &mut self,
        scratch: &mut [f32],
        sample_rate: u32,
        events: &Sender<BackendEvent>,
    ) -> VoiceOutcome {
        let epoch = self.shared.epoch();
        if epoch != self.epoch {
            self.reset(epoch);
        }
        if !self.shared.is_playing() {
            return VoiceOutcome::Silent;
        }

        let (left_gain, right_gain) = self.channel_gains();
        let pitch = self.shared.pitch();
        let frame_count = scratch.len() / 2;
        let mut frames_filled = 0;

        while frames_filled < frame_count {
            if self.current.is_none() && !self.load_next() {
                if self.pending.is_none() && self.shared.finish(self.epoch) {
                    log::debug!("Voice {} ran out of data", self.shared.id);
                    emit(events, BackendEvent::VoiceFinished { voice_id: self.shared.id });
                }
                break;
            }
            let Some(cursor) = self.current.as_mut() else {
                break;
            };

            if cursor.is_stale() {
                log::warn!(
                    "Voice {}: buffer changed while queued, stopping",
                    self.shared.id
                );
                self.current = None;
                if self.shared.finish(self.epoch) {
                    emit(events, BackendEvent::VoiceInvalidated { voice_id: self.shared.id });
                }
                break;
            }

            let step = cursor.step(pitch, sample_rate);
            let written = cursor.fill(
                &mut scratch[frames_filled * 2..],
                left_gain,
                right_gain,
                step,
            );
            frames_filled += written;

            if cursor.is_finished() {
                if self.shared.looping() && cursor.frames() > 0 && !self.has_queued_entry() {
                    if let Some(cursor) = self.current.as_mut() {
                        cursor.rewind();
                    }
                } else {
                    self.current = None;
                    self.shared.consume(self.epoch);
                    emit(events, BackendEvent::BufferProcessed { voice_id: self.shared.id });
                }
            } else if written == 0 {
                break;
            }
        }

        if frames_filled > 0 {
            VoiceOutcome::Mixed
        } else {
            VoiceOutcome::Silent
        }
    }
}

fn emit(events: &Sender<BackendEvent>, event: BackendEvent) {
    // An unbounded send only fails once the backend is gone.
    let _ = events.send(event);
}

struct MixBus {
    effect: Option<u64>,
    gain: f32,
    input: Vec<f32>,
}

/// Audio-thread half of the software backend.
pub struct SoftwareMixer {
    sample_rate: u32,
    commands: Receiver<MixerCommand>,
    events: Sender<BackendEvent>,
    voices: HashMap<u64, MixVoice>,
    buses: HashMap<u64, MixBus>,
    effects: HashMap<u64, Reverb>,
    scratch: Vec<f32>,
    wet: Vec<f32>,
    frames_rendered: u64,
}

impl SoftwareMixer {
    pub(crate) fn new(
        sample_rate: u32,
        commands: Receiver<MixerCommand>,
        events: Sender<BackendEvent>,
    ) -> Self {
        Self {
            sample_rate,
            commands,
            events,
            voices: HashMap::new(),
            buses: HashMap::new(),
            effects: HashMap::new(),
            scratch: Vec::new(),
            wet: Vec::new(),
            frames_rendered: 0,
        }
    }

    /// Voices the mixer currently knows about, playing or not.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                MixerCommand::AddVoice {
                    shared,
                    format,
                    consumer,
                } => {
                    self.voices
                        .insert(shared.id, MixVoice::new(shared, format, consumer));
                }
                MixerCommand::RemoveVoice(id) => {
                    self.voices.remove(&id);
                }
                MixerCommand::SetSend { voice, bus, level } => {
                    if let Some(v) = self.voices.get_mut(&voice) {
                        v.send = bus.map(|bus| (bus, level));
                    }
                }
                MixerCommand::AddEffect { id, params } => {
                    self.effects.insert(id, Reverb::new(self.sample_rate, &params));
                }
                MixerCommand::SetReverb { id, params } => {
                    if let Some(reverb) = self.effects.get_mut(&id) {
                        reverb.set_params(&params);
                    }
                }
                MixerCommand::RemoveEffect(id) => {
                    self.effects.remove(&id);
                    for bus in self.buses.values_mut() {
                        if bus.effect == Some(id) {
                            bus.effect = None;
                        }
                    }
                }
                MixerCommand::AddBus(id) => {
                    self.buses.insert(
                        id,
                        MixBus {
                            effect: None,
                            gain: 1.0,
                            input: Vec::new(),
                        },
                    );
                }
                MixerCommand::SetBusEffect { bus, effect } => {
                    if let Some(b) = self.buses.get_mut(&bus) {
                        b.effect = effect;
                    }
                }
                MixerCommand::SetBusGain { bus, gain } => {
                    if let Some(b) = self.buses.get_mut(&bus) {
                        b.gain = gain;
                    }
                }
                MixerCommand::RemoveBus(id) => {
                    self.buses.remove(&id);
                    for voice in self.voices.values_mut() {
                        if matches!(voice.send, Some((bus, _)) if bus == id) {
                            voice.send = None;
                        }
                    }
                }
            }
        }
    }
}

impl Mixer for SoftwareMixer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        2
    }

    fn render(&mut self, out: &mut [f32]) -> usize {
        self.drain_commands();

        let frame_count = out.len() / 2;
        let len = frame_count * 2;
        out.fill(0.0);
        self.scratch.resize(len, 0.0);
        self.wet.resize(len, 0.0);
        for bus in self.buses.values_mut() {
            bus.input.clear();
            bus.input.resize(len, 0.0);
        }

        for voice in self.voices.values_mut() {
            self.scratch.fill(0.0);
            let outcome = voice.render(&mut self.scratch, self.sample_rate, &self.events);
            if let VoiceOutcome::Silent = outcome {
                continue;
            }
            for (o, s) in out.iter_mut().zip(&self.scratch) {
                *o += s;
            }
            if let Some((bus, level)) = voice.send {
                if let Some(bus) = self.buses.get_mut(&bus) {
                    for (i, s) in bus.input.iter_mut().zip(&self.scratch) {
                        *i += s * level;
                    }
                }
            }
        }

        for bus in self.buses.values() {
            let reverb = match bus.effect {
                Some(id) => self.effects.get_mut(&id),
                None => None,
            };
            match reverb {
                Some(reverb) => {
                    reverb.process(&bus.input, &mut self.wet);
                    for (o, w) in out.iter_mut().zip(&self.wet) {
                        *o += w * bus.gain;
                    }
                }
                None => {
                    for (o, i) in out.iter_mut().zip(&bus.input) {
                        *o += i * bus.gain;
                    }
                }
            }
        }

        self.frames_rendered += frame_count as u64;
        frame_count
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{Backend, BackendEvent, EffectSlot, Mixer, SubmixBus, Voice, VoiceParams};
    use crate::buffer::{Buffer, BufferFormat};
    use crate::config::SonanceDesc;
    use crate::effect::EffectKind;
    use std::sync::Arc;

    fn setup() -> (SoftwareBackend, Box<dyn Mixer>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = SoftwareBackend::new(&SonanceDesc::default().sample_rate(1000)).unwrap();
        let mixer = backend.take_mixer().unwrap();
        (backend, mixer)
    }

    fn constant(backend: &SoftwareBackend, value: i16, frames: usize) -> Arc<Buffer> {
        let buffer = backend.create_buffer("dc").unwrap();
        buffer.set_format(BufferFormat::pcm(1, 16, 1000)).unwrap();
        buffer.fill_pcm16(&vec![value; frames]).unwrap();
        buffer
    }

    #[test]
    fn center_panned_mono_voice() {
        let (backend, mut mixer) = setup();
        let buffer = constant(&backend, 16384, 100);
        let mut voice = backend.create_voice(buffer.format().unwrap()).unwrap();
        voice.submit(buffer).unwrap();
        voice.start().unwrap();

        let mut out = vec![0.0f32; 20];
        assert_eq!(mixer.render(&mut out), 10);
        let expected = 0.5 * std::f32::consts::FRAC_1_SQRT_2;
        assert!(out.iter().all(|s| (s - expected).abs() < 1e-5));
    }

    #[test]
    fn hard_pan_and_gain() {
        let (backend, mut mixer) = setup();
        let buffer = constant(&backend, 16384, 100);
        let mut voice = backend.create_voice(buffer.format().unwrap()).unwrap();
        voice.submit(buffer).unwrap();
        voice.apply(&VoiceParams {
            gain: 0.5,
            pan: 1.0,
            ..Default::default()
        });
        voice.start().unwrap();

        let mut out = vec![0.0f32; 8];
        mixer.render(&mut out);
        for frame in out.chunks(2) {
            assert!(frame[0].abs() < 1e-6);
            assert!((frame[1] - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn exhausted_voice_stops_and_reports() {
        let (backend, mut mixer) = setup();
        let buffer = constant(&backend, 1000, 5);
        let mut voice = backend.create_voice(buffer.format().unwrap()).unwrap();
        voice.submit(buffer).unwrap();
        voice.start().unwrap();

        let mut out = vec![0.0f32; 20];
        mixer.render(&mut out);
        assert!(!voice.is_playing());
        assert_eq!(voice.queued_buffers(), 0);
        assert!(out[10..].iter().all(|&s| s == 0.0));

        let id = voice.id();
        assert_eq!(
            backend.poll_events(),
            vec![
                BackendEvent::BufferProcessed { voice_id: id },
                BackendEvent::VoiceFinished { voice_id: id },
            ]
        );
    }

    #[test]
    fn looping_voice_keeps_playing() {
        let (backend, mut mixer) = setup();
        let buffer = constant(&backend, 1000, 5);
        let mut voice = backend.create_voice(buffer.format().unwrap()).unwrap();
        voice.submit(buffer).unwrap();
        voice.set_looping(true);
        voice.start().unwrap();

        let mut out = vec![0.0f32; 64];
        mixer.render(&mut out);
        mixer.render(&mut out);
        assert!(voice.is_playing());
        assert!(out.iter().all(|&s| s != 0.0));
        assert!(backend.poll_events().is_empty());
    }

    #[test]
    fn streaming_queue_plays_in_order() {
        let (backend, mut mixer) = setup();
        let first = constant(&backend, 8192, 4);
        let second = constant(&backend, -8192, 4);
        let mut voice = backend.create_voice(first.format().unwrap()).unwrap();
        voice.submit(first).unwrap();
        voice.submit(second).unwrap();
        voice.apply(&VoiceParams {
            pan: -1.0,
            ..Default::default()
        });
        voice.start().unwrap();

        let mut out = vec![0.0f32; 16];
        mixer.render(&mut out);
        let left: Vec<f32> = out.chunks(2).map(|f| f[0]).collect();
        assert!(left[..4].iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert!(left[4..].iter().all(|&s| (s + 0.25).abs() < 1e-6));
        assert_eq!(voice.queued_buffers(), 0);
    }

    #[test]
    fn paused_voice_holds_position() {
        let (backend, mut mixer) = setup();
        let buffer = backend.create_buffer("ramp").unwrap();
        buffer.set_format(BufferFormat::pcm(1, 16, 1000)).unwrap();
        buffer.fill_pcm16(&[0, 1000, 2000, 3000, 4000, 5000]).unwrap();
        let mut voice = backend.create_voice(buffer.format().unwrap()).unwrap();
        voice.submit(buffer).unwrap();
        voice.apply(&VoiceParams {
            pan: -1.0,
            ..Default::default()
        });
        voice.start().unwrap();

        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out);
        voice.pause();
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        voice.resume();
        mixer.render(&mut out);
        assert!((out[0] - 2000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn refilled_buffer_invalidates_voice() {
        let (backend, mut mixer) = setup();
        let buffer = constant(&backend, 1000, 100);
        let mut voice = backend.create_voice(buffer.format().unwrap()).unwrap();
        voice.submit(buffer.clone()).unwrap();
        voice.start().unwrap();

        let mut out = vec![0.0f32; 8];
        mixer.render(&mut out);
        buffer.fill_pcm16(&[0i16; 100]).unwrap();
        mixer.render(&mut out);

        assert!(!voice.is_playing());
        assert!(
            backend
                .poll_events()
                .contains(&BackendEvent::VoiceInvalidated { voice_id: voice.id() })
        );
    }

    #[test]
    fn stop_discards_pending_submissions() {
        let (backend, mut mixer) = setup();
        let loud = constant(&backend, 16384, 50);
        let mut voice = backend.create_voice(loud.format().unwrap()).unwrap();
        voice.submit(loud.clone()).unwrap();
        voice.submit(loud).unwrap();
        voice.start().unwrap();
        voice.stop();

        let quiet = constant(&backend, 0, 50);
        voice.submit(quiet).unwrap();
        voice.start().unwrap();

        let mut out = vec![0.0f32; 20];
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(voice.is_playing());
    }

    #[test]
    fn send_feeds_a_reverb_bus() {
        let (backend, mut mixer) = setup();
        let effect = backend.create_effect(EffectKind::Reverb).unwrap();
        let mut bus = backend.create_submix().unwrap();
        bus.set_effect(Some(effect.id()));

        let buffer = constant(&backend, 16384, 10);
        let mut voice = backend.create_voice(buffer.format().unwrap()).unwrap();
        voice.submit(buffer).unwrap();
        voice.set_send(Some(bus.id()), 1.0).unwrap();
        voice.start().unwrap();

        let mut out = vec![0.0f32; 2000];
        mixer.render(&mut out);
        // The dry signal lasts 10 frames; anything later is the reverb tail.
        let tail: f32 = out[200..].iter().map(|s| s.abs()).sum();
        assert!(tail > 0.0);

        // Removing the effect leaves the bus passing the send through dry.
        drop(effect);
        out.fill(0.0);
        mixer.render(&mut out);
        assert!(out.iter().all(|s| s.is_finite()));
    }
}
