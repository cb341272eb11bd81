//! Crossfading music playback over two streaming channels.

use crate::backend::Backend;
use crate::error::{Result, SonanceError};
use std::time::Duration;

/// A backend stream that plays one music track at a time.
pub trait MusicChannel: Send {
    /// Starts `path`, replacing whatever the channel was playing.
    fn play(&mut self, path: &str, async_load: bool, looping: bool) -> Result<()>;

    fn stop(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);

    /// True once a non-looping track has played to its end, or nothing is playing.
    fn is_ended(&self) -> bool;

    /// Whether an asynchronous load is still in progress.
    fn is_loading_async(&self) -> bool {
        false
    }

    fn set_volume(&mut self, volume: f32);
}

/// Observable phase of one fader slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    FadingIn,
    Steady,
    FadingOut,
}

struct MusicSlot {
    channel: Option<Box<dyn MusicChannel>>,
    fade_volume: f32,
    /// Volume change per second; negative while fading out
    fade_delta: f32,
    playing: bool,
    fading: bool,
}

impl MusicSlot {
    fn new(channel: Option<Box<dyn MusicChannel>>) -> Self {
        Self {
            channel,
            fade_volume: 0.0,
            fade_delta: 0.0,
            playing: false,
            fading: false,
        }
    }

    fn state(&self) -> SlotState {
        match (self.playing, self.fading) {
            (false, _) => SlotState::Idle,
            (true, false) => SlotState::Steady,
            (true, true) if self.fade_delta < 0.0 => SlotState::FadingOut,
            (true, true) => SlotState::FadingIn,
        }
    }

    fn halt(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.stop();
        }
        self.playing = false;
        self.fading = false;
        self.fade_volume = 0.0;
    }

    fn fade_out(&mut self, fade_ms: u32) {
        if fade_ms > 0 {
            self.fade_delta = -1000.0 / fade_ms as f32;
            self.fading = true;
        } else {
            self.halt();
        }
    }
}

/// Fades between music tracks using two fixed slots.
///
/// Starting a track fades out whatever is playing and brings the new track up in the
/// other slot, so at most two slots ever sound at once. Drive it with
/// [`MusicFader::update`] once per frame.
pub struct MusicFader {
    slots: [MusicSlot; 2],
    active: usize,
    gain: f32,
}

impl MusicFader {
    /// Creates the two channels from `backend`. A backend without music channels
    /// yields a fader whose `play` reports [`SonanceError::Unsupported`].
    pub fn new(backend: &dyn Backend) -> Self {
        let open = || match backend.create_music_channel() {
            Ok(channel) => Some(channel),
            Err(e) => {
                log::warn!("Music channel unavailable: {}", e);
                None
            }
        };
        let first = open();
        let second = open();
        Self {
            slots: [MusicSlot::new(first), MusicSlot::new(second)],
            active: 0,
            gain: 1.0,
        }
    }

    pub fn with_channels(first: Box<dyn MusicChannel>, second: Box<dyn MusicChannel>) -> Self {
        Self {
            slots: [MusicSlot::new(Some(first)), MusicSlot::new(Some(second))],
            active: 0,
            gain: 1.0,
        }
    }

    /// Plays `path`, crossfading over `fade_ms` milliseconds. With `fade_ms == 0` the
    /// previous track stops and the new one starts at full volume.
    pub fn play(&mut self, path: &str, fade_ms: u32, async_load: bool, looping: bool) -> Result<()> {
        // Prefer a free slot, starting with the one after the active slot.
        let other = (self.active + 1) % 2;
        let target = [other, self.active]
            .into_iter()
            .find(|&i| !self.slots[i].playing)
            .unwrap_or_else(|| {
                log::debug!("Both music slots busy, reclaiming slot {}", other);
                other
            });

        // The current track keeps playing if the new one cannot start.
        let slot = &mut self.slots[target];
        let Some(channel) = slot.channel.as_mut() else {
            return Err(SonanceError::Unsupported("music channels"));
        };
        if let Err(e) = channel.play(path, async_load, looping) {
            log::warn!("Cannot play music '{}': {}", path, e);
            if slot.playing {
                slot.halt();
            }
            return Err(e);
        }

        for (i, slot) in self.slots.iter_mut().enumerate() {
            if i != target && slot.playing {
                slot.fade_out(fade_ms);
            }
        }
        self.active = target;

        let gain = self.gain;
        let slot = &mut self.slots[target];
        if fade_ms > 0 {
            slot.fade_volume = 0.0;
            slot.fade_delta = 1000.0 / fade_ms as f32;
            slot.fading = true;
        } else {
            slot.fade_volume = 1.0;
            slot.fade_delta = 0.0;
            slot.fading = false;
        }
        slot.playing = true;
        if let Some(channel) = slot.channel.as_mut() {
            channel.set_volume(slot.fade_volume * gain);
        }
        Ok(())
    }

    /// Fades out every playing slot over `fade_ms`, or stops them at once for 0.
    pub fn stop(&mut self, fade_ms: u32) {
        for slot in self.slots.iter_mut().filter(|s| s.playing) {
            slot.fade_out(fade_ms);
        }
    }

    pub fn pause(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.playing) {
            if let Some(channel) = slot.channel.as_mut() {
                channel.pause();
            }
        }
    }

    pub fn resume(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.playing) {
            if let Some(channel) = slot.channel.as_mut() {
                channel.resume();
            }
        }
    }

    /// True when the active track has finished or nothing was started.
    pub fn is_ended(&self) -> bool {
        let slot = &self.slots[self.active];
        !slot.playing || slot.channel.as_ref().is_none_or(|c| c.is_ended())
    }

    pub fn is_loading_async(&self) -> bool {
        self.slots[self.active]
            .channel
            .as_ref()
            .is_some_and(|c| c.is_loading_async())
    }

    /// Advances fades by `elapsed` and pushes the resulting volumes.
    pub fn update(&mut self, elapsed: Duration) {
        let dt = elapsed.as_secs_f32();
        for slot in &mut self.slots {
            if !slot.playing {
                continue;
            }
            if slot.channel.as_ref().is_none_or(|c| c.is_ended()) {
                slot.halt();
                continue;
            }
            if slot.fading {
                slot.fade_volume += slot.fade_delta * dt;
                if slot.fade_delta > 0.0 && slot.fade_volume >= 1.0 {
                    slot.fade_volume = 1.0;
                    slot.fading = false;
                } else if slot.fade_delta <= 0.0 && slot.fade_volume <= 0.0 {
                    slot.halt();
                    continue;
                }
            }
        }
        self.push_volumes();
    }

    /// Master volume, clamped to [0, 1].
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
        self.push_volumes();
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    fn push_volumes(&mut self) {
        let gain = self.gain;
        for slot in self.slots.iter_mut().filter(|s| s.playing) {
            if let Some(channel) = slot.channel.as_mut() {
                channel.set_volume(slot.fade_volume * gain);
            }
        }
    }

    /// Index of the slot the last `play` targeted.
    pub fn active_slot(&self) -> usize {
        self.active
    }

    /// State of slot `index` (0 or 1). Out-of-range indices report `Idle`.
    pub fn slot_state(&self, index: usize) -> SlotState {
        self.slots.get(index).map_or(SlotState::Idle, MusicSlot::state)
    }

    pub fn fade_volume(&self, index: usize) -> f32 {
        self.slots.get(index).map_or(0.0, |s| s.fade_volume)
    }

    pub fn playing_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.playing).count()
    }
}
