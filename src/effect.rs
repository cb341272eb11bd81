//! Environmental effects and submix buses.
//!
//! An [`Effect`] wraps a backend effect slot together with its last parameter set.
//! A [`Submix`] is a mix bus that sources send part of their signal into; it refers to
//! at most one effect by id and never owns it.

use crate::backend::{EffectSlot, SubmixBus};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Reverb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmixId(pub u64);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

impl fmt::Display for SubmixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submix#{}", self.0)
    }
}

/// Reverb parameters. Levels are in mB, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbParams {
    /// Room filter level, [-10000, 0]
    pub room: i32,
    /// High-frequency room filter level, [-10000, 0]
    pub room_hf: i32,
    /// [0.1, 20.0]
    pub decay_time: f32,
    /// [0.1, 2.0]
    pub decay_hf_ratio: f32,
    /// Early reflections level, [-10000, 1000]
    pub reflections: i32,
    /// [0.0, 0.3]
    pub reflections_delay: f32,
    /// Late reverberation level, [-10000, 2000]
    pub late_reverb: i32,
    /// [0.0, 0.1]
    pub late_reverb_delay: f32,
    /// Percent, [0, 100]
    pub diffusion: f32,
    /// Percent, [0, 100]
    pub density: f32,
    /// Room size in meters, [1, 100]
    pub room_size: f32,
}

impl ReverbParams {
    /// Returns a copy with every field clamped to its range. Out-of-range values are
    /// never rejected.
    pub fn clamped(self) -> Self {
        Self {
            room: self.room.clamp(-10000, 0),
            room_hf: self.room_hf.clamp(-10000, 0),
            decay_time: clamp_f32(self.decay_time, 0.1, 20.0),
            decay_hf_ratio: clamp_f32(self.decay_hf_ratio, 0.1, 2.0),
            reflections: self.reflections.clamp(-10000, 1000),
            reflections_delay: clamp_f32(self.reflections_delay, 0.0, 0.3),
            late_reverb: self.late_reverb.clamp(-10000, 2000),
            late_reverb_delay: clamp_f32(self.late_reverb_delay, 0.0, 0.1),
            diffusion: clamp_f32(self.diffusion, 0.0, 100.0),
            density: clamp_f32(self.density, 0.0, 100.0),
            room_size: clamp_f32(self.room_size, 1.0, 100.0),
        }
    }

    pub fn from_preset(preset: ReverbPreset, room_size: f32) -> Self {
        let p = preset.params();
        Self { room_size, ..p }.clamped()
    }
}

impl Default for ReverbParams {
    fn default() -> Self {
        ReverbPreset::Generic.params()
    }
}

// NaN falls back to the lower bound.
fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Named reverb environments, numbered in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReverbPreset {
    Generic,
    PaddedCell,
    Room,
    Bathroom,
    StoneRoom,
    Auditorium,
    ConcertHall,
    Cave,
    Hangar,
    Forest,
    Underwater,
}

impl ReverbPreset {
    pub const ALL: [ReverbPreset; 11] = [
        Self::Generic,
        Self::PaddedCell,
        Self::Room,
        Self::Bathroom,
        Self::StoneRoom,
        Self::Auditorium,
        Self::ConcertHall,
        Self::Cave,
        Self::Hangar,
        Self::Forest,
        Self::Underwater,
    ];

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    /// Preset values with the preset's own room size.
    pub fn params(self) -> ReverbParams {
        #[rustfmt::skip]
        let (room, room_hf, decay_time, decay_hf_ratio, reflections, reflections_delay,
             late_reverb, late_reverb_delay, diffusion, density, room_size) = match self {
            Self::Generic =>     (-1000,  -100,  1.49, 0.83, -2602, 0.007,   200, 0.011, 100.0, 100.0,  7.5),
            Self::PaddedCell =>  (-1000, -6000,  0.17, 0.10, -1204, 0.001,   207, 0.002, 100.0, 100.0,  1.4),
            Self::Room =>        (-1000,  -454,  0.40, 0.83, -1646, 0.002,    53, 0.003, 100.0, 100.0,  1.9),
            Self::Bathroom =>    (-1000, -1200,  1.49, 0.54,  -370, 0.007,  1030, 0.011, 100.0,  60.0,  1.4),
            Self::StoneRoom =>   (-1000,  -300,  2.31, 0.64,  -711, 0.012,    83, 0.017, 100.0, 100.0, 11.6),
            Self::Auditorium =>  (-1000,  -476,  4.32, 0.59,  -789, 0.020,  -289, 0.030, 100.0, 100.0, 21.6),
            Self::ConcertHall => (-1000,  -500,  3.92, 0.70, -1230, 0.020,    -2, 0.029, 100.0, 100.0, 19.6),
            Self::Cave =>        (-1000,     0,  2.91, 1.30,  -602, 0.015,  -302, 0.022, 100.0, 100.0, 14.6),
            Self::Hangar =>      (-1000, -1000, 10.05, 0.23,  -602, 0.020,   198, 0.030, 100.0, 100.0, 50.3),
            Self::Forest =>      (-1000, -3300,  1.49, 0.54, -2560, 0.162,  -613, 0.088,  79.0, 100.0, 38.0),
            Self::Underwater =>  (-1000, -4000,  1.49, 0.10,  -449, 0.007,  1700, 0.011, 100.0, 100.0,  1.8),
        };
        ReverbParams {
            room,
            room_hf,
            decay_time,
            decay_hf_ratio,
            reflections,
            reflections_delay,
            late_reverb,
            late_reverb_delay,
            diffusion,
            density,
            room_size,
        }
    }
}

/// An effect instance created through a session.
pub struct Effect {
    id: EffectId,
    kind: EffectKind,
    params: ReverbParams,
    slot: Box<dyn EffectSlot>,
}

impl Effect {
    pub(crate) fn new(id: EffectId, mut slot: Box<dyn EffectSlot>) -> Self {
        let params = ReverbParams::default();
        slot.set_reverb(&params);
        Self {
            id,
            kind: slot.kind(),
            params,
            slot,
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub(crate) fn slot_id(&self) -> u64 {
        self.slot.id()
    }

    /// Parameters as last pushed to the backend, after clamping.
    pub fn params(&self) -> &ReverbParams {
        &self.params
    }

    /// Clamps `params` and pushes them to the backend.
    pub fn set_environment(&mut self, params: ReverbParams) {
        self.params = params.clamped();
        self.slot.set_reverb(&self.params);
    }

    pub fn apply_preset(&mut self, preset: ReverbPreset, room_size: f32) {
        log::debug!("{} switching to {:?} (size {})", self.id, preset, room_size);
        self.set_environment(ReverbParams::from_preset(preset, room_size));
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish()
    }
}

/// A mix bus sources can send into.
pub struct Submix {
    id: SubmixId,
    effect: Option<EffectId>,
    gain: f32,
    bus: Box<dyn SubmixBus>,
}

impl Submix {
    pub(crate) fn new(id: SubmixId, bus: Box<dyn SubmixBus>) -> Self {
        Self {
            id,
            effect: None,
            gain: 1.0,
            bus,
        }
    }

    pub fn id(&self) -> SubmixId {
        self.id
    }

    pub(crate) fn bus_id(&self) -> u64 {
        self.bus.id()
    }

    pub fn effect(&self) -> Option<EffectId> {
        self.effect
    }

    /// Attaches `effect`, or detaches with `None`. The submix only refers to the effect.
    pub fn set_effect(&mut self, effect: Option<&Effect>) {
        self.effect = effect.map(Effect::id);
        self.bus.set_effect(effect.map(Effect::slot_id));
    }

    pub(crate) fn clear_effect(&mut self) {
        self.effect = None;
        self.bus.set_effect(None);
    }

    /// Output level of the bus, clamped to [0, 1].
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = clamp_f32(gain, 0.0, 1.0);
        self.bus.set_gain(self.gain);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl fmt::Debug for Submix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submix")
            .field("id", &self.id)
            .field("effect", &self.effect)
            .field("gain", &self.gain)
            .finish()
    }
}
