use crate::math::{Orientation, Vec3};

/// The reference frame every 3D source is heard from.
///
/// Exactly one listener exists per [`SonanceSession`](crate::SonanceSession); the session
/// owns it and hands out references, so there is no global listener state. Setters only
/// record values. Sources read them through a [`ListenerSnapshot`] taken once at the
/// start of each commit.
#[derive(Debug, Clone)]
pub struct Listener {
    position: Vec3,
    velocity: Vec3,
    orientation: Orientation,
    gain: f32,
    doppler_factor: f32,
    rolloff_factor: f32,
    environment: Option<(u32, f32)>,
    environment_dirty: bool,
}

/// Immutable copy of the listener state used for one commit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerSnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: Orientation,
    pub gain: f32,
    pub doppler_factor: f32,
    pub rolloff_factor: f32,
}

impl Default for ListenerSnapshot {
    fn default() -> Self {
        Listener::default().snapshot()
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Orientation::identity(),
            gain: 1.0,
            doppler_factor: 1.0,
            rolloff_factor: 1.0,
            environment: None,
            environment_dirty: false,
        }
    }
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pos(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn pos(&self) -> Vec3 {
        self.position
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn set_orientation(&mut self, front: Vec3, up: Vec3) {
        self.orientation = Orientation::new(front, up);
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Master gain, clamped to [0, 1].
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Scales Doppler pitch shift for every source. Negative values are treated as 0.
    pub fn set_doppler_factor(&mut self, factor: f32) {
        self.doppler_factor = factor.max(0.0);
    }

    pub fn doppler_factor(&self) -> f32 {
        self.doppler_factor
    }

    /// Scales distance attenuation for every source. Negative values are treated as 0.
    pub fn set_rolloff_factor(&mut self, factor: f32) {
        self.rolloff_factor = factor.max(0.0);
    }

    pub fn rolloff_factor(&self) -> f32 {
        self.rolloff_factor
    }

    /// Selects a reverb preset by id and room size. Applied to reverb effects at the next
    /// commit; without a reverb effect it is recorded and otherwise ignored.
    pub fn set_environment(&mut self, id: u32, room_size: f32) {
        self.environment = Some((id, room_size));
        self.environment_dirty = true;
    }

    pub fn environment(&self) -> Option<(u32, f32)> {
        self.environment
    }

    /// Returns the environment if it changed since the last call.
    pub(crate) fn take_environment_change(&mut self) -> Option<(u32, f32)> {
        if std::mem::take(&mut self.environment_dirty) {
            self.environment
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            position: self.position,
            velocity: self.velocity,
            orientation: self.orientation.normalized(),
            gain: self.gain,
            doppler_factor: self.doppler_factor,
            rolloff_factor: self.rolloff_factor,
        }
    }
}
