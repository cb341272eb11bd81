use crate::backend::VoiceParams;
use crate::listener::ListenerSnapshot;
use crate::math::{Orientation, Vec3};
use crate::spatial::attenuation;
use std::f32::consts::TAU;

/// Pitch ratios outside this range are clamped after Doppler.
const MIN_PITCH_RATIO: f32 = 1.0 / 16.0;
const MAX_PITCH_RATIO: f32 = 16.0;

/// 3D emitter parameters of a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitter {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Cone axis. A zero vector makes the source omnidirectional.
    pub direction: Vec3,
    /// Position and velocity are given in listener space rather than world space.
    pub relative: bool,
    pub gain: f32,
    pub pitch: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Inner cone angle in radians.
    pub cone_inner: f32,
    /// Outer cone angle in radians.
    pub cone_outer: f32,
    pub cone_outer_gain: f32,
    /// Rolloff curve shape in [-1, 1].
    pub alpha: f64,
}

impl Default for Emitter {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            relative: false,
            gain: 1.0,
            pitch: 1.0,
            min_distance: 1.0,
            max_distance: 1_000_000.0,
            cone_inner: TAU,
            cone_outer: TAU,
            cone_outer_gain: 1.0,
            alpha: -1.0,
        }
    }
}

/// Turns emitter and listener state into the per-voice output parameters.
#[derive(Debug, Clone, Copy)]
pub struct SpatialProcessor {
    manual_rolloff: bool,
    speed_of_sound: f32,
}

impl SpatialProcessor {
    pub fn new(manual_rolloff: bool, speed_of_sound: f32) -> Self {
        Self {
            manual_rolloff,
            speed_of_sound: speed_of_sound.max(f32::EPSILON),
        }
    }

    pub fn manual_rolloff(&self) -> bool {
        self.manual_rolloff
    }

    /// Computes gain, pan and pitch for one source.
    ///
    /// Multi-channel data carries its own panning, so a stereo source skips distance,
    /// cone and Doppler processing entirely.
    pub fn process(
        &self,
        emitter: &Emitter,
        listener: &ListenerSnapshot,
        multi_channel: bool,
    ) -> VoiceParams {
        let base_gain = emitter.gain * listener.gain;
        if multi_channel {
            return VoiceParams {
                gain: base_gain.clamp(0.0, 1.0),
                pan: 0.0,
                pitch: emitter.pitch,
                distance: 0.0,
            };
        }

        // Vector from the source to the listener and the source offset in listener space.
        let (to_listener, local, listener_velocity) = if emitter.relative {
            (
                -emitter.position,
                Orientation::identity().to_local(emitter.position),
                Vec3::ZERO,
            )
        } else {
            let offset = emitter.position - listener.position;
            (
                -offset,
                listener.orientation.to_local(offset),
                listener.velocity,
            )
        };

        let distance = self.effective_distance(emitter, local.length(), listener.rolloff_factor);
        let rolloff = if self.manual_rolloff {
            attenuation::manual_rolloff_gain(
                emitter.alpha,
                distance * distance,
                emitter.min_distance,
                emitter.max_distance,
            )
        } else {
            1.0
        };
        let cone = cone_gain(emitter, to_listener);
        let doppler = self.doppler_ratio(
            to_listener,
            listener_velocity,
            emitter.velocity,
            listener.doppler_factor,
        );

        let pan = if local.length_squared() > f32::EPSILON {
            (local.x / local.length()).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        VoiceParams {
            gain: (base_gain * rolloff * cone).clamp(0.0, 1.0),
            pan,
            pitch: (emitter.pitch * doppler).clamp(MIN_PITCH_RATIO, MAX_PITCH_RATIO),
            distance,
        }
    }

    /// Distance after the listener's rolloff scaler, which stretches or shrinks the
    /// attenuating part of the curve beyond the minimum distance.
    fn effective_distance(&self, emitter: &Emitter, distance: f32, rolloff_factor: f32) -> f32 {
        if distance <= emitter.min_distance {
            distance
        } else {
            emitter.min_distance + (distance - emitter.min_distance) * rolloff_factor
        }
    }

    /// Frequency ratio from the relative velocities along the source-listener axis.
    fn doppler_ratio(
        &self,
        to_listener: Vec3,
        listener_velocity: Vec3,
        source_velocity: Vec3,
        doppler_factor: f32,
    ) -> f32 {
        let distance = to_listener.length();
        if doppler_factor <= 0.0 || distance <= f32::EPSILON {
            return 1.0;
        }

        let speed = self.speed_of_sound;
        // Keep both projections just under the speed of sound so the ratio stays finite.
        let limit = speed / doppler_factor * 0.999;
        let vls = (to_listener.dot(listener_velocity) / distance).min(limit);
        let vss = (to_listener.dot(source_velocity) / distance).min(limit);

        (speed - doppler_factor * vls) / (speed - doppler_factor * vss)
    }
}

/// Gain from the emitter's sound cone for a listener in direction `to_listener`.
pub fn cone_gain(emitter: &Emitter, to_listener: Vec3) -> f32 {
    let axis = emitter.direction.normalize_or_zero();
    let toward = to_listener.normalize_or_zero();
    if axis == Vec3::ZERO || toward == Vec3::ZERO || emitter.cone_inner >= TAU {
        return 1.0;
    }

    let angle = axis.dot(toward).clamp(-1.0, 1.0).acos();
    let inner = emitter.cone_inner * 0.5;
    let outer = (emitter.cone_outer * 0.5).max(inner);
    let outer_gain = emitter.cone_outer_gain.clamp(0.0, 1.0);

    if angle <= inner {
        1.0
    } else if angle >= outer {
        outer_gain
    } else {
        let t = (angle - inner) / (outer - inner);
        1.0 + (outer_gain - 1.0) * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Listener;
    use std::f32::consts::PI;

    fn emitter_at(position: Vec3) -> Emitter {
        Emitter {
            position,
            min_distance: 1.0,
            max_distance: 20.0,
            alpha: -1.0,
            ..Default::default()
        }
    }

    #[test]
    fn inverse_distance_at_ten_units() {
        let processor = SpatialProcessor::new(true, 343.3);
        let params = processor.process(
            &emitter_at(Vec3::new(10.0, 0.0, 0.0)),
            &Listener::new().snapshot(),
            false,
        );
        assert!((params.gain - 0.1).abs() < 0.001, "gain {}", params.gain);
        assert!((params.pan - 1.0).abs() < 1e-5);
        assert_eq!(params.pitch, 1.0);
    }

    #[test]
    fn stereo_sources_are_not_spatialized() {
        let processor = SpatialProcessor::new(true, 343.3);
        let mut emitter = emitter_at(Vec3::new(100.0, 0.0, 0.0));
        emitter.gain = 0.5;
        emitter.velocity = Vec3::new(-50.0, 0.0, 0.0);
        let params = processor.process(&emitter, &Listener::new().snapshot(), true);
        assert_eq!(params.gain, 0.5);
        assert_eq!(params.pan, 0.0);
        assert_eq!(params.pitch, 1.0);
    }

    #[test]
    fn curve_backends_get_unattenuated_gain() {
        let processor = SpatialProcessor::new(false, 343.3);
        let params = processor.process(
            &emitter_at(Vec3::new(0.0, 0.0, -10.0)),
            &Listener::new().snapshot(),
            false,
        );
        assert_eq!(params.gain, 1.0);
        assert!((params.distance - 10.0).abs() < 1e-5);
        assert!(params.pan.abs() < 1e-5);
    }

    #[test]
    fn relative_sources_ignore_listener_position() {
        let processor = SpatialProcessor::new(true, 343.3);
        let mut listener = Listener::new();
        listener.set_pos(Vec3::new(500.0, 0.0, 0.0));
        let mut emitter = emitter_at(Vec3::new(-10.0, 0.0, 0.0));
        emitter.relative = true;
        let params = processor.process(&emitter, &listener.snapshot(), false);
        assert!((params.gain - 0.1).abs() < 0.001);
        assert!((params.pan + 1.0).abs() < 1e-5);
    }

    #[test]
    fn rolloff_factor_scales_attenuation() {
        let processor = SpatialProcessor::new(true, 343.3);
        let mut listener = Listener::new();
        listener.set_rolloff_factor(0.0);
        let params = processor.process(
            &emitter_at(Vec3::new(10.0, 0.0, 0.0)),
            &listener.snapshot(),
            false,
        );
        assert_eq!(params.gain, 1.0);
    }

    #[test]
    fn approaching_source_raises_pitch() {
        let processor = SpatialProcessor::new(true, 343.3);
        let mut emitter = emitter_at(Vec3::new(10.0, 0.0, 0.0));
        emitter.velocity = Vec3::new(-34.33, 0.0, 0.0);
        let mut listener = Listener::new();

        let towards = processor.process(&emitter, &listener.snapshot(), false);
        assert!((towards.pitch - 1.0 / 0.9).abs() < 1e-3, "{}", towards.pitch);

        emitter.velocity = -emitter.velocity;
        let away = processor.process(&emitter, &listener.snapshot(), false);
        assert!(away.pitch < 1.0);

        listener.set_doppler_factor(0.0);
        let flat = processor.process(&emitter, &listener.snapshot(), false);
        assert_eq!(flat.pitch, 1.0);
    }

    #[test]
    fn cone_interpolates_between_inner_and_outer() {
        let emitter = Emitter {
            direction: Vec3::X,
            cone_inner: PI / 2.0,
            cone_outer: PI,
            cone_outer_gain: 0.2,
            ..Default::default()
        };
        assert_eq!(cone_gain(&emitter, Vec3::X), 1.0);
        assert_eq!(cone_gain(&emitter, Vec3::NEG_X), 0.2);
        let mid = Vec3::new(1.0, (3.0 * PI / 8.0).tan(), 0.0);
        assert!((cone_gain(&emitter, mid) - 0.6).abs() < 1e-4);

        let omni = Emitter::default();
        assert_eq!(cone_gain(&omni, Vec3::NEG_X), 1.0);
    }
}
