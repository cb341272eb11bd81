//! Distance attenuation.
//!
//! Levels are expressed in hundredths of a decibel (mB). The rolloff curve is a blend
//! of three shapes selected by `alpha`:
//!
//! - `alpha == 0`: linear in decibels from 0 mB at the minimum distance down to the
//!   minimum level at the maximum distance.
//! - `alpha > 0`: blend towards a curve that is linear in amplitude.
//! - `alpha < 0`: blend towards the inverse distance law. `alpha == -1` matches the
//!   rolloff of native positional APIs.
//!
//! The same functions drive manual rolloff in the core and the control points handed
//! to backends with curve-based rolloff.

/// Lowest level produced by the rolloff, in mB.
pub const MB_MIN: i32 = -10000;
/// Highest level produced by the rolloff, in mB.
pub const MB_MAX: i32 = 0;

/// Converts mB to a linear amplitude ratio, clamped to [0, 1].
pub fn mb_to_gain(mb: i32) -> f32 {
    (10f64.powf(mb as f64 / 2000.0) as f32).clamp(0.0, 1.0)
}

/// Converts a linear amplitude ratio to mB, floored at [`MB_MIN`].
pub fn gain_to_mb(gain: f32) -> i32 {
    if gain <= 0.0 {
        return MB_MIN;
    }
    ((2000.0 * (gain as f64).log10()).round() as i32).clamp(MB_MIN, MB_MAX)
}

/// Attenuated level in mB for a source at squared distance `sqrdist`.
///
/// `volume_mb` is the unattenuated level. Up to `dist_min` it is returned unchanged,
/// beyond `dist_max` the result is `mb_min`; in between the blended curve is added and
/// the result clamped to `[mb_min, mb_max]`.
pub fn manual_rolloff_mb(
    volume_mb: i32,
    mb_min: i32,
    mb_max: i32,
    alpha: f64,
    sqrdist: f32,
    dist_min: f32,
    dist_max: f32,
) -> i32 {
    if sqrdist <= dist_min * dist_min {
        return volume_mb;
    }
    if sqrdist > dist_max * dist_max {
        return mb_min;
    }
    if dist_max <= dist_min {
        return mb_min;
    }

    let dist = (sqrdist as f64).sqrt();
    let dist_min = dist_min as f64;
    let dist_max = dist_max as f64;

    // Linear descent on the dB scale.
    let db1 = mb_min as f64 * (dist - dist_min) / (dist_max - dist_min);

    let attenuation = if alpha == 0.0 {
        db1 as i32
    } else if alpha > 0.0 {
        let amp2 = 0.0001 + 0.9999 * (dist_max - dist) / (dist_max - dist_min);
        let db2 = 2000.0 * amp2.log10();
        ((1.0 - alpha) * db1 + alpha * db2) as i32
    } else {
        let amp3 = if dist > 0.0 { dist_min / dist } else { 1.0 };
        let db3 = 2000.0 * amp3.log10();
        ((1.0 + alpha) * db1 - alpha * db3) as i32
    };

    (volume_mb + attenuation).clamp(mb_min, mb_max)
}

/// Linear gain in [0, 1] for a source at squared distance `sqrdist`.
///
/// `alpha` is clamped to [-1, 1]. Beyond `dist_max` the gain is the floor
/// `mb_to_gain(MB_MIN)`.
pub fn manual_rolloff_gain(alpha: f64, sqrdist: f32, dist_min: f32, dist_max: f32) -> f32 {
    let alpha = alpha.clamp(-1.0, 1.0);
    let mb = manual_rolloff_mb(MB_MAX, MB_MIN, MB_MAX, alpha, sqrdist, dist_min, dist_max);
    mb_to_gain(mb)
}

/// One control point of a distance curve, distance normalized to [0, 1] over
/// `[min_distance, max_distance]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub distance: f32,
    pub gain: f32,
}

/// Piecewise-linear rolloff curve for backends that attenuate natively.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceCurve {
    pub min_distance: f32,
    pub max_distance: f32,
    pub points: Vec<CurvePoint>,
}

impl DistanceCurve {
    /// Samples the manual rolloff at `point_count` (at least 2) evenly spaced distances.
    pub fn sample(alpha: f64, min_distance: f32, max_distance: f32, point_count: usize) -> Self {
        let point_count = point_count.max(2);
        let span = (max_distance - min_distance).max(0.0);
        let points = (0..point_count)
            .map(|i| {
                let t = i as f32 / (point_count - 1) as f32;
                let dist = min_distance + span * t;
                let gain = if i == point_count - 1 {
                    mb_to_gain(MB_MIN)
                } else {
                    manual_rolloff_gain(alpha, dist * dist, min_distance, max_distance)
                };
                CurvePoint { distance: t, gain }
            })
            .collect();

        Self {
            min_distance,
            max_distance,
            points,
        }
    }

    /// Gain at an absolute distance, interpolating between control points.
    pub fn evaluate(&self, distance: f32) -> f32 {
        if distance <= self.min_distance {
            return 1.0;
        }
        let Some(last) = self.points.last() else {
            return 1.0;
        };
        if distance >= self.max_distance || self.max_distance <= self.min_distance {
            return last.gain;
        }

        let t = (distance - self.min_distance) / (self.max_distance - self.min_distance);
        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t <= b.distance {
                let w = (t - a.distance) / (b.distance - a.distance).max(f32::EPSILON);
                return a.gain + (b.gain - a.gain) * w;
            }
        }
        last.gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: f32 = 1.0;
    const MAX: f32 = 20.0;

    fn gain_at(alpha: f64, dist: f32) -> f32 {
        manual_rolloff_gain(alpha, dist * dist, MIN, MAX)
    }

    #[test]
    fn full_gain_inside_min_distance() {
        for alpha in [-1.0, -0.5, 0.0, 0.5, 1.0] {
            assert_eq!(gain_at(alpha, 0.0), 1.0);
            assert_eq!(gain_at(alpha, 0.5), 1.0);
        }
    }

    #[test]
    fn equal_bounds_keep_full_gain_at_the_bound() {
        for alpha in [-1.0, 0.0, 1.0] {
            assert_eq!(manual_rolloff_gain(alpha, 25.0, 5.0, 5.0), 1.0);
            assert!(manual_rolloff_gain(alpha, 25.5, 5.0, 5.0) <= 1e-5 + f32::EPSILON);
        }
    }

    #[test]
    fn floor_beyond_max_distance() {
        for alpha in [-1.0, 0.0, 1.0] {
            let g = gain_at(alpha, 25.0);
            assert!(g <= 1e-5 + f32::EPSILON, "alpha {alpha}: {g}");
        }
    }

    #[test]
    fn gain_is_monotonic_in_distance() {
        for alpha in [-1.0, -0.7, -0.2, 0.0, 0.3, 0.8, 1.0] {
            let mut previous = 1.0f32;
            let mut dist = MIN;
            while dist <= MAX {
                let g = gain_at(alpha, dist);
                assert!(
                    g <= previous + 1e-6,
                    "alpha {alpha} at {dist}: {g} > {previous}"
                );
                assert!((0.0..=1.0).contains(&g));
                previous = g;
                dist += 0.25;
            }
        }
    }

    #[test]
    fn alpha_minus_one_is_inverse_distance() {
        for dist in [2.0f32, 5.0, 10.0, 15.0] {
            let expected = MIN / dist;
            let g = gain_at(-1.0, dist);
            // Truncating to whole mB costs about 0.115% of the level.
            assert!((g - expected).abs() <= expected * 0.002, "{dist}: {g} vs {expected}");
        }
    }

    #[test]
    fn alpha_zero_is_linear_in_decibels() {
        let mid = (MIN + MAX) / 2.0;
        let mb = manual_rolloff_mb(0, MB_MIN, MB_MAX, 0.0, mid * mid, MIN, MAX);
        assert_eq!(mb, MB_MIN / 2);
        let quarter = MIN + (MAX - MIN) / 4.0;
        let mb = manual_rolloff_mb(0, MB_MIN, MB_MAX, 0.0, quarter * quarter, MIN, MAX);
        assert_eq!(mb, MB_MIN / 4);
    }

    #[test]
    fn positive_alpha_blends_toward_linear_amplitude() {
        // Halfway between the bounds: db1 = -5000 mB, amp2 = 0.0001 + 0.9999 * 0.5.
        let mid = (MIN + MAX) / 2.0;
        let db2 = 2000.0 * (0.0001f64 + 0.9999 * 0.5).log10();
        let expected = (0.5 * -5000.0 + 0.5 * db2) as i32;
        assert_eq!(expected, -2800);

        let mb = manual_rolloff_mb(0, MB_MIN, MB_MAX, 0.5, mid * mid, MIN, MAX);
        assert_eq!(mb, expected);
        assert!((gain_at(0.5, mid) - mb_to_gain(expected)).abs() < 1e-6);
    }

    #[test]
    fn branches_meet_at_alpha_zero() {
        for dist in [1.5f32, 4.0, 9.0, 16.0, 19.5] {
            let at_zero = gain_at(0.0, dist);
            let above = gain_at(1e-9, dist);
            let below = gain_at(-1e-9, dist);
            assert!((at_zero - above).abs() < 1e-3, "alpha 0+ at {dist}");
            assert!((at_zero - below).abs() < 1e-3, "alpha 0- at {dist}");
        }
    }

    #[test]
    fn alpha_is_clamped() {
        assert_eq!(gain_at(-5.0, 10.0), gain_at(-1.0, 10.0));
        assert_eq!(gain_at(5.0, 10.0), gain_at(1.0, 10.0));
    }

    #[test]
    fn decibel_conversions() {
        assert_eq!(mb_to_gain(0), 1.0);
        assert!((mb_to_gain(-2000) - 0.1).abs() < 1e-6);
        assert_eq!(mb_to_gain(500), 1.0);
        assert_eq!(gain_to_mb(1.0), 0);
        assert_eq!(gain_to_mb(0.0), MB_MIN);
        assert_eq!(gain_to_mb(0.1), -2000);
    }

    #[test]
    fn curve_tracks_manual_rolloff() {
        let curve = DistanceCurve::sample(-1.0, MIN, MAX, 64);
        assert_eq!(curve.points.len(), 64);
        assert_eq!(curve.evaluate(0.5), 1.0);
        assert!(curve.evaluate(30.0) <= 1e-4);
        for dist in [2.0f32, 6.0, 12.0] {
            let exact = gain_at(-1.0, dist);
            assert!((curve.evaluate(dist) - exact).abs() < 0.02);
        }
    }
}
