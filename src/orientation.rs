//! Listener/source orientation math.
//!
//! The reference frame is right-handed with `-Z` forward, `+X` right and `+Y`
//! up. Azimuth rotates from forward toward right; elevation tilts toward up.

use std::f32::consts::PI;

use glam::Vec3;

/// Narrowest beam the gain curve accepts, in degrees.
pub const MIN_BEAM_WIDTH_DEG: f32 = 5.0;
/// Widest beam the gain curve accepts, in degrees.
pub const MAX_BEAM_WIDTH_DEG: f32 = 180.0;

/// Direction the listener faces at azimuth 0, elevation 0.
pub const FORWARD: Vec3 = Vec3::NEG_Z;

/// Unit vector pointing at `(azimuth_deg, elevation_deg)`.
pub fn spherical_to_direction(azimuth_deg: f32, elevation_deg: f32) -> Vec3 {
    let az = azimuth_deg.to_radians();
    let el = elevation_deg.to_radians();
    let (sin_az, cos_az) = az.sin_cos();
    let (sin_el, cos_el) = el.sin_cos();
    Vec3::new(sin_az * cos_el, sin_el, -cos_az * cos_el).normalize_or(FORWARD)
}

/// Angle between two directions in radians, in `[0, π]`.
///
/// Degenerate (zero or non-finite) vectors are treated as [`FORWARD`].
pub fn angle_between(a: Vec3, b: Vec3) -> f32 {
    let a = a.normalize_or(FORWARD);
    let b = b.normalize_or(FORWARD);
    a.dot(b).clamp(-1.0, 1.0).acos()
}

/// Raised-cosine beam weight for a source `theta_rad` away from the listener's
/// facing direction.
///
/// 1 on axis, falling smoothly to 0 at `beam_width_deg` (clamped to
/// [`MIN_BEAM_WIDTH_DEG`]..=[`MAX_BEAM_WIDTH_DEG`]) and 0 beyond it.
pub fn directional_gain(theta_rad: f32, beam_width_deg: f32) -> f32 {
    let width = clamp_beam_width(beam_width_deg).to_radians();
    let theta = theta_rad.abs();
    if !theta.is_finite() || theta >= width {
        return 0.0;
    }
    0.5 * (1.0 + (PI * theta / width).cos())
}

/// Clamp a beam width into the supported range. Non-finite widths fall back to
/// the widest beam.
#[inline]
pub fn clamp_beam_width(beam_width_deg: f32) -> f32 {
    if beam_width_deg.is_nan() {
        return MAX_BEAM_WIDTH_DEG;
    }
    beam_width_deg.clamp(MIN_BEAM_WIDTH_DEG, MAX_BEAM_WIDTH_DEG)
}

/// Smallest absolute difference between two headings, in degrees `[0, 180]`.
pub fn angular_distance_deg(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn origin_is_exactly_forward() {
        assert_eq!(spherical_to_direction(0.0, 0.0), FORWARD);
    }

    #[test]
    fn directions_are_unit_length() {
        for az in (-180..=180).step_by(15) {
            for el in (-90..=90).step_by(15) {
                let v = spherical_to_direction(az as f32, el as f32);
                assert_abs_diff_eq!(v.length(), 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn positive_azimuth_turns_right() {
        let v = spherical_to_direction(90.0, 0.0);
        assert_abs_diff_eq!(v.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v.z, 0.0, epsilon = 1e-6);

        let up = spherical_to_direction(0.0, 90.0);
        assert_abs_diff_eq!(up.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn angle_between_clamps_overshoot() {
        let a = Vec3::new(0.3, 0.4, 0.5);
        let angle = angle_between(a, a * 3.0);
        assert!(!angle.is_nan());
        assert_abs_diff_eq!(angle, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(angle_between(Vec3::X, -Vec3::X), PI, epsilon = 1e-6);
        assert_abs_diff_eq!(angle_between(Vec3::X, Vec3::Y), PI / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn gain_is_one_on_axis_for_every_width() {
        for width in [5.0, 30.0, 60.0, 120.0, 180.0] {
            assert_eq!(directional_gain(0.0, width), 1.0);
        }
    }

    #[test]
    fn gain_is_zero_at_and_beyond_width() {
        for width in [5.0f32, 60.0, 180.0] {
            let w = width.to_radians();
            assert_eq!(directional_gain(w, width), 0.0);
            assert_eq!(directional_gain(w * 1.5, width), 0.0);
        }
        assert_eq!(directional_gain(90f32.to_radians(), 60.0), 0.0);
    }

    #[test]
    fn gain_falls_monotonically_inside_beam() {
        let width = 60.0f32;
        let mut last = 1.0;
        for step in 0..=600 {
            let theta = (step as f32 / 10.0).to_radians();
            let g = directional_gain(theta, width);
            assert!(g <= last, "gain rose at step {}", step);
            assert!((0.0..=1.0).contains(&g));
            last = g;
        }
        assert_abs_diff_eq!(directional_gain(30f32.to_radians(), 60.0), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn beam_width_is_clamped() {
        assert_eq!(directional_gain(3f32.to_radians(), 1.0), directional_gain(3f32.to_radians(), 5.0));
        assert_eq!(clamp_beam_width(500.0), MAX_BEAM_WIDTH_DEG);
        assert_eq!(clamp_beam_width(f32::NAN), MAX_BEAM_WIDTH_DEG);
    }

    #[test]
    fn angular_distance_wraps() {
        assert_eq!(angular_distance_deg(350.0, 10.0), 20.0);
        assert_eq!(angular_distance_deg(-170.0, 170.0), 20.0);
        assert_eq!(angular_distance_deg(0.0, 180.0), 180.0);
    }
}
