//! Quaternion interpolation helpers on top of [`glam::Quat`].
//!
//! glam already covers the Hamilton product, conjugation, normalization and
//! vector rotation. This module adds the pieces the motion core needs with
//! exact double-cover semantics: hemisphere alignment ([`aligned`]) and the
//! two SLERP flavours ([`slerp_shortest`], [`slerp_signed`]).
//!
//! None of these operations fail. Degenerate inputs (zero-magnitude, non-unit
//! quaternions) produce degenerate output; NaN propagates visibly rather than
//! being masked.

use glam::Quat;

/// Dot-product threshold above which two quaternions are treated as parallel
/// and the spherical formula is replaced by a normalized linear blend.
pub const PARALLEL_DOT_THRESHOLD: f32 = 0.999_999_95;

/// Returns `q` or `-q`, whichever lies on the same hemisphere as `reference`.
///
/// `q` and `-q` encode the same rotation; interpolation and finite
/// differencing must not jump across that seam.
#[inline]
pub fn aligned(reference: Quat, q: Quat) -> Quat {
    if reference.dot(q) < 0.0 { -q } else { q }
}

/// Spherical linear interpolation along the shorter great-circle arc.
///
/// `mu` is clamped by convention to `[0, 1]` by callers; `0` yields `from`
/// and `1` yields `to` (up to sign). When the inputs are nearly parallel the
/// spherical weights degenerate, so the blend falls back to a component-wise
/// lerp followed by renormalization.
pub fn slerp_shortest(from: Quat, to: Quat, mu: f32) -> Quat {
    slerp_arc(from, aligned(from, to), mu)
}

/// SLERP where the sign of `mu` selects the arc.
///
/// `mu >= 0` behaves exactly like [`slerp_shortest`]. `mu < 0` traverses the
/// *long* way around by `|mu|`, for callers that need to approach an
/// orientation from the other side.
pub fn slerp_signed(from: Quat, to: Quat, mu: f32) -> Quat {
    if mu >= 0.0 {
        slerp_shortest(from, to, mu)
    } else {
        let long = if from.dot(to) > 0.0 { -to } else { to };
        slerp_arc(from, long, -mu)
    }
}

/// Interpolates along the arc between `from` and `to` exactly as given, with
/// no hemisphere correction. Callers pick the arc by choosing the sign of
/// `to`.
fn slerp_arc(from: Quat, to: Quat, mu: f32) -> Quat {
    let dot = from.dot(to);
    if dot.abs() > PARALLEL_DOT_THRESHOLD {
        return (from * (1.0 - mu) + to * mu).normalize();
    }

    let theta = dot.clamp(-1.0, 1.0).acos();
    let sin_theta = theta.sin();
    let w_from = ((1.0 - mu) * theta).sin() / sin_theta;
    let w_to = (mu * theta).sin() / sin_theta;
    from * w_from + to * w_to
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat3, Vec3};
    use std::f32::consts::{FRAC_PI_2, PI};

    fn assert_quat_eq(a: Quat, b: Quat) {
        let b = aligned(a, b);
        assert!(
            a.abs_diff_eq(b, 1e-5),
            "expected {b:?}, got {a:?} (component diff too large)"
        );
    }

    #[test]
    fn slerp_endpoints_are_exact() {
        let q1 = Quat::from_axis_angle(Vec3::X, 0.3);
        let q2 = Quat::from_axis_angle(Vec3::Y, 1.2);

        assert_quat_eq(slerp_shortest(q1, q2, 0.0), q1);
        assert_quat_eq(slerp_shortest(q1, q2, 1.0), q2);
    }

    #[test]
    fn slerp_midpoint_halves_the_rotation() {
        let q1 = Quat::IDENTITY;
        let q2 = Quat::from_axis_angle(Vec3::Z, FRAC_PI_2);

        let mid = slerp_shortest(q1, q2, 0.5);
        assert_quat_eq(mid, Quat::from_axis_angle(Vec3::Z, FRAC_PI_2 / 2.0));
    }

    #[test]
    fn slerp_takes_the_short_arc_across_the_double_cover() {
        let q1 = Quat::from_axis_angle(Vec3::Y, 0.2);
        let q2 = -Quat::from_axis_angle(Vec3::Y, 0.4);

        // The negated target is the same rotation; the midpoint must stay on
        // the short arc between 0.2 and 0.4 rad, not swing around the sphere.
        let mid = slerp_shortest(q1, q2, 0.5);
        assert_quat_eq(mid, Quat::from_axis_angle(Vec3::Y, 0.3));
    }

    #[test]
    fn negative_mu_traverses_the_long_arc() {
        let q1 = Quat::IDENTITY;
        let q2 = Quat::from_axis_angle(Vec3::Z, FRAC_PI_2);

        // Long path from identity to +90° goes through -135° at |mu| = 0.5:
        // the remaining arc is 360° - 90° = 270°, traversed backwards.
        let mid = slerp_signed(q1, q2, -0.5);
        assert_quat_eq(mid, Quat::from_axis_angle(Vec3::Z, -3.0 * PI / 4.0));
    }

    #[test]
    fn near_parallel_inputs_fall_back_to_normalized_lerp() {
        let q1 = Quat::from_axis_angle(Vec3::X, 0.5);
        let q2 = Quat::from_axis_angle(Vec3::X, 0.5 + 1e-6);

        let mid = slerp_shortest(q1, q2, 0.5);
        assert!((mid.length() - 1.0).abs() < 1e-6);
        assert_quat_eq(mid, q1);
    }

    #[test]
    fn rotation_matrix_round_trip_recovers_up_to_sign() {
        let samples = [
            Quat::from_axis_angle(Vec3::X, 0.7),
            Quat::from_axis_angle(Vec3::new(1.0, 2.0, -0.5).normalize(), 2.9),
            Quat::from_axis_angle(Vec3::Z, -PI + 0.01),
            Quat::from_axis_angle(Vec3::Y, PI - 1e-3),
        ];

        for q in samples {
            let recovered = Quat::from_mat3(&Mat3::from_quat(q));
            assert_quat_eq(recovered, q);
        }
    }
}
