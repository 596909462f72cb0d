//! Forward and inverse kinematics for a six-joint serial arm.
//!
//! Forward kinematics is a capability ([`ArmKinematics`]) so hosts can plug in
//! their own segment-chain model; [`SerialArm`] is the built-in rotary-joint
//! chain. Inverse kinematics ([`IkSolver`]) is an iterative damped Newton
//! method over a numeric 7x6 Jacobian (3 translational rows + 4 quaternion
//! component rows), inverted with a Moore-Penrose pseudo-inverse.

use crate::math::aligned;
use glam::{Quat, Vec3};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Number of revolute joints in the arm chain.
pub const JOINT_COUNT: usize = 6;

/// One angle per joint, in radians.
pub type JointAngles = [f32; JOINT_COUNT];

/// An immutable snapshot of arm pose: tool-frame position and orientation
/// plus the joint configuration that produced (or reaches) it.
///
/// Produced by forward kinematics and by the IK solver; the execution engine
/// never mutates one in place.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Point {
    /// Tool-frame position in world space.
    pub position: Vec3,

    /// Tool-frame orientation in world space.
    pub orientation: Quat,

    /// Joint angles (radians) associated with this pose.
    pub angles: JointAngles,
}

impl Point {
    pub fn new(position: Vec3, orientation: Quat, angles: JointAngles) -> Self {
        Self {
            position,
            orientation,
            angles,
        }
    }
}

/// Forward kinematics capability: joint angles to tool-frame pose.
///
/// Implementations must be pure — same angles, same [`Point`] — because the
/// IK solver differentiates them numerically.
pub trait ArmKinematics {
    fn forward(&self, angles: &JointAngles) -> Point;
}

/// One link of a serial chain: a rigid offset followed by a revolute joint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ArmSegment {
    /// Translation from the previous joint to this joint, expressed in the
    /// previous joint's frame.
    pub offset: Vec3,

    /// Rotation axis of this joint in its own local frame.
    pub axis: Vec3,
}

impl ArmSegment {
    pub fn new(offset: Vec3, axis: Vec3) -> Self {
        Self { offset, axis }
    }
}

/// A six-revolute-joint serial arm with a fixed tool offset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerialArm {
    /// The joint chain, base to wrist.
    pub segments: [ArmSegment; JOINT_COUNT],

    /// Translation from the last joint to the tool frame, in the last
    /// joint's frame.
    pub tool_offset: Vec3,
}

impl SerialArm {
    pub fn new(segments: [ArmSegment; JOINT_COUNT], tool_offset: Vec3) -> Self {
        Self {
            segments,
            tool_offset,
        }
    }

    /// A generic articulated-arm layout (vertical base yaw, two pitch links,
    /// roll/pitch/roll wrist) useful as a default and for tests.
    pub fn articulated(link_length: f32) -> Self {
        let l = link_length;
        Self::new(
            [
                ArmSegment::new(Vec3::ZERO, Vec3::Y),
                ArmSegment::new(Vec3::new(0.0, l * 0.5, 0.0), Vec3::X),
                ArmSegment::new(Vec3::new(0.0, l, 0.0), Vec3::X),
                ArmSegment::new(Vec3::new(0.0, l, 0.0), Vec3::Y),
                ArmSegment::new(Vec3::new(0.0, l * 0.5, 0.0), Vec3::X),
                ArmSegment::new(Vec3::new(0.0, l * 0.25, 0.0), Vec3::Y),
            ],
            Vec3::new(0.0, l * 0.25, 0.0),
        )
    }
}

impl ArmKinematics for SerialArm {
    fn forward(&self, angles: &JointAngles) -> Point {
        let mut position = Vec3::ZERO;
        let mut rotation = Quat::IDENTITY;

        for (segment, &angle) in self.segments.iter().zip(angles.iter()) {
            position += rotation * segment.offset;
            rotation = (rotation * Quat::from_axis_angle(segment.axis, angle)).normalize();
        }
        position += rotation * self.tool_offset;

        Point::new(position, rotation, *angles)
    }
}

/// Wraps an angle into `[0, 2π)`.
#[inline]
pub fn wrap_angle(angle: f32) -> f32 {
    angle.rem_euclid(TAU)
}

/// Tuning knobs for the iterative IK solve.
#[derive(Clone, Copy, Debug)]
pub struct IkConfig {
    /// Iteration budget before the solve is declared failed.
    pub max_iterations: usize,

    /// Finite-difference perturbation (radians) for the numeric Jacobian.
    pub jacobian_offset: f32,

    /// Singular-value cutoff for the pseudo-inverse.
    pub svd_epsilon: f32,
}

impl Default for IkConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            jacobian_offset: 1.0f32.to_radians(),
            svd_epsilon: 1e-6,
        }
    }
}

/// Iterative inverse-kinematics solver.
///
/// Convergence precision is coupled to the arm's configured motion speed:
/// positional error must drop below `speed / 100` and quaternion-component
/// error below `0.00005 * speed`. A faster-moving arm tolerates a looser
/// solve.
///
/// This is a descent method, not a closed-form solve: for a reachable pose
/// with a reasonable seed it converges in well under the iteration cap, but
/// the result is whichever local solution the iteration drifts to.
#[derive(Clone, Copy, Debug, Default)]
pub struct IkSolver {
    config: IkConfig,
}

impl IkSolver {
    pub fn new(config: IkConfig) -> Self {
        Self { config }
    }

    /// Solves for joint angles that place the tool frame at `target`'s
    /// position and orientation, starting from `seed`.
    ///
    /// Returns `None` when the iteration budget is exhausted without
    /// convergence; the partial iterate is discarded and callers keep their
    /// previous joint angles. A seed already within tolerance is returned
    /// unchanged.
    pub fn solve(
        &self,
        arm: &dyn ArmKinematics,
        seed: &JointAngles,
        target: &Point,
        speed: u8,
    ) -> Option<JointAngles> {
        let position_tolerance = f32::from(speed) / 100.0;
        let rotation_tolerance = 0.00005 * f32::from(speed);

        let mut angles = *seed;
        for iteration in 0..self.config.max_iterations {
            let current = arm.forward(&angles);

            // Keep the target on the current orientation's hemisphere so the
            // component-wise error measures the actual rotation gap.
            let target_orientation = aligned(current.orientation, target.orientation);
            let position_error = target.position - current.position;
            let rotation_error = [
                target_orientation.x - current.orientation.x,
                target_orientation.y - current.orientation.y,
                target_orientation.z - current.orientation.z,
                target_orientation.w - current.orientation.w,
            ];
            let rotation_magnitude = rotation_error.iter().map(|e| e * e).sum::<f32>().sqrt();

            if position_error.length() < position_tolerance
                && rotation_magnitude < rotation_tolerance
            {
                log::debug!("ik converged after {iteration} iterations");
                return Some(angles);
            }

            let jacobian = self.jacobian(arm, &angles, &current);
            let pseudo_inverse = jacobian.pseudo_inverse(self.config.svd_epsilon).ok()?;

            let error = DVector::from_column_slice(&[
                position_error.x,
                position_error.y,
                position_error.z,
                rotation_error[0],
                rotation_error[1],
                rotation_error[2],
                rotation_error[3],
            ]);
            let delta = &pseudo_inverse * &error;

            for (joint, angle) in angles.iter_mut().enumerate() {
                *angle = wrap_angle(*angle + delta[joint]);
            }
        }

        log::debug!(
            "ik exhausted {} iterations without converging",
            self.config.max_iterations
        );
        None
    }

    /// Numeric 7x6 Jacobian at `angles`: one-sided finite difference with a
    /// fixed perturbation per joint. Perturbed orientations are hemisphere-
    /// aligned to `current` before differencing.
    fn jacobian(
        &self,
        arm: &dyn ArmKinematics,
        angles: &JointAngles,
        current: &Point,
    ) -> DMatrix<f32> {
        let h = self.config.jacobian_offset;
        let mut jacobian = DMatrix::zeros(7, JOINT_COUNT);

        for joint in 0..JOINT_COUNT {
            let mut perturbed = *angles;
            perturbed[joint] += h;

            let probe = arm.forward(&perturbed);
            let orientation = aligned(current.orientation, probe.orientation);

            jacobian[(0, joint)] = (probe.position.x - current.position.x) / h;
            jacobian[(1, joint)] = (probe.position.y - current.position.y) / h;
            jacobian[(2, joint)] = (probe.position.z - current.position.z) / h;
            jacobian[(3, joint)] = (orientation.x - current.orientation.x) / h;
            jacobian[(4, joint)] = (orientation.y - current.orientation.y) / h;
            jacobian[(5, joint)] = (orientation.z - current.orientation.z) / h;
            jacobian[(6, joint)] = (orientation.w - current.orientation.w) / h;
        }

        jacobian
    }
}
