//! # pendant-core
//!
//! A sovereign execution core for simulated articulated robot arms. It runs
//! pendant-style programs (motion, I/O, branching, subroutine calls) one state
//! transition per rendered frame, and solves inverse kinematics to turn taught
//! poses into joint angles.
//!
//! It decouples the *program* (instructions + taught positions) from the
//! *host* (rendering, motion actuation, expression registers), exposing an
//! [`ExecEngine`] that a frame loop drives via [`ExecEngine::step_once`] and a
//! [`RobotHost`] trait the host implements. Physical motion is modelled as a
//! suspension point: a motion instruction parks the engine in
//! [`ExecState::MotionWait`] until the host reports the arm has stopped.

pub mod engine;
pub mod kinematics;
pub mod math;
pub mod process;
pub mod program;

pub use engine::*;
pub use kinematics::*;
pub use math::*;
pub use process::*;
pub use program::*;
