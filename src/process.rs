//! Execution cursor: the per-robot bookkeeping for a running program.

use crate::program::ProgramId;
use serde::{Deserialize, Serialize};

/// Which of the two simulated arms a cursor belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RobotId {
    A,
    B,
}

impl RobotId {
    /// The other arm.
    pub fn other(self) -> RobotId {
        match self {
            RobotId::A => RobotId::B,
            RobotId::B => RobotId::A,
        }
    }
}

/// Lifecycle state of a running process.
///
/// `Start -> (Inst | MotionWait) -> Next -> {Inst | Done | Fault}`, with
/// `Done` and `Fault` terminal until the engine is re-armed via
/// [`ExecEngine::start`](crate::engine::ExecEngine::start).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecState {
    /// Freshly armed; computes the default `next` index on the first step.
    Start,
    /// Dispatch the instruction under the cursor.
    Inst,
    /// Suspended until the actuator reports the arm has stopped moving.
    MotionWait,
    /// Advance (or fault) the cursor for the following instruction.
    Next,
    /// Ran to completion, or halted.
    Done,
    /// Stopped on an error; see the engine's fault message.
    Fault,
}

/// How far a started execution runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecMode {
    /// Run until the program (and call chain) completes.
    Full,
    /// Execute exactly one instruction, then stop.
    Single,
    /// Re-execute the motion instruction immediately preceding the cursor,
    /// then stop. Only valid when that line is an uncommented motion.
    Backward,
}

/// The execution cursor over one program.
///
/// A handful of integers and enums: `Call` clones the active
/// process onto the call stack, so it must stay cheap to copy. Programs are
/// referenced by [`ProgramId`], never duplicated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Process {
    /// The arm this cursor drives.
    pub robot: RobotId,

    /// Index of the program being executed in the host's program bank.
    pub program: ProgramId,

    /// Index of the instruction currently under the cursor.
    pub current: i32,

    /// Index the cursor moves to at the `Next` transition. `-1` is the
    /// poison value that forces a fault.
    pub next: i32,

    pub state: ExecState,
    pub mode: ExecMode,
}

impl Process {
    /// A fresh cursor at `start`, armed in [`ExecState::Start`].
    pub fn new(robot: RobotId, program: ProgramId, start: usize, mode: ExecMode) -> Self {
        Self {
            robot,
            program,
            current: start as i32,
            next: start as i32,
            state: ExecState::Start,
            mode,
        }
    }

    /// Whether this cursor has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ExecState::Done | ExecState::Fault)
    }
}
