//! Pendant program model: instructions, taught positions, and label index.
//!
//! A [`Program`] is an ordered sequence of [`ProgramLine`]s plus a side table
//! of taught [`Point`]s (for motion instructions that reference a stored
//! position rather than carrying one inline) and a label index rebuilt on
//! every structural edit. Instructions are only ever identified by integer
//! index — indices are what `Jump`/`Call` targets serialize — so the index of
//! a line must stay stable for the duration of one execution step.

use crate::kinematics::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier carried by `Label` instructions and referenced by `Jump`.
pub type LabelId = u16;

/// Index of a program within the host's program bank.
pub type ProgramId = usize;

/// Host-opaque handle to an expression; the core never inspects it, only
/// hands it back through [`RobotHost::evaluate`](crate::engine::RobotHost::evaluate).
pub type ExprId = u32;

/// Index of a host-owned data register.
pub type RegisterId = usize;

/// Index into a program's taught-position table.
pub type PositionIdx = usize;

/// How a motion instruction interpolates toward its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionKind {
    /// Interpolate in joint space toward the taught joint configuration.
    Joint,
    /// Move the tool frame along a straight line (solved via IK).
    Linear,
    /// Arc through a via position to the target (both solved via IK).
    Circular,
}

/// Which of the robot's frame tables a frame index selects into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Tool,
    User,
}

/// Which arm a `Call` instruction hands control to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// The arm already executing the caller.
    SameArm,
    /// The other arm; only valid when dual-arm mode is enabled.
    OtherArm,
}

/// A motion target: either an index into the program's taught positions or a
/// pose carried inline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum PositionRef {
    Stored(PositionIdx),
    Inline(Point),
}

/// One pendant instruction.
///
/// A closed sum type matched exhaustively by the execution engine, so adding
/// a variant without handling it is a compile error rather than a silent
/// fall-through.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Instruction {
    /// Move the arm to a taught or inline pose. Spans multiple frames: the
    /// engine waits in `MotionWait` until the actuator reports completion.
    Motion {
        target: PositionRef,
        kind: MotionKind,
        /// Speed modifier in percent of the arm's configured speed.
        speed: u8,
        tool_frame: usize,
        user_frame: usize,
        /// Intermediate position for [`MotionKind::Circular`].
        via: Option<PositionRef>,
    },

    /// Switch an end-effector device on or off. Synchronous.
    Io { device: usize, on: bool },

    /// Select the active tool or user frame. Synchronous.
    FrameSelect { kind: FrameKind, index: usize },

    /// Redirect execution to the line carrying the matching `Label`.
    Jump { label: LabelId },

    /// Jump target; a no-op when executed.
    Label { id: LabelId },

    /// Invoke another program as a subroutine, optionally on the other arm.
    Call { target: CallTarget, program: ProgramId },

    /// Conditionally dispatch `body`, which must be a `Jump` or `Call`.
    /// A condition evaluating to `0` counts as true.
    If { condition: ExprId, body: Box<Instruction> },

    /// Multi-way branch: dispatch the first case whose match value equals
    /// the switch expression, else `default`, else fall through. Case bodies
    /// are restricted like `If` bodies.
    Select {
        switch: ExprId,
        cases: Vec<(i32, Instruction)>,
        default: Option<Box<Instruction>>,
    },

    /// Evaluate an expression and store the result in a host register.
    RegisterAssign { register: RegisterId, expression: ExprId },
}

/// An instruction plus its commented-out flag. Commented lines keep their
/// index but are skipped by the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgramLine {
    pub instruction: Instruction,
    pub commented: bool,
}

impl From<Instruction> for ProgramLine {
    fn from(instruction: Instruction) -> Self {
        Self {
            instruction,
            commented: false,
        }
    }
}

/// An ordered pendant program with taught positions and a label index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Program {
    /// Display name, owned by the host's persistence layer.
    pub name: String,

    lines: Vec<ProgramLine>,
    positions: HashMap<PositionIdx, Point>,
    labels: HashMap<LabelId, usize>,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of instructions. `len()` itself is a valid insertion point but
    /// not a valid execution index.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Bounds-checked lookup; `None` outside `[0, len)`.
    pub fn get(&self, index: usize) -> Option<&ProgramLine> {
        self.lines.get(index)
    }

    /// Appends an instruction at the end of the program.
    pub fn push(&mut self, instruction: Instruction) {
        self.lines.push(instruction.into());
        self.rebuild_labels();
    }

    /// Appends an instruction already marked as commented out.
    pub fn push_commented(&mut self, instruction: Instruction) {
        self.lines.push(ProgramLine {
            instruction,
            commented: true,
        });
        self.rebuild_labels();
    }

    /// Inserts an instruction at `index`, shifting later lines. `index` may
    /// equal `len()` to append. Out-of-range indices are ignored.
    pub fn insert(&mut self, index: usize, instruction: Instruction) {
        if index > self.lines.len() {
            return;
        }
        self.lines.insert(index, instruction.into());
        self.rebuild_labels();
    }

    /// Removes and returns the line at `index`, if any.
    pub fn remove(&mut self, index: usize) -> Option<ProgramLine> {
        if index >= self.lines.len() {
            return None;
        }
        let line = self.lines.remove(index);
        self.rebuild_labels();
        Some(line)
    }

    /// Sets the commented-out flag on the line at `index`.
    pub fn set_commented(&mut self, index: usize, commented: bool) {
        if let Some(line) = self.lines.get_mut(index) {
            line.commented = commented;
        }
    }

    /// Resolves a label id to the index of the line carrying it.
    pub fn resolve_label(&self, label: LabelId) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    /// Stores a taught position, replacing any previous point at `index`.
    pub fn set_position(&mut self, index: PositionIdx, point: Point) {
        self.positions.insert(index, point);
    }

    /// Looks up a taught position.
    pub fn position(&self, index: PositionIdx) -> Option<&Point> {
        self.positions.get(&index)
    }

    /// Removes a taught position, returning it if present.
    pub fn clear_position(&mut self, index: PositionIdx) -> Option<Point> {
        self.positions.remove(&index)
    }

    /// Recomputes the label-id-to-index map. Later duplicates of a label id
    /// win, matching last-edit semantics on the pendant.
    fn rebuild_labels(&mut self) {
        self.labels.clear();
        for (index, line) in self.lines.iter().enumerate() {
            if let Instruction::Label { id } = line.instruction {
                self.labels.insert(id, index);
            }
        }
    }
}
