//! Frame-driven program execution engine.
//!
//! The entry point is [`ExecEngine`]. Arm it with [`ExecEngine::start`], then
//! have the frame loop call [`ExecEngine::step_once`] while
//! [`ExecEngine::is_running`] — each call performs exactly one state
//! transition of the active [`Process`]. Everything the engine needs from the
//! surrounding application (actuation, I/O, expression registers) comes in
//! through the [`RobotHost`] trait, so the mutation boundary is visible at
//! the call site rather than hidden in a global.
//!
//! Motion instructions suspend the engine: after handing a [`MotionPlan`] to
//! the actuator the process sits in [`ExecState::MotionWait`] for as many
//! frames as the motion physically takes, polling [`RobotHost::in_motion`].
//!
//! Faults are coarse-grained and local to the running call chain: a poisoned
//! cursor (`next = -1`), an unresolved label, a disallowed cross-arm call, an
//! expression error or an actuator fault all park the process in
//! [`ExecState::Fault`] with a short message, and the host must re-arm
//! explicitly. Nothing is rolled back.

use crate::kinematics::{ArmKinematics, IkSolver, JointAngles, Point};
use crate::process::{ExecMode, ExecState, Process, RobotId};
use crate::program::{
    CallTarget, ExprId, FrameKind, Instruction, LabelId, MotionKind, PositionRef, Program,
    ProgramId, RegisterId,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error reported by the host's expression evaluator. The message is
/// preserved into the engine's fault message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("expression evaluation failed: {0}")]
pub struct EvalError(pub String);

/// A solved joint-space trajectory handed to the motion actuator.
///
/// Fire-and-forget from the engine's perspective: velocity ramping and
/// joint-limit clamping are the actuator's concern.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MotionPlan {
    pub kind: MotionKind,

    /// Joint configuration to move to.
    pub target: JointAngles,

    /// Intermediate configuration for circular motion.
    pub via: Option<JointAngles>,

    /// Speed modifier in percent of the arm's configured speed.
    pub speed: u8,

    pub tool_frame: usize,
    pub user_frame: usize,
}

/// Everything the engine consumes from its host, per arm.
///
/// The host owns the robots, the actuator, the frame loop, and the register
/// file; the engine only owns the cursor and the call stack.
pub trait RobotHost {
    /// Current joint angles of the arm; the IK seed for linear moves.
    fn joint_angles(&self, robot: RobotId) -> JointAngles;

    /// Forward kinematics of the arm.
    fn arm(&self, robot: RobotId) -> &dyn ArmKinematics;

    /// Configured jog/motion speed in percent (1..=100). Feeds the IK
    /// convergence tolerance.
    fn jog_speed(&self, robot: RobotId) -> u8;

    /// Whether the arm is still physically moving. Polled once per
    /// `MotionWait` frame.
    fn in_motion(&self, robot: RobotId) -> bool;

    /// Whether the actuator hit a fault during the last motion. Checked on
    /// the frame motion stops.
    fn motion_fault(&self, robot: RobotId) -> bool;

    /// Hands a solved trajectory to the actuator.
    fn begin_motion(&mut self, robot: RobotId, plan: MotionPlan);

    /// Stops any in-progress motion immediately.
    fn cancel_motion(&mut self, robot: RobotId);

    /// Switches an end-effector device on or off.
    fn set_end_effector(&mut self, robot: RobotId, device: usize, on: bool);

    /// Selects the arm's active tool or user frame.
    fn set_active_frame(&mut self, robot: RobotId, kind: FrameKind, index: usize);

    /// Evaluates a host-owned expression.
    fn evaluate(&mut self, expr: ExprId) -> Result<f32, EvalError>;

    /// Stores a value into a host data register.
    fn set_register(&mut self, register: RegisterId, value: f32);
}

/// The per-frame program execution engine.
///
/// Owns the active [`Process`] and the call stack exclusively. The active
/// arm identity is engine state too, updated atomically within a step when a
/// cross-arm `Call` (or the matching return) transfers control.
#[derive(Clone, Debug)]
pub struct ExecEngine {
    active: Option<Process>,
    call_stack: Vec<Process>,
    active_robot: RobotId,
    dual_arm: bool,
    fault_message: Option<String>,
    solver: IkSolver,
}

impl ExecEngine {
    /// Creates an idle engine driving `active_robot`, single-arm mode.
    pub fn new(active_robot: RobotId) -> Self {
        Self {
            active: None,
            call_stack: Vec::new(),
            active_robot,
            dual_arm: false,
            fault_message: None,
            solver: IkSolver::default(),
        }
    }

    /// Replaces the IK solver configuration (builder pattern).
    pub fn with_solver(mut self, solver: IkSolver) -> Self {
        self.solver = solver;
        self
    }

    /// Enables or disables cross-arm calls.
    pub fn set_dual_arm(&mut self, enabled: bool) {
        self.dual_arm = enabled;
    }

    /// The arm currently under program control.
    pub fn active_robot(&self) -> RobotId {
        self.active_robot
    }

    /// Whether there is a process that still wants stepping.
    pub fn is_running(&self) -> bool {
        self.active.is_some_and(|p| !p.is_terminal())
    }

    pub fn is_done(&self) -> bool {
        self.active.is_none_or(|p| p.state == ExecState::Done)
    }

    pub fn is_faulted(&self) -> bool {
        self.active.is_some_and(|p| p.state == ExecState::Fault)
    }

    /// Lifecycle state of the active process, if any.
    pub fn state(&self) -> Option<ExecState> {
        self.active.map(|p| p.state)
    }

    /// A copy of the active execution cursor, if any.
    pub fn process(&self) -> Option<Process> {
        self.active
    }

    /// Index of the instruction under the cursor, if a process is active.
    pub fn active_instruction_index(&self) -> Option<usize> {
        self.active.and_then(|p| usize::try_from(p.current).ok())
    }

    /// Depth of the subroutine call stack.
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// The short user-visible message for the last fault, if any.
    pub fn fault_message(&self) -> Option<&str> {
        self.fault_message.as_deref()
    }

    /// Arms the engine at `start_index` of `program`.
    ///
    /// Returns `false` without touching engine state when the request is
    /// invalid: unknown program, index past the last instruction, or a
    /// `Backward` start whose preceding line is not an uncommented motion
    /// instruction.
    pub fn start(
        &mut self,
        programs: &[Program],
        program: ProgramId,
        start_index: usize,
        mode: ExecMode,
    ) -> bool {
        let Some(target) = programs.get(program) else {
            return false;
        };

        let cursor = match mode {
            ExecMode::Backward => {
                // Backward re-executes the previous line, which must be a
                // live motion instruction.
                let Some(previous) = start_index.checked_sub(1) else {
                    return false;
                };
                match target.get(previous) {
                    Some(line)
                        if !line.commented
                            && matches!(line.instruction, Instruction::Motion { .. }) =>
                    {
                        previous
                    }
                    _ => return false,
                }
            }
            ExecMode::Full | ExecMode::Single => {
                if start_index >= target.len() {
                    return false;
                }
                start_index
            }
        };

        self.call_stack.clear();
        self.fault_message = None;
        self.active = Some(Process::new(self.active_robot, program, cursor, mode));
        true
    }

    /// Stops execution immediately: cancels any in-progress motion and
    /// forces the process to `Done`, discarding the instruction that was
    /// mid-dispatch. Side effects already applied are not rolled back.
    pub fn halt(&mut self, host: &mut dyn RobotHost) {
        if let Some(process) = self.active.as_mut() {
            host.cancel_motion(process.robot);
            process.state = ExecState::Done;
        }
        self.call_stack.clear();
    }

    /// Advances the state machine by exactly one transition. Call once per
    /// rendered frame while [`is_running`](Self::is_running).
    pub fn step_once(&mut self, programs: &[Program], host: &mut dyn RobotHost) {
        let Some(mut process) = self.active.take() else {
            return;
        };

        match process.state {
            ExecState::Start => {
                process.next = match process.mode {
                    ExecMode::Backward => process.current,
                    ExecMode::Full | ExecMode::Single => process.current + 1,
                };
                process.state = ExecState::Inst;
                self.active = Some(process);
            }
            ExecState::Inst => self.dispatch(process, programs, host),
            ExecState::MotionWait => {
                if !host.in_motion(process.robot) {
                    if host.motion_fault(process.robot) {
                        let message = "actuator reported a motion fault".to_string();
                        warn!("execution fault: {message}");
                        self.fault_message = Some(message);
                        process.state = ExecState::Fault;
                    } else {
                        process.state = ExecState::Next;
                    }
                }
                self.active = Some(process);
            }
            ExecState::Next => self.advance(process, programs),
            ExecState::Done | ExecState::Fault => {
                self.active = Some(process);
            }
        }
    }

    /// The `Inst` transition: fetch the line under the cursor and dispatch.
    fn dispatch(&mut self, mut process: Process, programs: &[Program], host: &mut dyn RobotHost) {
        // Default continuation; individual dispatches may override it.
        // Backward keeps the cursor where `Start` put it: it re-executes a
        // single motion line and stops.
        if !matches!(process.mode, ExecMode::Backward) {
            process.next = process.current + 1;
        }

        let Some(program) = programs.get(process.program) else {
            self.poison(&mut process, "active program does not exist");
            self.active = Some(process);
            return;
        };
        let Some(line) = program.get(process.current as usize) else {
            let msg = format!("no instruction at index {}", process.current);
            self.poison(&mut process, msg);
            self.active = Some(process);
            return;
        };

        if line.commented {
            process.state = ExecState::Next;
            self.active = Some(process);
            return;
        }

        let instruction = line.instruction.clone();
        match instruction {
            Instruction::Motion {
                target,
                kind,
                speed,
                tool_frame,
                user_frame,
                via,
            } => {
                match self.plan_motion(
                    &process, program, &*host, target, kind, speed, tool_frame, user_frame, via,
                ) {
                    Ok(plan) => {
                        host.begin_motion(process.robot, plan);
                        process.state = ExecState::MotionWait;
                    }
                    Err(message) => self.poison(&mut process, message),
                }
                self.active = Some(process);
            }
            Instruction::Io { device, on } => {
                host.set_end_effector(process.robot, device, on);
                process.state = ExecState::Next;
                self.active = Some(process);
            }
            Instruction::FrameSelect { kind, index } => {
                host.set_active_frame(process.robot, kind, index);
                process.state = ExecState::Next;
                self.active = Some(process);
            }
            Instruction::Label { .. } => {
                // Jump target only; executing it is a no-op.
                process.state = ExecState::Next;
                self.active = Some(process);
            }
            Instruction::Jump { label } => {
                self.dispatch_jump(&mut process, program, label);
                self.active = Some(process);
            }
            Instruction::Call {
                target,
                program: callee,
            } => self.dispatch_call(process, target, callee, programs),
            Instruction::If { condition, body } => match host.evaluate(condition) {
                // Pendant convention: a condition evaluating to 0 is true.
                Ok(value) if value == 0.0 => self.dispatch_branch(process, *body, program, programs),
                Ok(_) => {
                    process.state = ExecState::Next;
                    self.active = Some(process);
                }
                Err(error) => {
                    self.poison(&mut process, error.to_string());
                    self.active = Some(process);
                }
            },
            Instruction::Select {
                switch,
                cases,
                default,
            } => match host.evaluate(switch) {
                Ok(value) => {
                    let chosen = cases
                        .into_iter()
                        .find(|(matched, _)| *matched as f32 == value)
                        .map(|(_, body)| body)
                        .or_else(|| default.map(|body| *body));
                    match chosen {
                        Some(body) => self.dispatch_branch(process, body, program, programs),
                        None => {
                            process.state = ExecState::Next;
                            self.active = Some(process);
                        }
                    }
                }
                Err(error) => {
                    self.poison(&mut process, error.to_string());
                    self.active = Some(process);
                }
            },
            Instruction::RegisterAssign {
                register,
                expression,
            } => {
                match host.evaluate(expression) {
                    Ok(value) => {
                        host.set_register(register, value);
                        process.state = ExecState::Next;
                    }
                    Err(error) => self.poison(&mut process, error.to_string()),
                }
                self.active = Some(process);
            }
        }
    }

    /// Dispatches the sub-instruction of an `If` or `Select`. Only `Jump`
    /// and `Call` are legal there; anything else is a defined fault.
    fn dispatch_branch(
        &mut self,
        mut process: Process,
        body: Instruction,
        program: &Program,
        programs: &[Program],
    ) {
        match body {
            Instruction::Jump { label } => {
                self.dispatch_jump(&mut process, program, label);
                self.active = Some(process);
            }
            Instruction::Call {
                target,
                program: callee,
            } => self.dispatch_call(process, target, callee, programs),
            _ => {
                self.poison(&mut process, "branch body must be a jump or a call");
                self.active = Some(process);
            }
        }
    }

    fn dispatch_jump(&mut self, process: &mut Process, program: &Program, label: LabelId) {
        match program.resolve_label(label) {
            Some(index) => {
                process.next = index as i32;
                process.state = ExecState::Next;
            }
            None => self.poison(process, format!("label {label} is not defined")),
        }
    }

    /// Pushes the caller (which resumes at its already-computed `next`) and
    /// activates a fresh cursor at index 0 of the callee, transferring the
    /// active arm when the call crosses arms.
    fn dispatch_call(
        &mut self,
        mut process: Process,
        target: CallTarget,
        callee: ProgramId,
        programs: &[Program],
    ) {
        let callee_robot = match target {
            CallTarget::SameArm => process.robot,
            CallTarget::OtherArm => {
                if !self.dual_arm {
                    self.poison(&mut process, "cross-arm call while dual-arm mode is disabled");
                    self.active = Some(process);
                    return;
                }
                process.robot.other()
            }
        };

        if programs.get(callee).is_none() {
            self.poison(&mut process, format!("call target program {callee} does not exist"));
            self.active = Some(process);
            return;
        }

        process.state = ExecState::Next;
        self.call_stack.push(process);
        debug!(
            "call into program {callee} on {callee_robot:?} (depth {})",
            self.call_stack.len()
        );
        self.active_robot = callee_robot;
        self.active = Some(Process::new(callee_robot, callee, 0, process.mode));
    }

    /// The `Next` transition: bounds-check the cursor, handle running off
    /// the end (subroutine return or `Done`), and stop in `Single` mode.
    fn advance(&mut self, mut process: Process, programs: &[Program]) {
        let Some(program) = programs.get(process.program) else {
            self.fault_now(&mut process, "active program does not exist");
            self.active = Some(process);
            return;
        };

        let length = program.len() as i32;
        if process.next < 0 || process.next > length {
            let msg = format!("next instruction index {} is out of range", process.next);
            self.fault_now(&mut process, msg);
            self.active = Some(process);
            return;
        }

        process.current = process.next;
        if process.current == length {
            // Ran off the end: return to the caller or finish.
            if let Some(mut saved) = self.call_stack.pop() {
                if saved.robot != process.robot {
                    self.active_robot = saved.robot;
                }
                saved.state = ExecState::Next;
                debug!(
                    "returned to program {} (depth {})",
                    saved.program,
                    self.call_stack.len()
                );
                self.active = Some(saved);
            } else {
                process.state = ExecState::Done;
                self.active = Some(process);
            }
            return;
        }

        process.state = match process.mode {
            ExecMode::Full => ExecState::Inst,
            ExecMode::Single | ExecMode::Backward => ExecState::Done,
        };
        self.active = Some(process);
    }

    /// Resolves a motion instruction into a joint-space plan. Joint motion
    /// uses the taught configuration directly; linear and circular motion
    /// solve IK from the arm's current angles.
    #[allow(clippy::too_many_arguments)]
    fn plan_motion(
        &self,
        process: &Process,
        program: &Program,
        host: &dyn RobotHost,
        target: PositionRef,
        kind: MotionKind,
        speed: u8,
        tool_frame: usize,
        user_frame: usize,
        via: Option<PositionRef>,
    ) -> Result<MotionPlan, String> {
        let target_point = resolve_position(program, target)?;
        let target_angles = self.solve_target(process.robot, host, &target_point, kind)?;

        let via_angles = match (kind, via) {
            (MotionKind::Circular, Some(reference)) => {
                let via_point = resolve_position(program, reference)?;
                Some(self.solve_target(process.robot, host, &via_point, kind)?)
            }
            (MotionKind::Circular, None) => {
                return Err("circular motion requires a via position".into());
            }
            _ => None,
        };

        Ok(MotionPlan {
            kind,
            target: target_angles,
            via: via_angles,
            speed,
            tool_frame,
            user_frame,
        })
    }

    fn solve_target(
        &self,
        robot: RobotId,
        host: &dyn RobotHost,
        point: &Point,
        kind: MotionKind,
    ) -> Result<JointAngles, String> {
        match kind {
            MotionKind::Joint => Ok(point.angles),
            MotionKind::Linear | MotionKind::Circular => {
                let seed = host.joint_angles(robot);
                let speed = host.jog_speed(robot);
                self.solver
                    .solve(host.arm(robot), &seed, point, speed)
                    .ok_or_else(|| "no inverse-kinematics solution for the target pose".to_string())
            }
        }
    }

    /// Poisons the cursor so the following `Next` transition faults. Used at
    /// dispatch time, where the fault surfaces one transition later.
    fn poison(&mut self, process: &mut Process, message: impl Into<String>) {
        let message = message.into();
        warn!("execution fault: {message}");
        self.fault_message = Some(message);
        process.next = -1;
        process.state = ExecState::Next;
    }

    /// Transitions straight to `Fault`, keeping any message recorded at
    /// dispatch time.
    fn fault_now(&mut self, process: &mut Process, message: impl Into<String>) {
        if self.fault_message.is_none() {
            let message = message.into();
            warn!("execution fault: {message}");
            self.fault_message = Some(message);
        }
        process.state = ExecState::Fault;
    }
}

fn resolve_position(program: &Program, reference: PositionRef) -> Result<Point, String> {
    match reference {
        PositionRef::Inline(point) => Ok(point),
        PositionRef::Stored(index) => program
            .position(index)
            .copied()
            .ok_or_else(|| format!("no position taught at index {index}")),
    }
}
