//! Built-in control nodes, combining the statuses of several children.

use std::{fmt, str::FromStr};

use crate::{
    error::{BehaviorError, BuildError, Result},
    loosely_equal, AnyTypeAllowed, ChildNodes, Context, Lazy, NodeStatus, PortSpec, Symbol,
};

/// A node with any number of children.
///
/// The tree halts the children itself after calling [`ControlNode::halt`],
/// which only needs to reset the node's own state.
pub trait ControlNode: Send {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![]
    }

    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus>;

    fn halt(&mut self) {}
}

fn idle_child(ctx: &Context, index: usize) -> BehaviorError {
    BehaviorError::logic(format!(
        "child {} of [{}] returned IDLE",
        index,
        ctx.name()
    ))
}

/// Cursor shared by the sequence and fallback families.
#[derive(Default)]
struct Cursor {
    current: usize,
    skipped: usize,
}

impl Cursor {
    /// Ticks children from the cursor on while they return `proceed_on`.
    /// With `rewind`, the opposite outcome resets every child and the cursor;
    /// without it only the children from the cursor on are reset.
    fn tick(
        &mut self,
        children: &mut ChildNodes,
        ctx: &Context,
        proceed_on: NodeStatus,
        rewind: bool,
    ) -> Result<NodeStatus> {
        let count = children.len();
        if count == 0 {
            return Ok(proceed_on);
        }
        while self.current < count {
            match children.tick(self.current)? {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Skipped => {
                    self.skipped += 1;
                    self.current += 1;
                }
                NodeStatus::Idle => return Err(idle_child(ctx, self.current)),
                status if status == proceed_on => self.current += 1,
                status => {
                    if rewind {
                        children.reset_all();
                        *self = Self::default();
                    } else {
                        children.halt_from(self.current);
                        self.skipped = 0;
                    }
                    return Ok(status);
                }
            }
        }
        let all_skipped = self.skipped == count;
        children.reset_all();
        *self = Self::default();
        Ok(if all_skipped {
            NodeStatus::Skipped
        } else {
            proceed_on
        })
    }
}

/// Ticks children in order until one fails. A RUNNING child is resumed on
/// the next tick without re-ticking the ones before it.
#[derive(Default)]
pub struct SequenceNode {
    cursor: Cursor,
}

impl ControlNode for SequenceNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        self.cursor.tick(children, ctx, NodeStatus::Success, true)
    }

    fn halt(&mut self) {
        self.cursor = Cursor::default();
    }
}

/// Ticks children in order until one succeeds.
#[derive(Default)]
pub struct FallbackNode {
    cursor: Cursor,
}

impl ControlNode for FallbackNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        self.cursor.tick(children, ctx, NodeStatus::Failure, true)
    }

    fn halt(&mut self) {
        self.cursor = Cursor::default();
    }
}

/// Like [`SequenceNode`], but a failure does not rewind: the next tick
/// retries the failed child without re-running the ones before it.
#[derive(Default)]
pub struct SequenceWithMemoryNode {
    cursor: Cursor,
}

impl ControlNode for SequenceWithMemoryNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        self.cursor.tick(children, ctx, NodeStatus::Success, false)
    }

    fn halt(&mut self) {
        self.cursor = Cursor::default();
    }
}

#[derive(Default)]
pub struct FallbackWithMemoryNode {
    cursor: Cursor,
}

impl ControlNode for FallbackWithMemoryNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        self.cursor.tick(children, ctx, NodeStatus::Failure, false)
    }

    fn halt(&mut self) {
        self.cursor = Cursor::default();
    }
}

/// Restarts from the first child on every tick. When a child is RUNNING,
/// every other child is halted, so a higher priority child preempts a
/// lower priority one that was running.
fn tick_reactive(
    children: &mut ChildNodes,
    ctx: &Context,
    proceed_on: NodeStatus,
) -> Result<NodeStatus> {
    let count = children.len();
    if count == 0 {
        return Ok(proceed_on);
    }
    let mut all_skipped = true;
    for index in 0..count {
        let status = children.tick(index)?;
        all_skipped &= status == NodeStatus::Skipped;
        match status {
            NodeStatus::Running => {
                for other in (0..count).filter(|other| *other != index) {
                    children.halt(other);
                }
                return Ok(NodeStatus::Running);
            }
            NodeStatus::Skipped => children.halt(index),
            NodeStatus::Idle => return Err(idle_child(ctx, index)),
            status if status == proceed_on => {}
            status => {
                children.reset_all();
                return Ok(status);
            }
        }
    }
    children.reset_all();
    Ok(if all_skipped {
        NodeStatus::Skipped
    } else {
        proceed_on
    })
}

pub struct ReactiveSequenceNode;

impl ControlNode for ReactiveSequenceNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        tick_reactive(children, ctx, NodeStatus::Success)
    }
}

pub struct ReactiveFallbackNode;

impl ControlNode for ReactiveFallbackNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        tick_reactive(children, ctx, NodeStatus::Failure)
    }
}

/// A negative threshold counts from the number of children: -1 means all of them.
fn resolve_threshold(threshold: i32, count: usize) -> usize {
    if threshold < 0 {
        (count as i64 + threshold as i64 + 1).max(0) as usize
    } else {
        threshold as usize
    }
}

/// Ticks every child on each round. Succeeds once `success_count` children
/// succeeded, fails once `failure_count` children failed or success became
/// impossible. Completed children are not ticked again within the round.
#[derive(Default)]
pub struct ParallelNode {
    completed: Vec<bool>,
    success_count: usize,
    failure_count: usize,
}

impl ParallelNode {
    fn clear(&mut self) {
        self.completed.clear();
        self.success_count = 0;
        self.failure_count = 0;
    }
}

impl ControlNode for ParallelNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in::<i32>("success_count")
                .with_default(-1)
                .with_description("number of children that need to succeed to trigger a SUCCESS"),
            PortSpec::new_in::<i32>("failure_count")
                .with_default(1)
                .with_description("number of children that need to fail to trigger a FAILURE"),
        ]
    }

    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        static SUCCESS_COUNT: Lazy<Symbol> = Lazy::new(|| "success_count".into());
        static FAILURE_COUNT: Lazy<Symbol> = Lazy::new(|| "failure_count".into());

        let success_threshold: i32 = ctx.get_input(*SUCCESS_COUNT)?;
        let failure_threshold: i32 = ctx.get_input(*FAILURE_COUNT)?;
        let count = children.len();
        let required_success = resolve_threshold(success_threshold, count);
        let required_failure = resolve_threshold(failure_threshold, count);
        if count < required_success || count < required_failure {
            return Err(BehaviorError::logic(format!(
                "[{}] has {} children, fewer than its thresholds ({}, {})",
                ctx.name(),
                count,
                required_success,
                required_failure
            )));
        }
        self.completed.resize(count, false);

        let mut skipped = 0;
        for index in 0..count {
            if !self.completed[index] {
                match children.tick(index)? {
                    NodeStatus::Skipped => skipped += 1,
                    NodeStatus::Success => {
                        self.completed[index] = true;
                        self.success_count += 1;
                    }
                    NodeStatus::Failure => {
                        self.completed[index] = true;
                        self.failure_count += 1;
                    }
                    NodeStatus::Running => {}
                    NodeStatus::Idle => return Err(idle_child(ctx, index)),
                }
            }

            if self.success_count >= required_success
                || (success_threshold < 0 && self.success_count + skipped >= required_success)
            {
                self.clear();
                children.reset_all();
                return Ok(NodeStatus::Success);
            }
            if count - self.failure_count < required_success
                || self.failure_count == required_failure
            {
                self.clear();
                children.reset_all();
                return Ok(NodeStatus::Failure);
            }
        }

        Ok(if skipped == count {
            NodeStatus::Skipped
        } else {
            NodeStatus::Running
        })
    }

    fn halt(&mut self) {
        self.clear();
    }
}

/// Ticks every child until all of them completed, then returns FAILURE if
/// at least `max_failures` of them failed and SUCCESS otherwise.
#[derive(Default)]
pub struct ParallelAllNode {
    completed: Vec<bool>,
    failure_count: usize,
}

impl ControlNode for ParallelAllNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<i32>("max_failures")
            .with_default(1)
            .with_description(
                "If the number of children returning FAILURE exceeds this value, \
                 ParallelAll returns FAILURE",
            )]
    }

    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        static MAX_FAILURES: Lazy<Symbol> = Lazy::new(|| "max_failures".into());
        let count = children.len();
        let threshold = resolve_threshold(ctx.get_input(*MAX_FAILURES)?, count);
        if count < threshold {
            return Err(BehaviorError::logic(format!(
                "[{}]: number of children ({}) is less than the failure threshold ({})",
                ctx.name(),
                count,
                threshold
            )));
        }
        self.completed.resize(count, false);

        let mut skipped = 0;
        for index in 0..count {
            if self.completed[index] {
                continue;
            }
            match children.tick(index)? {
                NodeStatus::Skipped => skipped += 1,
                NodeStatus::Success => self.completed[index] = true,
                NodeStatus::Failure => {
                    self.completed[index] = true;
                    self.failure_count += 1;
                }
                NodeStatus::Running => {}
                NodeStatus::Idle => return Err(idle_child(ctx, index)),
            }
        }

        if skipped == count {
            return Ok(NodeStatus::Skipped);
        }
        let completed = self.completed.iter().filter(|done| **done).count();
        if skipped + completed >= count {
            let failed = self.failure_count >= threshold;
            self.halt();
            children.reset_all();
            return Ok(if failed {
                NodeStatus::Failure
            } else {
                NodeStatus::Success
            });
        }
        Ok(NodeStatus::Running)
    }

    fn halt(&mut self) {
        self.completed.clear();
        self.failure_count = 0;
    }
}

/// Ticks the child whose `case_i` port equals the `variable` port, or the
/// last child when no case matches. Needs exactly `N + 1` children.
pub struct SwitchNode {
    cases: Vec<Symbol>,
    running_child: Option<usize>,
}

impl SwitchNode {
    pub fn new(cases: usize) -> Self {
        Self {
            cases: (1..=cases).map(|i| format!("case_{}", i).into()).collect(),
            running_child: None,
        }
    }
}

impl ControlNode for SwitchNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        std::iter::once(PortSpec::new_in::<AnyTypeAllowed>("variable"))
            .chain(
                self.cases
                    .iter()
                    .map(|case| PortSpec::new_in::<AnyTypeAllowed>(*case)),
            )
            .collect()
    }

    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        static VARIABLE: Lazy<Symbol> = Lazy::new(|| "variable".into());
        let default_index = self.cases.len();
        if children.len() != default_index + 1 {
            return Err(BehaviorError::logic(format!(
                "[{}] must have {} children, found {}",
                ctx.name(),
                default_index + 1,
                children.len()
            )));
        }

        // Values that can't be read never match.
        let read = |key: Symbol| ctx.try_get_input::<String>(key).ok().flatten();
        let selected = read(*VARIABLE)
            .and_then(|variable| {
                self.cases.iter().position(|case| {
                    read(*case)
                        .map(|value| loosely_equal(&variable, &value))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(default_index);

        if let Some(running) = self.running_child {
            if running != selected {
                children.halt(running);
            }
        }

        let status = children.tick(selected)?;
        match status {
            NodeStatus::Skipped => self.running_child = None,
            NodeStatus::Running => self.running_child = Some(selected),
            _ => {
                children.reset_all();
                self.running_child = None;
            }
        }
        Ok(status)
    }

    fn halt(&mut self) {
        self.running_child = None;
    }
}

fn check_branch_count(children: &ChildNodes, ctx: &Context) -> Result<()> {
    if matches!(children.len(), 2 | 3) {
        Ok(())
    } else {
        Err(BehaviorError::logic(format!(
            "[{}] must have 2 or 3 children, found {}",
            ctx.name(),
            children.len()
        )))
    }
}

/// Ticks the first child as a condition, then the second child on SUCCESS
/// or the optional third child on FAILURE. The chosen branch keeps running
/// without the condition being evaluated again.
#[derive(Default)]
pub struct IfThenElseNode {
    branch: Option<usize>,
}

impl ControlNode for IfThenElseNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        check_branch_count(children, ctx)?;
        let branch = match self.branch {
            Some(branch) => branch,
            None => match children.tick(0)? {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Success => 1,
                NodeStatus::Failure if children.len() == 3 => 2,
                NodeStatus::Idle => return Err(idle_child(ctx, 0)),
                status => {
                    children.reset_all();
                    return Ok(status);
                }
            },
        };
        let status = children.tick(branch)?;
        if status == NodeStatus::Running {
            self.branch = Some(branch);
        } else {
            children.reset_all();
            self.branch = None;
        }
        Ok(status)
    }

    fn halt(&mut self) {
        self.branch = None;
    }
}

/// Reactive [`IfThenElseNode`]: the condition is ticked every time and a
/// branch that is no longer selected gets halted.
pub struct WhileDoElseNode;

impl ControlNode for WhileDoElseNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        check_branch_count(children, ctx)?;
        let status = match children.tick(0)? {
            NodeStatus::Running => return Ok(NodeStatus::Running),
            NodeStatus::Success => {
                if children.len() == 3 {
                    children.halt(2);
                }
                children.tick(1)?
            }
            NodeStatus::Failure if children.len() == 3 => {
                children.halt(1);
                children.tick(2)?
            }
            NodeStatus::Idle => return Err(idle_child(ctx, 0)),
            status => status,
        };
        if status != NodeStatus::Running {
            children.reset_all();
        }
        Ok(status)
    }
}

/// Runs every child but the last one as a sequence. If one of them fails,
/// the last child runs as a cleanup step and the node returns FAILURE once
/// it has completed, whatever its result.
#[derive(Default)]
pub struct TryCatchNode {
    cursor: Cursor,
    in_catch: bool,
}

impl ControlNode for TryCatchNode {
    fn tick(&mut self, children: &mut ChildNodes, ctx: &Context) -> Result<NodeStatus> {
        let count = children.len();
        if count < 2 {
            return Err(BehaviorError::logic(format!(
                "[{}] requires at least 2 children",
                ctx.name()
            )));
        }
        let catch = count - 1;

        if !self.in_catch {
            while self.cursor.current < catch {
                match children.tick(self.cursor.current)? {
                    NodeStatus::Running => return Ok(NodeStatus::Running),
                    NodeStatus::Success => self.cursor.current += 1,
                    NodeStatus::Skipped => {
                        self.cursor.current += 1;
                        self.cursor.skipped += 1;
                    }
                    NodeStatus::Failure => {
                        children.reset_all();
                        self.cursor = Cursor::default();
                        self.in_catch = true;
                        break;
                    }
                    NodeStatus::Idle => return Err(idle_child(ctx, self.cursor.current)),
                }
            }
            if !self.in_catch {
                let all_skipped = self.cursor.skipped == catch;
                children.reset_all();
                self.cursor = Cursor::default();
                return Ok(if all_skipped {
                    NodeStatus::Skipped
                } else {
                    NodeStatus::Success
                });
            }
        }

        if children.tick(catch)? == NodeStatus::Running {
            return Ok(NodeStatus::Running);
        }
        children.reset_all();
        self.in_catch = false;
        Ok(NodeStatus::Failure)
    }

    fn halt(&mut self) {
        self.cursor = Cursor::default();
        self.in_catch = false;
    }
}

/// Selects one of the built-in control nodes in the construction API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Sequence,
    Fallback,
    SequenceWithMemory,
    FallbackWithMemory,
    ReactiveSequence,
    ReactiveFallback,
    Parallel,
    ParallelAll,
    /// Switch with the given number of cases, plus the default child.
    Switch(usize),
    IfThenElse,
    WhileDoElse,
    TryCatch,
}

impl ControlKind {
    pub fn instantiate(self) -> Box<dyn ControlNode> {
        match self {
            Self::Sequence => Box::<SequenceNode>::default(),
            Self::Fallback => Box::<FallbackNode>::default(),
            Self::SequenceWithMemory => Box::<SequenceWithMemoryNode>::default(),
            Self::FallbackWithMemory => Box::<FallbackWithMemoryNode>::default(),
            Self::ReactiveSequence => Box::new(ReactiveSequenceNode),
            Self::ReactiveFallback => Box::new(ReactiveFallbackNode),
            Self::Parallel => Box::<ParallelNode>::default(),
            Self::ParallelAll => Box::<ParallelAllNode>::default(),
            Self::Switch(cases) => Box::new(SwitchNode::new(cases)),
            Self::IfThenElse => Box::<IfThenElseNode>::default(),
            Self::WhileDoElse => Box::new(WhileDoElseNode),
            Self::TryCatch => Box::<TryCatchNode>::default(),
        }
    }

    pub fn registration_name(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch(cases) => write!(f, "Switch{}", cases),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl FromStr for ControlKind {
    type Err = BuildError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "Sequence" => Self::Sequence,
            "Fallback" => Self::Fallback,
            "SequenceWithMemory" | "SequenceStar" => Self::SequenceWithMemory,
            "FallbackWithMemory" => Self::FallbackWithMemory,
            "ReactiveSequence" => Self::ReactiveSequence,
            "ReactiveFallback" => Self::ReactiveFallback,
            "Parallel" => Self::Parallel,
            "ParallelAll" => Self::ParallelAll,
            "IfThenElse" => Self::IfThenElse,
            "WhileDoElse" => Self::WhileDoElse,
            "TryCatch" => Self::TryCatch,
            _ => match s.strip_prefix("Switch").map(str::parse) {
                Some(Ok(cases)) if cases > 0 => Self::Switch(cases),
                _ => return Err(BuildError::UnknownKind(s.to_owned())),
            },
        })
    }
}
