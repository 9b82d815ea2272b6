//! Built-in decorators, each owning exactly one child.

use std::{collections::VecDeque, fmt, str::FromStr, time::Duration};

use tracing::debug;

use crate::{
    actions::{pop_front, watched_entry},
    error::{BuildError, Result},
    loosely_equal,
    timer::TimerGuard,
    AnyTypeAllowed, ChildNode, Context, Lazy, NodeStatus, PortBinding, PortSpec, PortValue,
    Symbol,
};

/// A node with exactly one child.
///
/// The tree halts the child itself after calling [`DecoratorNode::halt`],
/// which only needs to reset the node's own counters and timers.
pub trait DecoratorNode: Send {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus>;

    fn halt(&mut self) {}
}

/// Turns SUCCESS into FAILURE and vice versa.
pub struct InverterNode;

impl DecoratorNode for InverterNode {
    fn tick(&mut self, child: &mut ChildNode, _ctx: &Context) -> Result<NodeStatus> {
        Ok(match child.tick()? {
            NodeStatus::Success => {
                child.halt();
                NodeStatus::Failure
            }
            NodeStatus::Failure => {
                child.halt();
                NodeStatus::Success
            }
            status => status,
        })
    }
}

pub struct ForceSuccessNode;

impl DecoratorNode for ForceSuccessNode {
    fn tick(&mut self, child: &mut ChildNode, _ctx: &Context) -> Result<NodeStatus> {
        let status = child.tick()?;
        if status.is_completed() {
            child.halt();
            return Ok(NodeStatus::Success);
        }
        Ok(status)
    }
}

pub struct ForceFailureNode;

impl DecoratorNode for ForceFailureNode {
    fn tick(&mut self, child: &mut ChildNode, _ctx: &Context) -> Result<NodeStatus> {
        let status = child.tick()?;
        if status.is_completed() {
            child.halt();
            return Ok(NodeStatus::Failure);
        }
        Ok(status)
    }
}

/// Count given at construction, or read from `port` on every tick.
fn count_or_port(fixed: Option<i32>, ctx: &Context, port: Symbol) -> Result<i32> {
    match fixed {
        Some(count) => Ok(count),
        None => ctx.get_input(port),
    }
}

/// Ticks the child until it succeeded `num_cycles` times, returning
/// RUNNING in between. A failure ends the loop. -1 repeats forever.
pub struct RepeatNode {
    num_cycles: Option<i32>,
    repeat_count: i32,
}

impl RepeatNode {
    pub fn new(num_cycles: Option<i32>) -> Self {
        Self {
            num_cycles,
            repeat_count: 0,
        }
    }
}

impl DecoratorNode for RepeatNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<i32>("num_cycles").with_description(
            "Repeat a successful child up to N times. Use -1 to create an infinite loop.",
        )]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus> {
        static NUM_CYCLES: Lazy<Symbol> = Lazy::new(|| "num_cycles".into());
        let num_cycles = count_or_port(self.num_cycles, ctx, *NUM_CYCLES)?;
        if num_cycles == 0 {
            return Ok(NodeStatus::Success);
        }

        match child.tick()? {
            NodeStatus::Success => {
                self.repeat_count += 1;
                child.halt();
                if num_cycles < 0 || self.repeat_count < num_cycles {
                    ctx.emit_wake_up_signal();
                    Ok(NodeStatus::Running)
                } else {
                    self.repeat_count = 0;
                    Ok(NodeStatus::Success)
                }
            }
            NodeStatus::Failure => {
                self.repeat_count = 0;
                child.halt();
                Ok(NodeStatus::Failure)
            }
            // The counter survives a skipped round
            NodeStatus::Skipped => {
                child.halt();
                Ok(NodeStatus::Skipped)
            }
            status => Ok(status),
        }
    }

    fn halt(&mut self) {
        self.repeat_count = 0;
    }
}

/// Ticks the child again after a failure, up to `num_attempts` attempts in
/// total. -1 retries forever.
pub struct RetryNode {
    max_attempts: Option<i32>,
    try_count: i32,
}

impl RetryNode {
    pub fn new(max_attempts: Option<i32>) -> Self {
        Self {
            max_attempts,
            try_count: 0,
        }
    }
}

impl DecoratorNode for RetryNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<i32>("num_attempts").with_description(
            "Execute again a failing child up to N times. Use -1 to create an infinite loop.",
        )]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus> {
        static NUM_ATTEMPTS: Lazy<Symbol> = Lazy::new(|| "num_attempts".into());
        let max_attempts = count_or_port(self.max_attempts, ctx, *NUM_ATTEMPTS)?;

        while max_attempts < 0 || self.try_count < max_attempts {
            let prev_status = child.status();
            match child.tick()? {
                NodeStatus::Success => {
                    self.try_count = 0;
                    child.halt();
                    return Ok(NodeStatus::Success);
                }
                NodeStatus::Failure => {
                    self.try_count += 1;
                    child.halt();
                    let attempts_left = max_attempts < 0 || self.try_count < max_attempts;
                    // Yield between attempts so that an asynchronous child stays interruptible.
                    if attempts_left && prev_status == NodeStatus::Idle && child.requires_wake_up()
                    {
                        debug!("[{}] retrying, attempt {}", ctx.name(), self.try_count + 1);
                        ctx.emit_wake_up_signal();
                        return Ok(NodeStatus::Running);
                    }
                }
                NodeStatus::Skipped => {
                    child.halt();
                    return Ok(NodeStatus::Skipped);
                }
                status => return Ok(status),
            }
        }
        self.try_count = 0;
        Ok(NodeStatus::Failure)
    }

    fn halt(&mut self) {
        self.try_count = 0;
    }
}

/// Keeps the child running: SUCCESS restarts it, FAILURE ends the loop.
pub struct KeepRunningUntilFailureNode;

impl DecoratorNode for KeepRunningUntilFailureNode {
    fn tick(&mut self, child: &mut ChildNode, _ctx: &Context) -> Result<NodeStatus> {
        Ok(match child.tick()? {
            NodeStatus::Success => {
                child.halt();
                NodeStatus::Running
            }
            NodeStatus::Failure => {
                child.halt();
                NodeStatus::Failure
            }
            status => status,
        })
    }
}

/// Fails if the child is still running after `msec` milliseconds. 0
/// disables the deadline.
///
/// The deadline is enforced from the timer thread: once it expires,
/// [`Context::is_halt_requested`] turns true for every node below, so a
/// threaded child can stop without waiting for the next tick. That tick then
/// halts the child and returns FAILURE.
pub struct TimeoutNode {
    msec: Option<u64>,
    started: bool,
    timer: TimerGuard,
}

impl TimeoutNode {
    pub fn new(msec: Option<u64>) -> Self {
        Self {
            msec,
            started: false,
            timer: TimerGuard::default(),
        }
    }
}

impl DecoratorNode for TimeoutNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<u64>("msec").with_description(
            "After a certain amount of time, halt() the child if it is still running.",
        )]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus> {
        static MSEC: Lazy<Symbol> = Lazy::new(|| "msec".into());
        if !self.started {
            self.started = true;
            let msec = match self.msec {
                Some(msec) => msec,
                None => ctx.get_input(*MSEC)?,
            };
            if msec > 0 {
                self.timer.arm(ctx, Duration::from_millis(msec));
            }
        }

        if self.timer.fired() {
            debug!("[{}] timed out", ctx.name());
            self.halt();
            child.halt();
            return Ok(NodeStatus::Failure);
        }

        let status = match self.timer.flag() {
            Some(deadline) => child.tick_cancellable(deadline)?,
            None => child.tick()?,
        };
        if status != NodeStatus::Running {
            self.halt();
            child.halt();
        }
        Ok(status)
    }

    fn halt(&mut self) {
        self.started = false;
        self.timer.disarm();
    }
}

/// Waits `delay_msec` milliseconds after its first tick before ticking the child.
pub struct DelayNode {
    msec: Option<u64>,
    started: bool,
    timer: TimerGuard,
}

impl DelayNode {
    pub fn new(msec: Option<u64>) -> Self {
        Self {
            msec,
            started: false,
            timer: TimerGuard::default(),
        }
    }
}

impl DecoratorNode for DelayNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<u64>("delay_msec")
            .with_description("Tick the child after a few milliseconds")]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus> {
        static DELAY_MSEC: Lazy<Symbol> = Lazy::new(|| "delay_msec".into());
        if !self.started {
            self.started = true;
            let msec = match self.msec {
                Some(msec) => msec,
                None => ctx.get_input(*DELAY_MSEC)?,
            };
            if msec > 0 {
                self.timer.arm(ctx, Duration::from_millis(msec));
            }
        }
        if self.timer.is_armed() && !self.timer.fired() {
            return Ok(NodeStatus::Running);
        }

        let status = child.tick()?;
        if status != NodeStatus::Running {
            self.halt();
            child.halt();
        }
        Ok(status)
    }

    fn halt(&mut self) {
        self.started = false;
        self.timer.disarm();
    }
}

/// Ticks the child until it completes once. Afterwards it returns SKIPPED,
/// or the cached result when `then_skip` is false. Halting does not re-arm it.
#[derive(Default)]
pub struct RunOnceNode {
    result: Option<NodeStatus>,
}

impl DecoratorNode for RunOnceNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<bool>("then_skip")
            .with_default(true)
            .with_description(
                "If true, skip after the first execution, otherwise return the same NodeStatus returned once by the child.",
            )]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus> {
        static THEN_SKIP: Lazy<Symbol> = Lazy::new(|| "then_skip".into());
        if let Some(result) = self.result {
            return Ok(if ctx.get_input(*THEN_SKIP)? {
                NodeStatus::Skipped
            } else {
                result
            });
        }
        let status = child.tick()?;
        if status.is_completed() {
            self.result = Some(status);
            child.halt();
        }
        Ok(status)
    }
}

/// Ticks the child only while `value_A` equals `value_B`, compared like the
/// cases of a switch. Otherwise halts it and returns `return_on_mismatch`.
pub struct BlackboardCheckNode;

impl DecoratorNode for BlackboardCheckNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in::<AnyTypeAllowed>("value_A"),
            PortSpec::new_in::<AnyTypeAllowed>("value_B"),
            PortSpec::new_in::<NodeStatus>("return_on_mismatch").with_default("FAILURE"),
        ]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus> {
        static VALUE_A: Lazy<Symbol> = Lazy::new(|| "value_A".into());
        static VALUE_B: Lazy<Symbol> = Lazy::new(|| "value_B".into());
        static RETURN_ON_MISMATCH: Lazy<Symbol> = Lazy::new(|| "return_on_mismatch".into());

        let value_a: String = ctx.get_input(*VALUE_A)?;
        let value_b: String = ctx.get_input(*VALUE_B)?;
        if loosely_equal(&value_a, &value_b) {
            let status = child.tick()?;
            if status.is_completed() {
                child.halt();
            }
            return Ok(status);
        }
        child.halt();
        ctx.get_input(*RETURN_ON_MISMATCH)
    }
}

/// Ticks the child only if the entry named by the `entry` port was written
/// since the previous check; otherwise returns `if_not_updated`. A RUNNING
/// child keeps being ticked without checking again.
pub struct EntryUpdatedNode {
    if_not_updated: NodeStatus,
    sequence_id: u64,
    still_executing_child: bool,
}

impl EntryUpdatedNode {
    pub fn new(if_not_updated: NodeStatus) -> Self {
        Self {
            if_not_updated,
            sequence_id: 0,
            still_executing_child: false,
        }
    }
}

impl DecoratorNode for EntryUpdatedNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<AnyTypeAllowed>("entry")
            .with_description("Entry to check")]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus> {
        if !self.still_executing_child {
            let current = watched_entry(ctx).and_then(|(bb, key)| bb.sequence_id(key));
            let Some(current) = current else {
                return Ok(self.if_not_updated);
            };
            let previous = std::mem::replace(&mut self.sequence_id, current);
            if previous == current {
                return Ok(self.if_not_updated);
            }
        }
        let status = child.tick()?;
        self.still_executing_child = status == NodeStatus::Running;
        if status.is_completed() {
            child.halt();
        }
        Ok(status)
    }

    fn halt(&mut self) {
        self.still_executing_child = false;
    }
}

/// Runs the child once per item of `queue`, writing the item into `value`
/// first. A literal queue (`"1;2;3"`) is copied when the loop starts; a
/// queue in the blackboard is consumed in place, one item per child run.
///
/// Returns RUNNING between runs, FAILURE as soon as the child fails and
/// `if_empty` once no item is left.
pub struct LoopNode<T> {
    started: bool,
    child_running: bool,
    static_queue: Option<VecDeque<T>>,
}

impl<T> LoopNode<T> {
    pub fn new() -> Self {
        Self {
            started: false,
            child_running: false,
            static_queue: None,
        }
    }
}

impl<T> Default for LoopNode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PortValue> LoopNode<T> {
    fn next_item(&mut self, ctx: &Context, queue: Symbol) -> Result<Option<T>> {
        if let Some(items) = &mut self.static_queue {
            return Ok(items.pop_front());
        }
        match ctx.port_entry(queue) {
            Some((blackboard, key)) => pop_front(&blackboard, key),
            None => Ok(None),
        }
    }
}

impl<T: PortValue> DecoratorNode for LoopNode<T> {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in::<Vec<T>>("queue"),
            PortSpec::new_in::<NodeStatus>("if_empty")
                .with_default("SUCCESS")
                .with_description("Status to return if queue is empty: SUCCESS, FAILURE, SKIPPED"),
            PortSpec::new_out::<T>("value"),
        ]
    }

    fn tick(&mut self, child: &mut ChildNode, ctx: &Context) -> Result<NodeStatus> {
        static QUEUE: Lazy<Symbol> = Lazy::new(|| "queue".into());
        static IF_EMPTY: Lazy<Symbol> = Lazy::new(|| "if_empty".into());
        static VALUE: Lazy<Symbol> = Lazy::new(|| "value".into());
        if !self.started {
            self.started = true;
            self.child_running = false;
            self.static_queue = match ctx.port_binding(*QUEUE) {
                Some(PortBinding::Literal(_)) => {
                    Some(ctx.get_input::<Vec<T>>(*QUEUE)?.into())
                }
                _ => None,
            };
        }

        if !self.child_running {
            let Some(item) = self.next_item(ctx, *QUEUE)? else {
                self.halt();
                return ctx.get_input(*IF_EMPTY);
            };
            if ctx.port_binding(*VALUE).is_some() {
                ctx.set_output(*VALUE, item)?;
            }
        }

        let status = child.tick()?;
        self.child_running = status == NodeStatus::Running;
        if self.child_running {
            return Ok(NodeStatus::Running);
        }
        child.halt();
        if status == NodeStatus::Failure {
            self.halt();
            return Ok(NodeStatus::Failure);
        }
        ctx.emit_wake_up_signal();
        Ok(NodeStatus::Running)
    }

    fn halt(&mut self) {
        self.started = false;
        self.child_running = false;
        self.static_queue = None;
    }
}

/// Item type of the queue consumed by a built-in [`LoopNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItem {
    Int,
    Double,
    Bool,
    String,
}

/// Selects one of the built-in decorators in the construction API.
///
/// Counts and durations given here are fixed; `None` reads them from the
/// node's ports on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorKind {
    Inverter,
    ForceSuccess,
    ForceFailure,
    Repeat(Option<i32>),
    Retry(Option<i32>),
    KeepRunningUntilFailure,
    Timeout(Option<u64>),
    Delay(Option<u64>),
    RunOnce,
    BlackboardCheck,
    /// Precondition on an entry's version; carries the status returned
    /// when the entry was not updated.
    EntryUpdated(NodeStatus),
    Loop(QueueItem),
}

impl DecoratorKind {
    pub fn instantiate(self) -> Box<dyn DecoratorNode> {
        match self {
            Self::Inverter => Box::new(InverterNode),
            Self::ForceSuccess => Box::new(ForceSuccessNode),
            Self::ForceFailure => Box::new(ForceFailureNode),
            Self::Repeat(num_cycles) => Box::new(RepeatNode::new(num_cycles)),
            Self::Retry(num_attempts) => Box::new(RetryNode::new(num_attempts)),
            Self::KeepRunningUntilFailure => Box::new(KeepRunningUntilFailureNode),
            Self::Timeout(msec) => Box::new(TimeoutNode::new(msec)),
            Self::Delay(msec) => Box::new(DelayNode::new(msec)),
            Self::RunOnce => Box::<RunOnceNode>::default(),
            Self::BlackboardCheck => Box::new(BlackboardCheckNode),
            Self::EntryUpdated(if_not_updated) => Box::new(EntryUpdatedNode::new(if_not_updated)),
            Self::Loop(QueueItem::Int) => Box::new(LoopNode::<i32>::new()),
            Self::Loop(QueueItem::Double) => Box::new(LoopNode::<f64>::new()),
            Self::Loop(QueueItem::Bool) => Box::new(LoopNode::<bool>::new()),
            Self::Loop(QueueItem::String) => Box::new(LoopNode::<String>::new()),
        }
    }

    pub fn registration_name(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DecoratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inverter => "Inverter",
            Self::ForceSuccess => "ForceSuccess",
            Self::ForceFailure => "ForceFailure",
            Self::Repeat(_) => "Repeat",
            Self::Retry(_) => "RetryUntilSuccessful",
            Self::KeepRunningUntilFailure => "KeepRunningUntilFailure",
            Self::Timeout(_) => "Timeout",
            Self::Delay(_) => "Delay",
            Self::RunOnce => "RunOnce",
            Self::BlackboardCheck => "BlackboardCheck",
            Self::EntryUpdated(NodeStatus::Skipped) => "SkipUnlessUpdated",
            Self::EntryUpdated(NodeStatus::Running) => "WaitValueUpdate",
            Self::EntryUpdated(_) => "EntryUpdated",
            Self::Loop(QueueItem::Int) => "LoopInt",
            Self::Loop(QueueItem::Double) => "LoopDouble",
            Self::Loop(QueueItem::Bool) => "LoopBool",
            Self::Loop(QueueItem::String) => "LoopString",
        })
    }
}

impl FromStr for DecoratorKind {
    type Err = BuildError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "Inverter" => Self::Inverter,
            "ForceSuccess" => Self::ForceSuccess,
            "ForceFailure" => Self::ForceFailure,
            "Repeat" => Self::Repeat(None),
            "Retry" | "RetryUntilSuccessful" => Self::Retry(None),
            "KeepRunningUntilFailure" => Self::KeepRunningUntilFailure,
            "Timeout" => Self::Timeout(None),
            "Delay" => Self::Delay(None),
            "RunOnce" => Self::RunOnce,
            "BlackboardCheck" => Self::BlackboardCheck,
            "SkipUnlessUpdated" => Self::EntryUpdated(NodeStatus::Skipped),
            "WaitValueUpdate" => Self::EntryUpdated(NodeStatus::Running),
            "EntryUpdated" => Self::EntryUpdated(NodeStatus::Failure),
            "LoopInt" => Self::Loop(QueueItem::Int),
            "LoopDouble" => Self::Loop(QueueItem::Double),
            "LoopBool" => Self::Loop(QueueItem::Bool),
            "LoopString" => Self::Loop(QueueItem::String),
            _ => return Err(BuildError::UnknownKind(s.to_owned())),
        })
    }
}
