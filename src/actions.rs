//! Leaf nodes: the [`LeafNode`] wrapper and the built-in actions and conditions.

use std::{marker::PhantomData, sync::Arc, time::Duration};

use crate::{
    error::{BehaviorError, Result},
    timer::TimerGuard,
    AnyTypeAllowed, BehaviorNode, Blackboard, BlackboardError, Context, CoroActionNode,
    Coroutine, Lazy, NodeStatus, NodeType, PortBinding, PortSpec, PortValue, Symbol,
    ThreadedAction, ThreadedActionNode,
};

/// A leaf together with the execution style the tree applies to it.
pub enum LeafNode {
    /// Synchronous and side-effect free; returning `Running` is an error.
    Condition(Box<dyn BehaviorNode>),
    /// Runs to completion within the tick; returning `Running` is an error.
    SyncAction(Box<dyn BehaviorNode>),
    /// Ticked again on every round while it returns `Running`.
    Action(Box<dyn BehaviorNode>),
    Threaded(ThreadedActionNode),
    Coroutine(CoroActionNode),
}

impl LeafNode {
    pub fn condition(node: impl BehaviorNode + 'static) -> Self {
        Self::Condition(Box::new(node))
    }

    pub fn sync_action(node: impl BehaviorNode + 'static) -> Self {
        Self::SyncAction(Box::new(node))
    }

    pub fn action(node: impl BehaviorNode + 'static) -> Self {
        Self::Action(Box::new(node))
    }

    pub fn threaded(action: impl ThreadedAction) -> Self {
        Self::Threaded(ThreadedActionNode::new(action))
    }

    /// `factory` creates a fresh coroutine each time the node starts.
    pub fn coroutine<C: Coroutine + 'static>(
        ports: Vec<PortSpec>,
        factory: impl FnMut() -> C + Send + 'static,
    ) -> Self {
        Self::Coroutine(CoroActionNode::new(ports, factory))
    }

    pub(crate) fn provided_ports(&self) -> Vec<PortSpec> {
        match self {
            Self::Condition(node) | Self::SyncAction(node) | Self::Action(node) => {
                node.provided_ports()
            }
            Self::Threaded(node) => node.provided_ports(),
            Self::Coroutine(node) => node.provided_ports(),
        }
    }

    pub(crate) fn node_type(&self) -> NodeType {
        match self {
            Self::Condition(_) => NodeType::Condition,
            _ => NodeType::Action,
        }
    }

    pub(crate) fn registration_name(&self) -> String {
        match self {
            Self::Condition(_) => "Condition",
            Self::SyncAction(_) => "SyncAction",
            Self::Action(_) => "Action",
            Self::Threaded(_) => "ThreadedAction",
            Self::Coroutine(_) => "CoroAction",
        }
        .to_owned()
    }

    /// Whether this leaf can stay `Running` across ticks.
    pub(crate) fn is_async(&self) -> bool {
        !matches!(self, Self::Condition(_) | Self::SyncAction(_))
    }

    pub(crate) fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        match self {
            Self::Condition(node) | Self::SyncAction(node) => match node.tick(ctx)? {
                NodeStatus::Running => Err(BehaviorError::logic(format!(
                    "synchronous node [{}] returned RUNNING",
                    ctx.name()
                ))),
                status => Ok(status),
            },
            Self::Action(node) => node.tick(ctx),
            Self::Threaded(node) => node.tick(ctx),
            Self::Coroutine(node) => node.tick(ctx),
        }
    }

    pub(crate) fn halt(&mut self) {
        match self {
            Self::Condition(node) | Self::SyncAction(node) | Self::Action(node) => node.halt(),
            Self::Threaded(node) => node.halt(),
            Self::Coroutine(node) => node.halt(),
        }
    }
}

pub struct AlwaysSuccess;

impl BehaviorNode for AlwaysSuccess {
    fn tick(&mut self, _ctx: &Context) -> Result<NodeStatus> {
        Ok(NodeStatus::Success)
    }
}

pub struct AlwaysFailure;

impl BehaviorNode for AlwaysFailure {
    fn tick(&mut self, _ctx: &Context) -> Result<NodeStatus> {
        Ok(NodeStatus::Failure)
    }
}

/// Copies `value` into the entry bound to `output_key`.
pub struct SetBlackboard;

impl BehaviorNode for SetBlackboard {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in::<AnyTypeAllowed>("value")
                .with_description("Value to be written into the output_key"),
            PortSpec::new_inout::<AnyTypeAllowed>("output_key")
                .with_description("Name of the blackboard entry where the value should be written"),
        ]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        static VALUE: Lazy<Symbol> = Lazy::new(|| "value".into());
        static OUTPUT_KEY: Lazy<Symbol> = Lazy::new(|| "output_key".into());
        let value: String = ctx.get_input(*VALUE)?;
        ctx.set_output(*OUTPUT_KEY, value)?;
        Ok(NodeStatus::Success)
    }
}

pub struct IsTrue;

impl BehaviorNode for IsTrue {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<bool>("input")]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        static INPUT: Lazy<Symbol> = Lazy::new(|| "input".into());
        if ctx.get_input::<bool>(*INPUT)? {
            Ok(NodeStatus::Success)
        } else {
            Ok(NodeStatus::Failure)
        }
    }
}

/// Entry named by the `entry` port: either a `{key}` binding or the literal key.
pub(crate) fn watched_entry(ctx: &Context) -> Option<(Arc<Blackboard>, Symbol)> {
    static ENTRY: Lazy<Symbol> = Lazy::new(|| "entry".into());
    match ctx.port_binding(*ENTRY)? {
        PortBinding::Literal(key) => Some((ctx.blackboard().clone(), Symbol::from(key.trim()))),
        _ => ctx.port_entry(*ENTRY),
    }
}

/// SUCCESS if the watched entry was written since the previous tick, FAILURE otherwise.
#[derive(Default)]
pub struct EntryUpdatedAction {
    sequence_id: u64,
}

impl BehaviorNode for EntryUpdatedAction {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<AnyTypeAllowed>("entry")
            .with_description("Entry to check")]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        let current = match watched_entry(ctx).and_then(|(bb, key)| bb.sequence_id(key)) {
            Some(current) => current,
            None => return Ok(NodeStatus::Failure),
        };
        let previous = std::mem::replace(&mut self.sequence_id, current);
        Ok(if previous != current {
            NodeStatus::Success
        } else {
            NodeStatus::Failure
        })
    }
}

/// Removes the first item of the `Vec<T>` stored under `key`. An entry that
/// was never written counts as an empty queue.
pub(crate) fn pop_front<T: PortValue>(blackboard: &Blackboard, key: Symbol) -> Result<Option<T>> {
    match blackboard.update(key, |queue: &mut Vec<T>| {
        (!queue.is_empty()).then(|| queue.remove(0))
    }) {
        Ok(item) => Ok(item),
        Err(BlackboardError::MissingEntry(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Moves the first item of the queue behind `queue` into `popped_item`.
/// FAILURE when the queue is empty or `queue` is not a blackboard entry.
pub struct PopFromQueue<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> PopFromQueue<T> {
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for PopFromQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PortValue> BehaviorNode for PopFromQueue<T> {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in::<Vec<T>>("queue"),
            PortSpec::new_out::<T>("popped_item"),
        ]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        static QUEUE: Lazy<Symbol> = Lazy::new(|| "queue".into());
        static POPPED_ITEM: Lazy<Symbol> = Lazy::new(|| "popped_item".into());
        let Some((blackboard, key)) = ctx.port_entry(*QUEUE) else {
            return Ok(NodeStatus::Failure);
        };
        match pop_front::<T>(&blackboard, key)? {
            Some(item) => {
                ctx.set_output(*POPPED_ITEM, item)?;
                Ok(NodeStatus::Success)
            }
            None => Ok(NodeStatus::Failure),
        }
    }
}

/// Writes the length of `queue` into `size`. FAILURE when the queue is empty.
pub struct QueueSize<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> QueueSize<T> {
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for QueueSize<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PortValue> BehaviorNode for QueueSize<T> {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in::<Vec<T>>("queue"),
            PortSpec::new_out::<i32>("size"),
        ]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        static QUEUE: Lazy<Symbol> = Lazy::new(|| "queue".into());
        static SIZE: Lazy<Symbol> = Lazy::new(|| "size".into());
        match ctx.try_get_input::<Vec<T>>(*QUEUE)? {
            Some(queue) if !queue.is_empty() => {
                let size = i32::try_from(queue.len()).unwrap_or(i32::MAX);
                ctx.set_output(*SIZE, size)?;
                Ok(NodeStatus::Success)
            }
            _ => Ok(NodeStatus::Failure),
        }
    }
}

/// Polled action returning RUNNING until `msec` milliseconds have passed.
#[derive(Default)]
pub struct SleepNode {
    timer: TimerGuard,
}

impl BehaviorNode for SleepNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<u64>("msec")]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        static MSEC: Lazy<Symbol> = Lazy::new(|| "msec".into());
        if !self.timer.is_armed() {
            let msec: u64 = ctx.get_input(*MSEC)?;
            if msec == 0 {
                return Ok(NodeStatus::Success);
            }
            self.timer.arm(ctx, Duration::from_millis(msec));
        }
        if self.timer.fired() {
            self.timer.disarm();
            Ok(NodeStatus::Success)
        } else {
            Ok(NodeStatus::Running)
        }
    }

    fn halt(&mut self) {
        self.timer.disarm();
    }
}

/// An action backed by a closure.
pub struct SimpleAction<F> {
    ports: Vec<PortSpec>,
    tick: F,
}

impl<F> SimpleAction<F>
where
    F: FnMut(&Context) -> Result<NodeStatus> + Send,
{
    pub fn new(tick: F) -> Self {
        Self {
            ports: vec![],
            tick,
        }
    }

    pub fn with_ports(ports: Vec<PortSpec>, tick: F) -> Self {
        Self { ports, tick }
    }
}

impl<F> BehaviorNode for SimpleAction<F>
where
    F: FnMut(&Context) -> Result<NodeStatus> + Send,
{
    fn provided_ports(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        (self.tick)(ctx)
    }
}

/// A condition backed by a closure returning whether it holds.
pub struct SimpleCondition<F> {
    ports: Vec<PortSpec>,
    check: F,
}

impl<F> SimpleCondition<F>
where
    F: FnMut(&Context) -> Result<bool> + Send,
{
    pub fn new(check: F) -> Self {
        Self {
            ports: vec![],
            check,
        }
    }

    pub fn with_ports(ports: Vec<PortSpec>, check: F) -> Self {
        Self { ports, check }
    }
}

impl<F> BehaviorNode for SimpleCondition<F>
where
    F: FnMut(&Context) -> Result<bool> + Send,
{
    fn provided_ports(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        if (self.check)(ctx)? {
            Ok(NodeStatus::Success)
        } else {
            Ok(NodeStatus::Failure)
        }
    }
}
