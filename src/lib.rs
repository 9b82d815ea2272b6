//! # behavior-tree-core (Rust crate)
//!
//! A behavior tree execution engine, inspired by [BehaviorTreeCPP](https://github.com/BehaviorTree/BehaviorTree.CPP.git).
//!
//!
//! ## Overview
//!
//! A behavior tree is an extension to finite state machines that makes describing transitional behavior easier.
//! See [BehaviorTreeCPP's documentation](https://www.behaviortree.dev/) for the thorough introduction to the idea.
//!
//! The tree is repeatedly "ticked" from its root. Every tick travels down
//! through control nodes (sequences, fallbacks, parallels, switches) and
//! decorators (retry, repeat, timeout, ...) to leaves, which do the actual work
//! and report back one of the [`NodeStatus`] values.
//! A node returning `Running` is resumed on the next tick, and can be
//! interrupted at any time with a halt.
//!
//! This crate covers the execution engine only: the node state machine,
//! the composition rules of the built-in nodes, asynchronous actions and the
//! blackboard. Trees are built through a construction API rather than parsed
//! from a file format.
//!
//!
//! ## How it looks like
//!
//! First, you define your leaf nodes by implementing [`BehaviorNode`].
//! Ports are declared with [`BehaviorNode::provided_ports`] and read or
//! written through the [`Context`].
//!
//! ```rust
//! use ::behavior_tree_core::{
//!     BehaviorNode, Context, Lazy, NodeStatus, PortSpec, Result, Symbol,
//! };
//!
//! struct PrintArmNode;
//!
//! impl BehaviorNode for PrintArmNode {
//!     fn provided_ports(&self) -> Vec<PortSpec> {
//!         vec![PortSpec::new_in::<String>("arm")]
//!     }
//!
//!     fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
//!         static ARM_SYM: Lazy<Symbol> = Lazy::new(|| "arm".into());
//!         let arm: String = ctx.get_input(*ARM_SYM)?;
//!         println!("Got {}", arm);
//!         Ok(NodeStatus::Success)
//!     }
//! }
//! ```
//!
//! Then you build a tree. Every node gets a name and a [`NodeConfig`] holding
//! its port bindings: `{key}` refers to a blackboard entry, `{@key}` to an
//! entry of the root blackboard, `{=}` to the entry named like the port,
//! and anything else is a literal.
//!
//! ```rust
//! # use ::behavior_tree_core::*;
//! # struct PrintArmNode;
//! # impl BehaviorNode for PrintArmNode {
//! #     fn provided_ports(&self) -> Vec<PortSpec> { vec![PortSpec::new_in::<String>("arm")] }
//! #     fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> { ctx.get_input::<String>("arm")?; Ok(NodeStatus::Success) }
//! # }
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut tree = Tree::new();
//! tree.blackboard().set("left_arm", "leftArm".to_owned())?;
//!
//! let root = tree.new_control_node(ControlKind::Sequence, "arms", NodeConfig::new())?;
//! let left = tree.new_leaf_node(
//!     LeafNode::sync_action(PrintArmNode),
//!     "print_left",
//!     NodeConfig::new().with_port("arm", "{left_arm}"),
//! )?;
//! let right = tree.new_leaf_node(
//!     LeafNode::sync_action(PrintArmNode),
//!     "print_right",
//!     NodeConfig::new().with_port("arm", "rightArm"),
//! )?;
//! tree.add_child(root, left)?;
//! tree.add_child(root, right)?;
//! tree.set_root(root)?;
//!
//! assert_eq!(tree.tick_once()?, NodeStatus::Success);
//! # Ok(())
//! # }
//! ```
//!
//! ## Asynchronous actions
//!
//! Leaves come in several flavors, chosen with the [`LeafNode`] constructors:
//!
//! * conditions and synchronous actions run to completion within the tick,
//!   returning `Running` from them is an error;
//! * polled actions may return `Running` and are ticked again next time;
//! * [`ThreadedAction`]s run on a worker thread. Halting one requests
//!   cooperative cancellation and blocks until the worker has returned;
//! * [`Coroutine`]s keep explicit resumable state, and a halt discards that
//!   state so that nothing after the suspension point runs.
//!
//! Asynchronous nodes call [`Context::emit_wake_up_signal`] to ask
//! [`Tree::tick_while_running`] for an immediate tick instead of waiting out
//! the sleep interval.
//!
//! ## Errors
//!
//! A `Failure` status is an ordinary outcome. Misuse of the tree
//! (a child returning `Idle`, a switch with the wrong number of children)
//! and failures to produce valid values (missing ports, failed conversions)
//! are returned as [`BehaviorError`] from the tick. The tree logs the error
//! and refuses to tick again.
//!
//! ### Optimizing port access by caching symbols
//!
//! Port names and blackboard keys are [`Symbol`]s, interned strings that
//! compare by address. You can use `Lazy<Symbol>` to use cache-on-first-use
//! pattern on the symbol like in the example above.
//! `Lazy` is re-exported type from `once_cell`.

mod actions;
mod blackboard;
mod config;
mod container;
mod context;
mod controls;
mod convert;
mod coroutine;
mod decorators;
pub mod error;
#[cfg(test)]
mod mock;
mod observer;
mod parser;
mod port;
mod symbol;
mod threaded;
mod timer;
mod tree;
mod wakeup;

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

pub use crate::actions::{
    AlwaysFailure, AlwaysSuccess, EntryUpdatedAction, IsTrue, LeafNode, PopFromQueue,
    QueueSize, SetBlackboard, SimpleAction, SimpleCondition, SleepNode,
};
pub use crate::blackboard::{AnyTypeAllowed, Blackboard, EntryInfo};
pub use crate::config::{NodeConfig, TickOption, TickOptions};
pub use crate::container::{BehaviorNodeContainer, NodeId};
pub use crate::context::Context;
pub use crate::controls::{
    ControlKind, ControlNode, FallbackNode, FallbackWithMemoryNode, IfThenElseNode,
    ParallelAllNode, ParallelNode, ReactiveFallbackNode, ReactiveSequenceNode, SequenceNode,
    SequenceWithMemoryNode, SwitchNode, TryCatchNode, WhileDoElseNode,
};
pub use crate::convert::{loosely_equal, AnyValue, PortValue, TypeInfo};
pub use crate::coroutine::{CoroActionNode, Coroutine};
pub use crate::decorators::{
    BlackboardCheckNode, DecoratorKind, DecoratorNode, DelayNode, EntryUpdatedNode,
    ForceFailureNode, ForceSuccessNode, InverterNode, KeepRunningUntilFailureNode, LoopNode,
    QueueItem, RepeatNode, RetryNode, RunOnceNode, TimeoutNode,
};
pub use crate::error::{BehaviorError, BlackboardError, BuildError, Result};
pub use crate::observer::{NodeStatistics, StatusCallback, StatusChangeSubscriber, TreeObserver};
pub use crate::port::{PortBinding, PortDirection, PortSpec};
pub use crate::symbol::Symbol;
pub use crate::threaded::{ThreadedAction, ThreadedActionNode};
pub use crate::timer::{TimerId, TimerQueue};
pub use crate::tree::{ChildNode, ChildNodes, Tree};
pub use crate::wakeup::WakeUpSignal;
pub use ::once_cell::sync::Lazy;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failure,
    Skipped,
}

impl NodeStatus {
    /// Neither IDLE nor SKIPPED.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Skipped)
    }

    /// SUCCESS or FAILURE.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Action,
    Condition,
    Control,
    Decorator,
    SubTree,
}

/// A leaf node evaluated on the ticking thread.
///
/// Wrap it in a [`LeafNode`] to pick how the tree treats it: as a condition,
/// a synchronous action or a polled action that may return `Running`.
pub trait BehaviorNode: Send {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus>;

    /// Called when the node is halted while `Running`.
    fn halt(&mut self) {}
}

#[macro_export]
macro_rules! hash_map {
    () => {
        std::collections::HashMap::default()
    };
    ($($name: expr => $val: expr),+ $(,)?) => {{
        let mut ret = std::collections::HashMap::default();
        $(ret.insert($name.into(), $val.into());)+
        ret
    }};
}
