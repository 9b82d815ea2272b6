//! Actions written as explicit resumable state machines.

use tracing::debug;

use crate::{error::Result, Context, NodeStatus, PortSpec};

/// A suspended computation, resumed once per tick on the ticking thread.
///
/// Returning `Running` suspends it until the next tick. Any other status
/// completes it, and the frame is dropped: the next start builds a new one.
pub trait Coroutine: Send {
    fn resume(&mut self, ctx: &Context) -> Result<NodeStatus>;

    /// Called instead of the next `resume` when the node is halted while suspended.
    fn on_halted(&mut self) {}
}

type Factory = Box<dyn FnMut() -> Box<dyn Coroutine> + Send>;

/// Leaf adapter driving a [`Coroutine`]. Halting it discards the suspended
/// frame so that nothing after the suspension point ever runs.
pub struct CoroActionNode {
    factory: Factory,
    frame: Option<Box<dyn Coroutine>>,
    ports: Vec<PortSpec>,
}

impl CoroActionNode {
    pub fn new<C: Coroutine + 'static>(
        ports: Vec<PortSpec>,
        mut factory: impl FnMut() -> C + Send + 'static,
    ) -> Self {
        Self {
            factory: Box::new(move || Box::new(factory()) as Box<dyn Coroutine>),
            frame: None,
            ports,
        }
    }

    pub(crate) fn provided_ports(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    /// Whether a frame is currently suspended.
    pub fn is_suspended(&self) -> bool {
        self.frame.is_some()
    }

    pub(crate) fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        let frame = self.frame.get_or_insert_with(&mut self.factory);
        let result = frame.resume(ctx);
        if !matches!(result, Ok(NodeStatus::Running)) {
            self.frame = None;
        }
        result
    }

    pub(crate) fn halt(&mut self) {
        if let Some(mut frame) = self.frame.take() {
            debug!("discarding suspended coroutine");
            frame.on_halted();
        }
    }
}
