//! Arena holding every node of a behavior tree, with the construction and
//! driving APIs.

use std::{
    collections::HashMap,
    sync::{atomic::AtomicBool, Arc, Weak},
    time::{Duration, Instant},
};

use tracing::{debug, error, trace, warn};

use crate::{
    config::{NodeConfig, TickOption, TickOptions},
    container::NodeKind,
    context::NodeInfo,
    error::{AddChildResult, BehaviorError, BuildError, ConvertError, Result},
    observer::{StatusCallback, StatusChangeSubscriber},
    BehaviorNodeContainer, Blackboard, Context, ControlKind, DecoratorKind, LeafNode, NodeId,
    NodeStatus, NodeType, PortBinding, PortDirection, PortSpec, PortValue, Symbol, TimerQueue,
    WakeUpSignal,
};

pub struct Tree {
    nodes: Vec<BehaviorNodeContainer>,
    root: Option<NodeId>,
    blackboard: Arc<Blackboard>,
    wake_up: Arc<WakeUpSignal>,
    timer: Arc<TimerQueue>,
    /// Cancellation flags of the decorators enclosing the node being ticked.
    cancel_scope: Vec<Arc<AtomicBool>>,
    /// Set once a tick failed with an error; the tree refuses to tick afterwards.
    aborted: Option<BehaviorError>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self::with_blackboard(Blackboard::create(None))
    }

    pub fn with_blackboard(blackboard: Arc<Blackboard>) -> Self {
        Self {
            nodes: vec![],
            root: None,
            blackboard,
            wake_up: Arc::new(WakeUpSignal::new()),
            timer: Arc::new(TimerQueue::new()),
            cancel_scope: vec![],
            aborted: None,
        }
    }

    /// Blackboard used by nodes whose configuration doesn't name one.
    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.blackboard
    }

    pub fn wake_up_signal(&self) -> &Arc<WakeUpSignal> {
        &self.wake_up
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&BehaviorNodeContainer> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BehaviorNodeContainer> {
        self.nodes.iter()
    }

    pub fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.node(id).map(|node| node.status)
    }

    /// Declared port table of a node.
    pub fn ports(&self, id: NodeId) -> Option<&[PortSpec]> {
        self.node(id).map(|node| node.ports())
    }

    /// First node with the given instance name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|node| node.name() == name)
            .map(|node| node.id())
    }

    /// The error that stopped this tree, if any.
    pub fn error(&self) -> Option<&BehaviorError> {
        self.aborted.as_ref()
    }

    fn check(&self, id: NodeId) -> Result<(), BuildError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(BuildError::UnknownNode(id.0))
        }
    }

    pub fn new_control_node(
        &mut self,
        kind: ControlKind,
        name: &str,
        config: NodeConfig,
    ) -> Result<NodeId, BuildError> {
        let node = kind.instantiate();
        let ports = node.provided_ports();
        self.insert_node(
            name,
            kind.registration_name(),
            NodeType::Control,
            ports,
            config,
            NodeKind::Control {
                node,
                children: vec![],
            },
        )
    }

    pub fn new_decorator_node(
        &mut self,
        kind: DecoratorKind,
        name: &str,
        config: NodeConfig,
    ) -> Result<NodeId, BuildError> {
        let node = kind.instantiate();
        let ports = node.provided_ports();
        self.insert_node(
            name,
            kind.registration_name(),
            NodeType::Decorator,
            ports,
            config,
            NodeKind::Decorator { node, child: None },
        )
    }

    pub fn new_leaf_node(
        &mut self,
        leaf: LeafNode,
        name: &str,
        config: NodeConfig,
    ) -> Result<NodeId, BuildError> {
        let ports = leaf.provided_ports();
        let node_type = leaf.node_type();
        let registration_name = leaf.registration_name();
        self.insert_node(
            name,
            registration_name,
            node_type,
            ports,
            config,
            NodeKind::Leaf(leaf),
        )
    }

    /// Creates a subtree node owning a new blackboard whose parent is the
    /// configured one. Port bindings of the configuration become remappings
    /// (`{parent_key}`) or initial values (literals) of the new blackboard;
    /// the `_autoremap` port toggles auto-remapping.
    pub fn new_subtree_node(
        &mut self,
        name: &str,
        config: NodeConfig,
    ) -> Result<NodeId, BuildError> {
        let outer = config
            .blackboard
            .clone()
            .unwrap_or_else(|| self.blackboard.clone());
        let inner = Blackboard::create(Some(outer.clone()));
        let mut ports: Vec<_> = config.ports.iter().collect();
        ports.sort();
        for (port, text) in ports {
            if port == "_autoremap" {
                let enable = bool::from_port_str(text).map_err(|source| BuildError::InvalidLiteral {
                    node: name.to_owned(),
                    port: port.clone(),
                    source,
                })?;
                inner.enable_auto_remapping(enable);
                continue;
            }
            match PortBinding::parse(port.as_str(), text) {
                PortBinding::Literal(literal) => inner.set(port.as_str(), literal)?,
                PortBinding::Ref(key) => inner.add_remapping(port.as_str(), key),
                PortBinding::Global(key) => inner.add_remapping(port.as_str(), format!("@{}", key)),
            }
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(BehaviorNodeContainer::new(
            NodeInfo {
                id,
                name: name.to_owned(),
                registration_name: "SubTree".to_owned(),
                node_type: NodeType::SubTree,
                blackboard: outer,
                ports: vec![],
                bindings: HashMap::new(),
            },
            NodeKind::SubTree {
                blackboard: inner,
                child: None,
            },
        ));
        Ok(id)
    }

    /// Blackboard owned by a subtree node; pass it in the configuration of the nodes inside.
    pub fn subtree_blackboard(&self, id: NodeId) -> Option<Arc<Blackboard>> {
        match &self.node(id)?.kind {
            NodeKind::SubTree { blackboard, .. } => Some(blackboard.clone()),
            _ => None,
        }
    }

    fn insert_node(
        &mut self,
        name: &str,
        registration_name: String,
        node_type: NodeType,
        ports: Vec<PortSpec>,
        config: NodeConfig,
        kind: NodeKind,
    ) -> Result<NodeId, BuildError> {
        let blackboard = config
            .blackboard
            .clone()
            .unwrap_or_else(|| self.blackboard.clone());
        let bindings = bind_ports(name, &ports, &config.ports, &blackboard)?;
        let id = NodeId(self.nodes.len());
        trace!("created node {} [{}] of kind {}", id, name, registration_name);
        self.nodes.push(BehaviorNodeContainer::new(
            NodeInfo {
                id,
                name: name.to_owned(),
                registration_name,
                node_type,
                blackboard,
                ports,
                bindings,
            },
            kind,
        ));
        Ok(id)
    }

    fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes[node.0].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Appends `child` to a control node, or attaches it to an empty decorator or subtree.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> AddChildResult {
        self.check(parent)?;
        self.check(child)?;
        if self.nodes[child.0].parent.is_some() || self.root == Some(child) {
            return Err(BuildError::AlreadyHasParent(self.nodes[child.0].name().to_owned()));
        }
        if self.is_ancestor(child, parent) {
            return Err(BuildError::Cycle {
                child: self.nodes[child.0].name().to_owned(),
            });
        }
        let parent_name = self.nodes[parent.0].name().to_owned();
        match &mut self.nodes[parent.0].kind {
            NodeKind::Control { children, .. } => children.push(child),
            NodeKind::Decorator { child: slot, .. } | NodeKind::SubTree { child: slot, .. } => {
                if slot.is_some() {
                    return Err(BuildError::TooManyChildren(parent_name));
                }
                *slot = Some(child);
            }
            NodeKind::Leaf(_) | NodeKind::Busy => {
                return Err(BuildError::NotAComposite(parent_name));
            }
        }
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Sets the only child of a decorator or subtree, detaching the previous one.
    pub fn set_child(&mut self, parent: NodeId, child: NodeId) -> AddChildResult {
        self.check(parent)?;
        self.check(child)?;
        let previous = match &mut self.nodes[parent.0].kind {
            NodeKind::Decorator { child: slot, .. } | NodeKind::SubTree { child: slot, .. } => {
                slot.take()
            }
            _ => {
                return Err(BuildError::NotAComposite(
                    self.nodes[parent.0].name().to_owned(),
                ))
            }
        };
        if let Some(previous) = previous {
            self.nodes[previous.0].parent = None;
        }
        let result = self.add_child(parent, child);
        if result.is_err() {
            if let Some(previous) = previous {
                // Restore the old child
                self.add_child(parent, previous)?;
            }
        }
        result
    }

    pub fn set_root(&mut self, id: NodeId) -> AddChildResult {
        self.check(id)?;
        if self.nodes[id.0].parent.is_some() {
            return Err(BuildError::AlreadyHasParent(self.nodes[id.0].name().to_owned()));
        }
        self.root = Some(id);
        Ok(())
    }

    pub(crate) fn context(&self, id: NodeId) -> Context {
        Context::new(
            self.nodes[id.0].info.clone(),
            self.wake_up.clone(),
            self.timer.clone(),
            self.cancel_scope.clone(),
        )
    }

    /// Ticks a single node once.
    ///
    /// An error is logged and stops the tree: further ticks return the same error.
    pub fn tick(&mut self, id: NodeId) -> Result<NodeStatus> {
        if let Some(e) = &self.aborted {
            return Err(e.clone());
        }
        if id.0 >= self.nodes.len() {
            return Err(BehaviorError::logic(format!("node {} does not exist", id)));
        }
        let result = self.tick_node(id);
        if let Err(e) = &result {
            error!("tree stopped while ticking node {}: {}", id, e);
            self.aborted = Some(e.clone());
        }
        result
    }

    pub(crate) fn tick_node(&mut self, id: NodeId) -> Result<NodeStatus> {
        let mut kind = std::mem::replace(&mut self.nodes[id.0].kind, NodeKind::Busy);
        let ctx = self.context(id);
        let result = match &mut kind {
            NodeKind::Control { node, children } => {
                node.tick(&mut ChildNodes::new(self, children), &ctx)
            }
            NodeKind::Decorator {
                node,
                child: Some(child),
            } => node.tick(&mut ChildNode::new(self, *child), &ctx),
            NodeKind::SubTree {
                child: Some(child), ..
            } => self.tick_node(*child),
            NodeKind::Decorator { child: None, .. } | NodeKind::SubTree { child: None, .. } => {
                Err(BehaviorError::logic(format!(
                    "[{}] was ticked without a child",
                    ctx.name()
                )))
            }
            NodeKind::Leaf(leaf) => leaf.tick(&ctx),
            NodeKind::Busy => Err(BehaviorError::logic(format!(
                "[{}] was ticked while already being ticked",
                ctx.name()
            ))),
        };
        self.nodes[id.0].kind = kind;
        let status = result?;
        if status == NodeStatus::Idle {
            return Err(BehaviorError::logic(format!(
                "[{}] returned IDLE from tick",
                ctx.name()
            )));
        }
        self.set_status(id, status);
        Ok(status)
    }

    /// Ticks `id` with `flag` visible to every context created below it.
    fn tick_node_cancellable(&mut self, id: NodeId, flag: Arc<AtomicBool>) -> Result<NodeStatus> {
        self.cancel_scope.push(flag);
        let result = self.tick_node(id);
        self.cancel_scope.pop();
        result
    }

    /// Halts a node and all its running descendants, leaving them IDLE.
    /// Halting an idle node is a no-op apart from resetting its internal state.
    pub fn halt(&mut self, id: NodeId) {
        if id.0 < self.nodes.len() {
            self.halt_node(id);
        }
    }

    pub fn halt_tree(&mut self) {
        if let Some(root) = self.root {
            self.halt_node(root);
        }
    }

    fn halt_node(&mut self, id: NodeId) {
        let was_running = self.nodes[id.0].status == NodeStatus::Running;
        let mut kind = std::mem::replace(&mut self.nodes[id.0].kind, NodeKind::Busy);
        match &mut kind {
            NodeKind::Control { node, children } => {
                node.halt();
                for child in children.iter() {
                    self.reset_node(*child);
                }
            }
            NodeKind::Decorator { node, child } => {
                node.halt();
                if let Some(child) = child {
                    self.reset_node(*child);
                }
            }
            NodeKind::SubTree { child, .. } => {
                if let Some(child) = child {
                    self.reset_node(*child);
                }
            }
            NodeKind::Leaf(leaf) => {
                if was_running {
                    debug!("halting [{}]", self.nodes[id.0].name());
                    leaf.halt();
                }
            }
            NodeKind::Busy => warn!("[{}] halted while being ticked", self.nodes[id.0].name()),
        }
        self.nodes[id.0].kind = kind;
        self.set_status(id, NodeStatus::Idle);
    }

    /// Halts `id` if it is running, then resets its status to IDLE.
    pub(crate) fn reset_node(&mut self, id: NodeId) {
        if self.nodes[id.0].status == NodeStatus::Running {
            self.halt_node(id);
        } else {
            self.set_status(id, NodeStatus::Idle);
        }
    }

    /// Whether the subtree under `id` contains nodes that complete across several ticks.
    pub(crate) fn requires_wake_up(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::Leaf(leaf) => leaf.is_async(),
            _ => node
                .children()
                .iter()
                .any(|child| self.requires_wake_up(*child)),
        }
    }

    fn set_status(&mut self, id: NodeId, status: NodeStatus) {
        let node = &mut self.nodes[id.0];
        let prev = node.status;
        if prev == status {
            return;
        }
        node.status = status;
        trace!(node = %node.info.name, id = id.0, "{} -> {}", prev, status);
        if node.subscribers.is_empty() {
            return;
        }
        node.subscribers.retain(|s| s.strong_count() > 0);
        let callbacks: Vec<_> = node.subscribers.iter().filter_map(Weak::upgrade).collect();
        let now = Instant::now();
        let node = &self.nodes[id.0];
        for callback in callbacks {
            (*callback)(now, node, prev, status);
        }
    }

    /// Registers `callback` for every status transition of `id`, including
    /// transitions to IDLE. The subscription lasts as long as the returned handle.
    pub fn subscribe_status_change(
        &mut self,
        id: NodeId,
        callback: impl Fn(Instant, &BehaviorNodeContainer, NodeStatus, NodeStatus)
            + Send
            + Sync
            + 'static,
    ) -> Result<StatusChangeSubscriber, BuildError> {
        self.check(id)?;
        let callback: Arc<StatusCallback> = Arc::new(callback);
        self.nodes[id.0]
            .subscribers
            .push(Arc::downgrade(&callback));
        Ok(StatusChangeSubscriber::new(callback))
    }

    /// Registers one callback on every node currently in the tree.
    pub fn subscribe_all(
        &mut self,
        callback: impl Fn(Instant, &BehaviorNodeContainer, NodeStatus, NodeStatus)
            + Send
            + Sync
            + 'static,
    ) -> StatusChangeSubscriber {
        let callback: Arc<StatusCallback> = Arc::new(callback);
        for node in &mut self.nodes {
            node.subscribers.push(Arc::downgrade(&callback));
        }
        StatusChangeSubscriber::new(callback)
    }

    /// Visits `root` and its descendants depth-first, parents before children.
    pub fn for_each_node(&self, root: NodeId, mut visitor: impl FnMut(&BehaviorNodeContainer)) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            visitor(node);
            stack.extend(node.children().iter().rev());
        }
    }

    /// Ticks the root once, ignoring wake-up signals.
    pub fn tick_exactly_once(&mut self) -> Result<NodeStatus> {
        self.tick_root(TickOption::ExactlyOnce, Duration::ZERO)
    }

    /// Ticks the root once, then again for as long as nodes emit wake-up signals.
    pub fn tick_once(&mut self) -> Result<NodeStatus> {
        self.tick_root(TickOption::OnceUnlessWokenUp, Duration::ZERO)
    }

    /// Ticks the root until it stops returning RUNNING, waiting up to
    /// `sleep` (or until a wake-up signal) between ticks.
    pub fn tick_while_running(&mut self, sleep: Duration) -> Result<NodeStatus> {
        self.tick_root(TickOption::WhileRunning, sleep)
    }

    pub fn tick_with(&mut self, options: &TickOptions) -> Result<NodeStatus> {
        self.tick_root(options.mode, Duration::from_millis(options.sleep_ms))
    }

    fn tick_root(&mut self, option: TickOption, sleep: Duration) -> Result<NodeStatus> {
        let root = self
            .root
            .ok_or_else(|| BehaviorError::logic("the tree has no root node"))?;
        let mut status = NodeStatus::Idle;
        while status == NodeStatus::Idle
            || (option == TickOption::WhileRunning && status == NodeStatus::Running)
        {
            status = self.tick(root)?;

            // A wake-up raised during the tick asks for another one right away.
            while option != TickOption::ExactlyOnce
                && status == NodeStatus::Running
                && self.wake_up.wait_for(Duration::ZERO)
            {
                status = self.tick(root)?;
            }

            if status.is_completed() {
                self.set_status(root, NodeStatus::Idle);
            }
            if status == NodeStatus::Running && !sleep.is_zero() {
                self.wake_up.wait_for(sleep);
            }
        }
        Ok(status)
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        self.halt_tree();
    }
}

fn bind_ports(
    node: &str,
    ports: &[PortSpec],
    config: &HashMap<String, String>,
    blackboard: &Arc<Blackboard>,
) -> Result<HashMap<Symbol, PortBinding>, BuildError> {
    let mut bindings = HashMap::new();
    for (port, text) in config {
        let spec = ports
            .iter()
            .find(|spec| spec.key == port.as_str())
            .ok_or_else(|| BuildError::UnknownPort {
                node: node.to_owned(),
                port: port.clone(),
            })?;
        bindings.insert(spec.key, PortBinding::parse(spec.key, text));
    }
    for spec in ports {
        if let (false, Some(default)) = (bindings.contains_key(&spec.key), &spec.default) {
            bindings.insert(spec.key, PortBinding::parse(spec.key, default));
        }
    }
    for spec in ports {
        match bindings.get(&spec.key) {
            Some(PortBinding::Literal(literal)) => {
                if spec.direction != PortDirection::Input {
                    return Err(BuildError::LiteralOnOutput {
                        node: node.to_owned(),
                        port: spec.key.to_string(),
                        literal: literal.clone(),
                    });
                }
                if let Err(source @ ConvertError::Parse { .. }) = spec.type_info.parse(literal) {
                    return Err(BuildError::InvalidLiteral {
                        node: node.to_owned(),
                        port: spec.key.to_string(),
                        source,
                    });
                }
            }
            Some(PortBinding::Ref(key)) => blackboard.create_entry(*key, spec.type_info)?,
            Some(PortBinding::Global(key)) => blackboard.root().create_entry(*key, spec.type_info)?,
            None => {}
        }
    }
    Ok(bindings)
}

/// Children of a control node, handed to [`crate::ControlNode::tick`].
pub struct ChildNodes<'a> {
    tree: &'a mut Tree,
    ids: &'a [NodeId],
}

impl<'a> ChildNodes<'a> {
    pub(crate) fn new(tree: &'a mut Tree, ids: &'a [NodeId]) -> Self {
        Self { tree, ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, index: usize) -> NodeId {
        self.ids[index]
    }

    pub fn tick(&mut self, index: usize) -> Result<NodeStatus> {
        self.tree.tick_node(self.ids[index])
    }

    pub fn status(&self, index: usize) -> NodeStatus {
        self.tree.nodes[self.ids[index].0].status
    }

    /// Halts the child if it is running and resets it to IDLE.
    pub fn halt(&mut self, index: usize) {
        self.tree.reset_node(self.ids[index]);
    }

    /// Halts and resets every child from `start` on.
    pub fn halt_from(&mut self, start: usize) {
        let ids = self.ids;
        for id in &ids[start.min(ids.len())..] {
            self.tree.reset_node(*id);
        }
    }

    pub fn reset_all(&mut self) {
        self.halt_from(0);
    }

    pub fn requires_wake_up(&self, index: usize) -> bool {
        self.tree.requires_wake_up(self.ids[index])
    }
}

/// The child of a decorator, handed to [`crate::DecoratorNode::tick`].
pub struct ChildNode<'a> {
    tree: &'a mut Tree,
    id: NodeId,
}

impl<'a> ChildNode<'a> {
    pub(crate) fn new(tree: &'a mut Tree, id: NodeId) -> Self {
        Self { tree, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tick(&mut self) -> Result<NodeStatus> {
        self.tree.tick_node(self.id)
    }

    /// Ticks the child so that raising `flag` from any thread is seen by the
    /// child's descendants through [`Context::is_halt_requested`]. Threaded
    /// actions started during this tick keep observing it until they return.
    pub fn tick_cancellable(&mut self, flag: Arc<AtomicBool>) -> Result<NodeStatus> {
        self.tree.tick_node_cancellable(self.id, flag)
    }

    pub fn status(&self) -> NodeStatus {
        self.tree.nodes[self.id.0].status
    }

    /// Halts the child if it is running and resets it to IDLE.
    pub fn halt(&mut self) {
        self.tree.reset_node(self.id);
    }

    pub fn requires_wake_up(&self) -> bool {
        self.tree.requires_wake_up(self.id)
    }
}

#[cfg(test)]
mod test;
