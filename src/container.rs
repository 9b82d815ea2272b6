use std::{
    fmt::{self, Display, Formatter},
    sync::{Arc, Weak},
};

use crate::{
    context::NodeInfo, observer::StatusCallback, Blackboard, ControlNode, DecoratorNode,
    LeafNode, NodeStatus, NodeType, PortSpec,
};

/// Stable identifier of a node inside its [`crate::Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) enum NodeKind {
    Control {
        node: Box<dyn ControlNode>,
        children: Vec<NodeId>,
    },
    Decorator {
        node: Box<dyn DecoratorNode>,
        child: Option<NodeId>,
    },
    SubTree {
        blackboard: Arc<Blackboard>,
        child: Option<NodeId>,
    },
    Leaf(LeafNode),
    /// Placeholder while the node is being ticked or halted.
    Busy,
}

pub struct BehaviorNodeContainer {
    pub(crate) info: Arc<NodeInfo>,
    pub(crate) kind: NodeKind,
    pub(crate) status: NodeStatus,
    pub(crate) parent: Option<NodeId>,
    pub(crate) subscribers: Vec<Weak<StatusCallback>>,
}

impl BehaviorNodeContainer {
    pub(crate) fn new(info: NodeInfo, kind: NodeKind) -> Self {
        Self {
            info: Arc::new(info),
            kind,
            status: NodeStatus::Idle,
            parent: None,
            subscribers: vec![],
        }
    }

    pub fn id(&self) -> NodeId {
        self.info.id
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Name of the type of the node
    pub fn registration_name(&self) -> &str {
        &self.info.registration_name
    }

    pub fn node_type(&self) -> NodeType {
        self.info.node_type
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.info.blackboard
    }

    pub fn ports(&self) -> &[PortSpec] {
        &self.info.ports
    }

    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Control { children, .. } => children,
            NodeKind::Decorator { child, .. } | NodeKind::SubTree { child, .. } => {
                match child {
                    Some(child) => std::slice::from_ref(child),
                    None => &[],
                }
            }
            NodeKind::Leaf(_) | NodeKind::Busy => &[],
        }
    }
}

impl std::fmt::Debug for BehaviorNodeContainer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorNodeContainer")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("registration_name", &self.info.registration_name)
            .field("status", &self.status)
            .field("children", &self.children())
            .finish()
    }
}
