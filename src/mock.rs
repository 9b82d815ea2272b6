//! Scripted leaves for unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{BehaviorNode, Context, LeafNode, NodeConfig, NodeId, NodeStatus, Result, Tree};

/// Handle observing and steering a [`Scripted`] leaf.
#[derive(Clone, Default)]
pub(crate) struct Probe {
    ticks: Arc<AtomicUsize>,
    halts: Arc<AtomicUsize>,
    script: Arc<Mutex<VecDeque<NodeStatus>>>,
}

impl Probe {
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn halts(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }

    /// Replaces the remaining script.
    pub fn script(&self, statuses: &[NodeStatus]) {
        *self.script.lock() = statuses.iter().copied().collect();
    }
}

/// Returns the statuses of its script in order, repeating the last one.
pub(crate) struct Scripted {
    probe: Probe,
    last: NodeStatus,
}

impl BehaviorNode for Scripted {
    fn tick(&mut self, _ctx: &Context) -> Result<NodeStatus> {
        self.probe.ticks.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.probe.script.lock().pop_front() {
            self.last = status;
        }
        Ok(self.last)
    }

    fn halt(&mut self) {
        self.probe.halts.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn scripted(tree: &mut Tree, name: &str, statuses: &[NodeStatus]) -> (NodeId, Probe) {
    let probe = Probe::default();
    probe.script(statuses);
    let node = Scripted {
        probe: probe.clone(),
        last: NodeStatus::Success,
    };
    let id = tree
        .new_leaf_node(LeafNode::action(node), name, NodeConfig::new())
        .unwrap();
    (id, probe)
}

/// Adds scripted children to `parent`.
pub(crate) fn scripted_children(
    tree: &mut Tree,
    parent: NodeId,
    scripts: &[&[NodeStatus]],
) -> Vec<Probe> {
    scripts
        .iter()
        .enumerate()
        .map(|(i, script)| {
            let (id, probe) = scripted(tree, &format!("child{}", i), script);
            tree.add_child(parent, id).unwrap();
            probe
        })
        .collect()
}
