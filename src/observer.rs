use std::{collections::HashMap, sync::Arc, time::Instant};

use parking_lot::Mutex;

use crate::{BehaviorNodeContainer, NodeId, NodeStatus, Tree};

/// Signature of status-change callbacks: timestamp, node, previous and new status.
pub type StatusCallback =
    dyn Fn(Instant, &BehaviorNodeContainer, NodeStatus, NodeStatus) + Send + Sync;

/// Keeps a status-change subscription alive. Dropping it unsubscribes.
#[must_use = "the subscription ends when the subscriber is dropped"]
pub struct StatusChangeSubscriber {
    _callback: Arc<StatusCallback>,
}

impl StatusChangeSubscriber {
    pub(crate) fn new(callback: Arc<StatusCallback>) -> Self {
        Self {
            _callback: callback,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatistics {
    /// Last status seen, IDLE included.
    pub current_status: NodeStatus,
    /// Last SUCCESS or FAILURE.
    pub last_result: NodeStatus,
    /// Transitions to anything but IDLE.
    pub transitions_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skip_count: usize,
    pub last_timestamp: Option<Instant>,
}

/// Collects per-node [`NodeStatistics`] for every node of a tree.
pub struct TreeObserver {
    statistics: Arc<Mutex<HashMap<NodeId, NodeStatistics>>>,
    _subscriber: StatusChangeSubscriber,
}

impl TreeObserver {
    pub fn new(tree: &mut Tree) -> Self {
        let statistics: HashMap<_, _> = tree
            .nodes()
            .map(|node| (node.id(), NodeStatistics::default()))
            .collect();
        let statistics = Arc::new(Mutex::new(statistics));
        let recorder = statistics.clone();
        let subscriber = tree.subscribe_all(move |timestamp, node, _prev, status| {
            let mut statistics = recorder.lock();
            let stats = statistics.entry(node.id()).or_default();
            stats.current_status = status;
            stats.last_timestamp = Some(timestamp);
            if status == NodeStatus::Idle {
                return;
            }
            stats.transitions_count += 1;
            match status {
                NodeStatus::Success => {
                    stats.last_result = status;
                    stats.success_count += 1;
                }
                NodeStatus::Failure => {
                    stats.last_result = status;
                    stats.failure_count += 1;
                }
                NodeStatus::Skipped => stats.skip_count += 1,
                NodeStatus::Idle | NodeStatus::Running => {}
            }
        });
        Self {
            statistics,
            _subscriber: subscriber,
        }
    }

    pub fn statistics(&self, id: NodeId) -> Option<NodeStatistics> {
        self.statistics.lock().get(&id).cloned()
    }

    /// Statistics of the first node named `name`.
    pub fn statistics_by_name(&self, tree: &Tree, name: &str) -> Option<NodeStatistics> {
        self.statistics(tree.find(name)?)
    }

    pub fn reset(&self) {
        for stats in self.statistics.lock().values_mut() {
            *stats = NodeStatistics::default();
        }
    }
}
