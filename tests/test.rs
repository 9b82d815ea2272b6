use anyhow::Result;
use behavior_tree_core::{
    AlwaysFailure, BehaviorError, BehaviorNode, BlackboardError, BuildError, Context, ControlKind,
    Coroutine, DecoratorKind, LeafNode, NodeConfig, NodeStatus, PopFromQueue, PortSpec, QueueSize,
    SetBlackboard, SimpleAction, SimpleCondition, ThreadedAction, Tree,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Leaf counting its ticks, returning RUNNING for `running_for` ticks before `result`.
struct Counting {
    ticks: Arc<AtomicUsize>,
    running_for: usize,
    result: NodeStatus,
}

impl Counting {
    fn new(running_for: usize, result: NodeStatus) -> (Self, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        (
            Self {
                ticks: ticks.clone(),
                running_for,
                result,
            },
            ticks,
        )
    }
}

impl BehaviorNode for Counting {
    fn tick(&mut self, _ctx: &Context) -> behavior_tree_core::Result<NodeStatus> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(if tick < self.running_for {
            NodeStatus::Running
        } else {
            self.result
        })
    }
}

fn counting_leaf(
    tree: &mut Tree,
    name: &str,
    running_for: usize,
    result: NodeStatus,
) -> Result<(behavior_tree_core::NodeId, Arc<AtomicUsize>)> {
    let (node, ticks) = Counting::new(running_for, result);
    let id = tree.new_leaf_node(LeafNode::action(node), name, NodeConfig::new())?;
    Ok((id, ticks))
}

#[test]
fn test_sequence() -> Result<()> {
    let mut tree = Tree::new();
    let root = tree.new_control_node(ControlKind::Sequence, "seq", NodeConfig::new())?;
    let (a, a_ticks) = counting_leaf(&mut tree, "a", 0, NodeStatus::Success)?;
    let (b, b_ticks) = counting_leaf(&mut tree, "b", 1, NodeStatus::Success)?;
    tree.add_child(root, a)?;
    tree.add_child(root, b)?;
    tree.set_root(root)?;

    assert_eq!(tree.tick_exactly_once()?, NodeStatus::Running);
    assert_eq!(tree.tick_exactly_once()?, NodeStatus::Success);
    assert_eq!(a_ticks.load(Ordering::SeqCst), 1);
    assert_eq!(b_ticks.load(Ordering::SeqCst), 2);

    let failing = tree.new_leaf_node(LeafNode::sync_action(AlwaysFailure), "c", NodeConfig::new())?;
    tree.add_child(root, failing)?;
    assert_eq!(tree.tick_while_running(Duration::from_millis(1))?, NodeStatus::Failure);
    assert_eq!(a_ticks.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_parallel_two_of_three() -> Result<()> {
    let mut tree = Tree::new();
    let root = tree.new_control_node(
        ControlKind::Parallel,
        "par",
        NodeConfig::new()
            .with_port("success_count", "2")
            .with_port("failure_count", "1"),
    )?;
    let (fast, _) = counting_leaf(&mut tree, "fast", 1, NodeStatus::Success)?;
    let (medium, _) = counting_leaf(&mut tree, "medium", 2, NodeStatus::Success)?;
    let (slow, slow_ticks) = counting_leaf(&mut tree, "slow", 10, NodeStatus::Failure)?;
    for child in [fast, medium, slow] {
        tree.add_child(root, child)?;
    }
    tree.set_root(root)?;

    assert_eq!(tree.tick_while_running(Duration::from_millis(1))?, NodeStatus::Success);
    assert_eq!(slow_ticks.load(Ordering::SeqCst), 2);
    assert_eq!(tree.status(slow), Some(NodeStatus::Idle));
    Ok(())
}

#[test]
fn test_retry_counts_attempts() -> Result<()> {
    for (succeed_on, expected) in [(None, NodeStatus::Failure), (Some(2), NodeStatus::Success)] {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut tree = Tree::new();
        let root =
            tree.new_decorator_node(DecoratorKind::Retry(Some(3)), "retry", NodeConfig::new())?;
        let child = tree.new_leaf_node(
            LeafNode::sync_action(SimpleAction::new(move |_| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if Some(attempt) == succeed_on {
                    NodeStatus::Success
                } else {
                    NodeStatus::Failure
                })
            })),
            "attempt",
            NodeConfig::new(),
        )?;
        tree.set_child(root, child)?;
        tree.set_root(root)?;

        assert_eq!(tree.tick_once()?, expected);
        assert_eq!(attempts.load(Ordering::SeqCst), succeed_on.unwrap_or(3));
    }
    Ok(())
}

/// Sleeps without looking at the halt flag.
struct Stubborn {
    sleep: Duration,
}

impl ThreadedAction for Stubborn {
    fn tick(&mut self, _ctx: &Context) -> behavior_tree_core::Result<NodeStatus> {
        thread::sleep(self.sleep);
        Ok(NodeStatus::Success)
    }
}

/// Polls the halt flag while working.
struct Cooperative {
    halted: Arc<AtomicBool>,
}

impl ThreadedAction for Cooperative {
    fn tick(&mut self, ctx: &Context) -> behavior_tree_core::Result<NodeStatus> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if ctx.is_halt_requested() {
                return Ok(NodeStatus::Failure);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(NodeStatus::Success)
    }

    fn on_halted(&mut self) {
        self.halted.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_threaded_halt_waits_for_worker() -> Result<()> {
    let mut tree = Tree::new();
    let leaf = tree.new_leaf_node(
        LeafNode::threaded(Stubborn {
            sleep: Duration::from_millis(500),
        }),
        "stubborn",
        NodeConfig::new(),
    )?;
    tree.set_root(leaf)?;
    assert_eq!(tree.tick_exactly_once()?, NodeStatus::Running);
    thread::sleep(Duration::from_millis(10));

    let start = Instant::now();
    tree.halt_tree();
    assert!(start.elapsed() >= Duration::from_millis(400));
    assert_eq!(tree.status(leaf), Some(NodeStatus::Idle));
    Ok(())
}

#[test]
fn test_threaded_cooperative_halt() -> Result<()> {
    let halted = Arc::new(AtomicBool::new(false));
    let mut tree = Tree::new();
    let leaf = tree.new_leaf_node(
        LeafNode::threaded(Cooperative {
            halted: halted.clone(),
        }),
        "cooperative",
        NodeConfig::new(),
    )?;
    tree.set_root(leaf)?;
    assert_eq!(tree.tick_exactly_once()?, NodeStatus::Running);

    let start = Instant::now();
    tree.halt_tree();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(halted.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_threaded_completion_wakes_driver() -> Result<()> {
    let mut tree = Tree::new();
    let leaf = tree.new_leaf_node(
        LeafNode::threaded(Stubborn {
            sleep: Duration::from_millis(20),
        }),
        "short",
        NodeConfig::new(),
    )?;
    tree.set_root(leaf)?;

    // The worker's wake-up signal cuts the long sleep short
    let start = Instant::now();
    assert_eq!(tree.tick_while_running(Duration::from_secs(10))?, NodeStatus::Success);
    assert!(start.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[test]
fn test_blackboard_ports() -> Result<()> {
    let mut tree = Tree::new();
    let root = tree.new_control_node(ControlKind::Sequence, "seq", NodeConfig::new())?;
    let set = tree.new_leaf_node(
        LeafNode::sync_action(SetBlackboard),
        "set",
        NodeConfig::new()
            .with_port("value", "42")
            .with_port("output_key", "{answer}"),
    )?;
    let check = tree.new_leaf_node(
        LeafNode::condition(SimpleCondition::with_ports(
            vec![PortSpec::new_in::<i32>("answer")],
            |ctx| Ok(ctx.get_input::<i32>("answer")? == 42),
        )),
        "check",
        NodeConfig::new().with_port("answer", "{answer}"),
    )?;
    tree.add_child(root, set)?;
    tree.add_child(root, check)?;
    tree.set_root(root)?;

    assert_eq!(tree.tick_once()?, NodeStatus::Success);
    assert_eq!(tree.blackboard().get::<i32>("answer")?, 42);
    assert_eq!(tree.blackboard().get::<String>("answer")?, "42");

    // The entry is typed by the port declaring it
    assert!(matches!(
        tree.blackboard().set("answer", true),
        Err(BlackboardError::TypeMismatch { .. })
    ));
    tree.blackboard().set("answer", "7".to_owned())?;
    assert_eq!(tree.blackboard().get::<i32>("answer")?, 7);
    Ok(())
}

#[test]
fn test_port_type_conflict() -> Result<()> {
    let mut tree = Tree::new();
    tree.new_leaf_node(
        LeafNode::sync_action(SimpleAction::with_ports(
            vec![PortSpec::new_out::<i32>("out")],
            |_| Ok(NodeStatus::Success),
        )),
        "writer",
        NodeConfig::new().with_port("out", "{shared}"),
    )?;
    let result = tree.new_leaf_node(
        LeafNode::sync_action(SimpleAction::with_ports(
            vec![PortSpec::new_in::<bool>("input")],
            |_| Ok(NodeStatus::Success),
        )),
        "reader",
        NodeConfig::new().with_port("input", "{shared}"),
    );
    assert!(matches!(
        result,
        Err(BuildError::Blackboard(BlackboardError::TypeMismatch { .. }))
    ));
    Ok(())
}

#[test]
fn test_missing_input_is_an_error() -> Result<()> {
    let mut tree = Tree::new();
    let leaf = tree.new_leaf_node(
        LeafNode::sync_action(SimpleAction::with_ports(
            vec![PortSpec::new_in::<i32>("value")],
            |ctx| {
                ctx.get_input::<i32>("value")?;
                Ok(NodeStatus::Success)
            },
        )),
        "reader",
        NodeConfig::new().with_port("value", "{never_written}"),
    )?;
    tree.set_root(leaf)?;
    assert!(matches!(
        tree.tick_once(),
        Err(BehaviorError::Blackboard(BlackboardError::MissingEntry(_)))
    ));
    Ok(())
}

#[test]
fn test_subtree_scoping() -> Result<()> {
    let mut tree = Tree::new();
    tree.blackboard().set("target", "kitchen".to_owned())?;
    let sub = tree.new_subtree_node(
        "go_to",
        NodeConfig::new()
            .with_port("goal", "{target}")
            .with_port("reached", "{arrived}"),
    )?;
    let inner = tree
        .subtree_blackboard(sub)
        .ok_or_else(|| anyhow::anyhow!("not a subtree"))?;
    let leaf = tree.new_leaf_node(
        LeafNode::sync_action(SimpleAction::with_ports(
            vec![
                PortSpec::new_in::<String>("goal"),
                PortSpec::new_out::<bool>("reached"),
                PortSpec::new_out::<i32>("scratch"),
            ],
            |ctx| {
                let goal: String = ctx.get_input("goal")?;
                ctx.set_output("reached", goal == "kitchen")?;
                ctx.set_output("scratch", 1)?;
                Ok(NodeStatus::Success)
            },
        )),
        "move",
        NodeConfig::new()
            .with_port("goal", "{goal}")
            .with_port("reached", "{reached}")
            .with_port("scratch", "{scratch}")
            .with_blackboard(inner.clone()),
    )?;
    tree.set_child(sub, leaf)?;
    tree.set_root(sub)?;

    assert_eq!(tree.tick_once()?, NodeStatus::Success);
    assert!(tree.blackboard().get::<bool>("arrived")?);
    // Keys that aren't remapped stay inside the subtree
    assert_eq!(inner.get::<i32>("scratch")?, 1);
    assert!(!tree.blackboard().contains("scratch"));
    Ok(())
}

#[test]
fn test_entry_updated_in_reactive_sequence() -> Result<()> {
    let mut tree = Tree::new();
    let root = tree.new_control_node(ControlKind::ReactiveSequence, "root", NodeConfig::new())?;
    let skip = tree.new_decorator_node(
        DecoratorKind::EntryUpdated(NodeStatus::Skipped),
        "on_goal",
        NodeConfig::new().with_port("entry", "{goal}"),
    )?;
    let (work, work_ticks) = counting_leaf(&mut tree, "work", 0, NodeStatus::Success)?;
    tree.set_child(skip, work)?;
    tree.add_child(root, skip)?;
    tree.set_root(root)?;

    assert_eq!(tree.tick_once()?, NodeStatus::Skipped);
    tree.blackboard().set("goal", 3i32)?;
    assert_eq!(tree.tick_once()?, NodeStatus::Success);
    assert_eq!(tree.tick_once()?, NodeStatus::Skipped);
    assert_eq!(work_ticks.load(Ordering::SeqCst), 1);
    Ok(())
}

/// Three steps, suspended in between.
struct Steps {
    step: u32,
    log: Arc<parking_lot::Mutex<Vec<u32>>>,
}

impl Coroutine for Steps {
    fn resume(&mut self, _ctx: &Context) -> behavior_tree_core::Result<NodeStatus> {
        self.step += 1;
        self.log.lock().push(self.step);
        Ok(if self.step < 3 {
            NodeStatus::Running
        } else {
            NodeStatus::Success
        })
    }
}

#[test]
fn test_coroutine_halt_discards_state() -> Result<()> {
    let log = Arc::new(parking_lot::Mutex::new(vec![]));
    let shared = log.clone();
    let mut tree = Tree::new();
    let leaf = tree.new_leaf_node(
        LeafNode::coroutine(vec![], move || Steps {
            step: 0,
            log: shared.clone(),
        }),
        "steps",
        NodeConfig::new(),
    )?;
    tree.set_root(leaf)?;

    assert_eq!(tree.tick_exactly_once()?, NodeStatus::Running);
    assert_eq!(tree.tick_exactly_once()?, NodeStatus::Running);
    tree.halt_tree();

    // A fresh frame starts from the first step
    assert_eq!(tree.tick_while_running(Duration::from_millis(1))?, NodeStatus::Success);
    assert_eq!(*log.lock(), vec![1, 2, 1, 2, 3]);
    Ok(())
}

#[test]
fn test_timeout_over_threaded_action() -> Result<()> {
    let mut tree = Tree::new();
    let root = tree.new_decorator_node(
        DecoratorKind::Timeout(None),
        "deadline",
        NodeConfig::new().with_port("msec", "50"),
    )?;
    let halted = Arc::new(AtomicBool::new(false));
    let leaf = tree.new_leaf_node(
        LeafNode::threaded(Cooperative {
            halted: halted.clone(),
        }),
        "slow",
        NodeConfig::new(),
    )?;
    tree.set_child(root, leaf)?;
    tree.set_root(root)?;

    let start = Instant::now();
    assert_eq!(tree.tick_while_running(Duration::from_secs(10))?, NodeStatus::Failure);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(halted.load(Ordering::SeqCst));
    Ok(())
}

/// Records how long after its start it first saw a halt request.
struct DeadlineWatcher {
    saw_halt_after: Arc<parking_lot::Mutex<Option<Duration>>>,
}

impl ThreadedAction for DeadlineWatcher {
    fn tick(&mut self, ctx: &Context) -> behavior_tree_core::Result<NodeStatus> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if ctx.is_halt_requested() {
                *self.saw_halt_after.lock() = Some(start.elapsed());
                return Ok(NodeStatus::Failure);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(NodeStatus::Success)
    }
}

#[test]
fn test_timeout_cancels_worker_between_ticks() -> Result<()> {
    let saw_halt_after = Arc::new(parking_lot::Mutex::new(None));
    let mut tree = Tree::new();
    let root = tree.new_decorator_node(
        DecoratorKind::Timeout(Some(50)),
        "deadline",
        NodeConfig::new(),
    )?;
    let leaf = tree.new_leaf_node(
        LeafNode::threaded(DeadlineWatcher {
            saw_halt_after: saw_halt_after.clone(),
        }),
        "watcher",
        NodeConfig::new(),
    )?;
    tree.set_child(root, leaf)?;
    tree.set_root(root)?;

    assert_eq!(tree.tick_exactly_once()?, NodeStatus::Running);
    // Nobody ticks while the deadline passes
    thread::sleep(Duration::from_millis(400));
    let seen = saw_halt_after
        .lock()
        .ok_or_else(|| anyhow::anyhow!("the worker never saw the deadline"))?;
    assert!(seen < Duration::from_millis(300));

    assert_eq!(tree.tick_exactly_once()?, NodeStatus::Failure);
    assert_eq!(tree.status(leaf), Some(NodeStatus::Idle));
    Ok(())
}

#[test]
fn test_waypoints_from_queue() -> Result<()> {
    let visited = Arc::new(parking_lot::Mutex::new(vec![]));
    let log = visited.clone();
    let mut tree = Tree::new();
    let waypoints: Vec<String> = vec!["dock".into(), "hall".into(), "lab".into()];
    tree.blackboard().set("waypoints", waypoints)?;

    let root = tree.new_control_node(ControlKind::Sequence, "root", NodeConfig::new())?;
    let size = tree.new_leaf_node(
        LeafNode::sync_action(QueueSize::<String>::new()),
        "count",
        NodeConfig::new()
            .with_port("queue", "{waypoints}")
            .with_port("size", "{wp_size}"),
    )?;
    let repeat = tree.new_decorator_node(
        DecoratorKind::Repeat(None),
        "each",
        NodeConfig::new().with_port("num_cycles", "{wp_size}"),
    )?;
    let visit = tree.new_control_node(ControlKind::Sequence, "visit", NodeConfig::new())?;
    let pop = tree.new_leaf_node(
        LeafNode::sync_action(PopFromQueue::<String>::new()),
        "pop",
        NodeConfig::new()
            .with_port("queue", "{waypoints}")
            .with_port("popped_item", "{wp}"),
    )?;
    let go = tree.new_leaf_node(
        LeafNode::sync_action(SimpleAction::with_ports(
            vec![PortSpec::new_in::<String>("waypoint")],
            move |ctx| {
                log.lock().push(ctx.get_input::<String>("waypoint")?);
                Ok(NodeStatus::Success)
            },
        )),
        "go",
        NodeConfig::new().with_port("waypoint", "{wp}"),
    )?;
    tree.add_child(visit, pop)?;
    tree.add_child(visit, go)?;
    tree.set_child(repeat, visit)?;
    tree.add_child(root, size)?;
    tree.add_child(root, repeat)?;
    tree.set_root(root)?;

    assert_eq!(tree.tick_once()?, NodeStatus::Success);
    assert_eq!(*visited.lock(), vec!["dock", "hall", "lab"]);
    assert_eq!(tree.blackboard().get::<i32>("wp_size")?, 3);
    assert!(tree.blackboard().get::<Vec<String>>("waypoints")?.is_empty());

    // Nothing left to count
    assert_eq!(tree.tick_once()?, NodeStatus::Failure);
    Ok(())
}

#[test]
fn test_pop_from_empty_queue() -> Result<()> {
    let mut tree = Tree::new();
    let pop = tree.new_leaf_node(
        LeafNode::sync_action(PopFromQueue::<i32>::new()),
        "pop",
        NodeConfig::new()
            .with_port("queue", "{numbers}")
            .with_port("popped_item", "{number}"),
    )?;
    tree.set_root(pop)?;
    assert_eq!(tree.tick_once()?, NodeStatus::Failure);

    tree.blackboard().set("numbers", "7;8".to_owned())?;
    assert_eq!(tree.tick_once()?, NodeStatus::Success);
    assert_eq!(tree.blackboard().get::<i32>("number")?, 7);
    assert_eq!(tree.blackboard().get::<Vec<i32>>("numbers")?, vec![8]);
    Ok(())
}
