use super::*;
use crate::{
    mock::{scripted, scripted_children},
    AlwaysSuccess, BlackboardError, SimpleAction, TreeObserver,
};
use parking_lot::Mutex;
use NodeStatus::{Failure, Idle, Running, Success};

fn sequence_of(tree: &mut Tree, scripts: &[&[NodeStatus]]) -> (NodeId, Vec<crate::mock::Probe>) {
    let root = tree
        .new_control_node(ControlKind::Sequence, "root", NodeConfig::new())
        .unwrap();
    let probes = scripted_children(tree, root, scripts);
    tree.set_root(root).unwrap();
    (root, probes)
}

#[test]
fn test_add_child_errors() {
    let mut tree = Tree::new();
    let seq = tree
        .new_control_node(ControlKind::Sequence, "seq", NodeConfig::new())
        .unwrap();
    let inv = tree
        .new_decorator_node(DecoratorKind::Inverter, "inv", NodeConfig::new())
        .unwrap();
    let (a, _) = scripted(&mut tree, "a", &[Success]);
    let (b, _) = scripted(&mut tree, "b", &[Success]);

    assert_eq!(
        tree.add_child(a, b),
        Err(BuildError::NotAComposite("a".to_owned()))
    );
    tree.add_child(inv, a).unwrap();
    assert_eq!(
        tree.add_child(inv, b),
        Err(BuildError::TooManyChildren("inv".to_owned()))
    );
    assert_eq!(
        tree.add_child(seq, a),
        Err(BuildError::AlreadyHasParent("a".to_owned()))
    );
    tree.add_child(seq, inv).unwrap();
    assert_eq!(
        tree.add_child(inv, seq),
        Err(BuildError::Cycle {
            child: "seq".to_owned()
        })
    );
    assert_eq!(tree.add_child(seq, NodeId(42)), Err(BuildError::UnknownNode(42)));
}

#[test]
fn test_set_child_replaces() {
    let mut tree = Tree::new();
    let inv = tree
        .new_decorator_node(DecoratorKind::Inverter, "inv", NodeConfig::new())
        .unwrap();
    let (a, _) = scripted(&mut tree, "a", &[Success]);
    let (b, _) = scripted(&mut tree, "b", &[Failure]);
    tree.set_child(inv, a).unwrap();
    tree.set_child(inv, b).unwrap();
    assert_eq!(tree.node(inv).unwrap().children(), &[b]);
    assert_eq!(tree.node(a).unwrap().parent(), None);
    tree.set_root(inv).unwrap();
    assert_eq!(tree.tick_exactly_once().unwrap(), Success);
}

#[test]
fn test_port_binding_errors() {
    let ports = || {
        SimpleAction::with_ports(
            vec![
                PortSpec::new_in::<i32>("count"),
                PortSpec::new_out::<i32>("result"),
            ],
            |_| Ok(Success),
        )
    };
    let mut tree = Tree::new();
    assert!(matches!(
        tree.new_leaf_node(
            LeafNode::sync_action(ports()),
            "a",
            NodeConfig::new().with_port("cuont", "1")
        ),
        Err(BuildError::UnknownPort { .. })
    ));
    assert!(matches!(
        tree.new_leaf_node(
            LeafNode::sync_action(ports()),
            "b",
            NodeConfig::new().with_port("result", "3")
        ),
        Err(BuildError::LiteralOnOutput { .. })
    ));
    assert!(matches!(
        tree.new_leaf_node(
            LeafNode::sync_action(ports()),
            "c",
            NodeConfig::new().with_port("count", "three")
        ),
        Err(BuildError::InvalidLiteral { .. })
    ));

    tree.blackboard().set("flag", true).unwrap();
    assert!(matches!(
        tree.new_leaf_node(
            LeafNode::sync_action(ports()),
            "d",
            NodeConfig::new().with_port("count", "{flag}")
        ),
        Err(BuildError::Blackboard(BlackboardError::TypeMismatch { .. }))
    ));
    assert!(tree.is_empty());
}

#[test]
fn test_default_port_value() {
    let mut tree = Tree::new();
    let leaf = tree
        .new_leaf_node(
            LeafNode::sync_action(SimpleAction::with_ports(
                vec![PortSpec::new_in::<i32>("count").with_default(5)],
                |ctx| {
                    let count: i32 = ctx.get_input("count")?;
                    Ok(if count == 5 { Success } else { Failure })
                },
            )),
            "defaulted",
            NodeConfig::new(),
        )
        .unwrap();
    tree.set_root(leaf).unwrap();
    assert_eq!(tree.tick_exactly_once().unwrap(), Success);
}

#[test]
fn test_idle_is_a_logic_error_and_stops_the_tree() {
    let mut tree = Tree::new();
    let (_, probes) = sequence_of(&mut tree, &[&[Success], &[Idle]]);
    let err = tree.tick_exactly_once().unwrap_err();
    assert!(matches!(err, BehaviorError::Logic(_)));
    assert_eq!(tree.error(), Some(&err));

    // Further ticks report the same error without ticking anything
    assert_eq!(tree.tick_exactly_once(), Err(err));
    assert_eq!(probes[0].ticks(), 1);
}

#[test]
fn test_unconvertible_entry_is_a_runtime_error() {
    let mut tree = Tree::new();
    tree.blackboard().set("word", "abc".to_owned()).unwrap();
    let leaf = tree
        .new_leaf_node(
            LeafNode::sync_action(SimpleAction::with_ports(
                vec![PortSpec::new_in::<crate::AnyTypeAllowed>("input")],
                |ctx| {
                    ctx.get_input::<i32>("input")?;
                    Ok(Success)
                },
            )),
            "reader",
            NodeConfig::new().with_port("input", "{word}"),
        )
        .unwrap();
    tree.set_root(leaf).unwrap();
    assert!(matches!(
        tree.tick_exactly_once(),
        Err(BehaviorError::Runtime(_))
    ));
}

#[test]
fn test_sync_action_running_is_a_logic_error() {
    let mut tree = Tree::new();
    let leaf = tree
        .new_leaf_node(
            LeafNode::sync_action(SimpleAction::new(|_| Ok(Running))),
            "liar",
            NodeConfig::new(),
        )
        .unwrap();
    tree.set_root(leaf).unwrap();
    assert!(matches!(
        tree.tick_exactly_once(),
        Err(BehaviorError::Logic(_))
    ));
}

#[test]
fn test_no_root() {
    let mut tree = Tree::new();
    assert!(matches!(tree.tick_once(), Err(BehaviorError::Logic(_))));
}

#[test]
fn test_halt_resets_running_descendants() {
    let mut tree = Tree::new();
    let (root, probes) = sequence_of(&mut tree, &[&[Success], &[Running], &[Success]]);
    assert_eq!(tree.tick_exactly_once().unwrap(), Running);
    assert_eq!(tree.status(root), Some(Running));

    tree.halt(root);
    tree.for_each_node(root, |node| assert_eq!(node.status(), Idle));
    // Only the running leaf sees its halt hook
    assert_eq!(probes.iter().map(|p| p.halts()).collect::<Vec<_>>(), vec![0, 1, 0]);

    // Idempotent
    tree.halt(root);
    assert_eq!(probes[1].halts(), 1);

    // The sequence starts over
    probes[1].script(&[Success]);
    assert_eq!(tree.tick_exactly_once().unwrap(), Success);
    assert_eq!(probes[0].ticks(), 2);
}

#[test]
fn test_status_subscription() {
    let mut tree = Tree::new();
    let (root, _) = sequence_of(&mut tree, &[&[Running, Success]]);
    let transitions = Arc::new(Mutex::new(vec![]));
    let recorder = transitions.clone();
    let subscriber = tree
        .subscribe_status_change(root, move |_, node, prev, status| {
            recorder.lock().push((node.name().to_owned(), prev, status));
        })
        .unwrap();

    tree.tick_exactly_once().unwrap();
    tree.tick_exactly_once().unwrap();
    assert_eq!(
        *transitions.lock(),
        vec![
            ("root".to_owned(), Idle, Running),
            ("root".to_owned(), Running, Success),
            ("root".to_owned(), Success, Idle),
        ]
    );

    drop(subscriber);
    tree.tick_exactly_once().unwrap();
    assert_eq!(transitions.lock().len(), 3);
}

#[test]
fn test_subscribe_unknown_node() {
    let mut tree = Tree::new();
    assert!(tree
        .subscribe_status_change(NodeId(3), |_, _, _, _| {})
        .is_err());
}

#[test]
fn test_observer_statistics() {
    let mut tree = Tree::new();
    let (_, _) = sequence_of(&mut tree, &[&[Success, Failure], &[Success]]);
    let observer = TreeObserver::new(&mut tree);

    assert_eq!(tree.tick_exactly_once().unwrap(), Success);
    assert_eq!(tree.tick_exactly_once().unwrap(), Failure);

    let root = observer.statistics_by_name(&tree, "root").unwrap();
    assert_eq!(root.success_count, 1);
    assert_eq!(root.failure_count, 1);
    assert_eq!(root.transitions_count, 2);
    assert_eq!(root.current_status, Idle);
    assert_eq!(root.last_result, Failure);

    let child = observer.statistics_by_name(&tree, "child1").unwrap();
    assert_eq!(child.success_count, 1);
    assert_eq!(child.failure_count, 0);

    observer.reset();
    assert_eq!(
        observer.statistics_by_name(&tree, "child0").unwrap(),
        Default::default()
    );
}

#[test]
fn test_for_each_node_order() {
    let mut tree = Tree::new();
    let root = tree
        .new_control_node(ControlKind::Fallback, "root", NodeConfig::new())
        .unwrap();
    let seq = tree
        .new_control_node(ControlKind::Sequence, "seq", NodeConfig::new())
        .unwrap();
    tree.add_child(root, seq).unwrap();
    scripted_children(&mut tree, seq, &[&[Success], &[Success]]);
    let (last, _) = scripted(&mut tree, "last", &[Success]);
    tree.add_child(root, last).unwrap();

    let mut names = vec![];
    tree.for_each_node(root, |node| names.push(node.name().to_owned()));
    assert_eq!(names, vec!["root", "seq", "child0", "child1", "last"]);
}

#[test]
fn test_subtree_remapping() {
    let mut tree = Tree::new();
    let sub = tree
        .new_subtree_node(
            "sub",
            NodeConfig::new()
                .with_port("inner", "{outer}")
                .with_port("greeting", "hello"),
        )
        .unwrap();
    let inner_bb = tree.subtree_blackboard(sub).unwrap();
    let writer = tree
        .new_leaf_node(
            LeafNode::sync_action(SimpleAction::with_ports(
                vec![
                    PortSpec::new_in::<String>("greeting"),
                    PortSpec::new_out::<i32>("value"),
                ],
                |ctx| {
                    let greeting: String = ctx.get_input("greeting")?;
                    ctx.set_output("value", greeting.len() as i32)?;
                    Ok(Success)
                },
            )),
            "writer",
            NodeConfig::new()
                .with_port("greeting", "{greeting}")
                .with_port("value", "{inner}")
                .with_blackboard(inner_bb.clone()),
        )
        .unwrap();
    tree.set_child(sub, writer).unwrap();
    tree.set_root(sub).unwrap();

    assert_eq!(tree.tick_exactly_once().unwrap(), Success);
    assert_eq!(tree.blackboard().get::<i32>("outer").unwrap(), 5);
    // The literal stays local to the subtree
    assert!(!tree.blackboard().contains("greeting"));
    assert_eq!(inner_bb.get::<String>("greeting").unwrap(), "hello");
}

#[test]
fn test_subtree_autoremap_and_global() {
    let mut tree = Tree::new();
    let sub = tree
        .new_subtree_node("sub", NodeConfig::new().with_port("_autoremap", "true"))
        .unwrap();
    let inner_bb = tree.subtree_blackboard(sub).unwrap();
    let writer = tree
        .new_leaf_node(
            LeafNode::sync_action(SimpleAction::with_ports(
                vec![
                    PortSpec::new_out::<i32>("shared"),
                    PortSpec::new_out::<i32>("global"),
                ],
                |ctx| {
                    ctx.set_output("shared", 1)?;
                    ctx.set_output("global", 2)?;
                    Ok(Success)
                },
            )),
            "writer",
            NodeConfig::new()
                .with_port("shared", "{=}")
                .with_port("global", "{@top}")
                .with_blackboard(inner_bb),
        )
        .unwrap();
    tree.set_child(sub, writer).unwrap();
    tree.set_root(sub).unwrap();

    assert_eq!(tree.tick_exactly_once().unwrap(), Success);
    assert_eq!(tree.blackboard().get::<i32>("shared").unwrap(), 1);
    assert_eq!(tree.blackboard().get::<i32>("top").unwrap(), 2);
}

#[test]
fn test_tick_with_options() {
    let mut tree = Tree::new();
    let (_, probes) = sequence_of(&mut tree, &[&[Running, Running, Success]]);
    let options = TickOptions::from_yaml("mode: exactly_once\n").unwrap();
    assert_eq!(tree.tick_with(&options).unwrap(), Running);
    assert_eq!(probes[0].ticks(), 1);

    let options = TickOptions::from_yaml("mode: while_running\nsleep_ms: 1\n").unwrap();
    assert_eq!(tree.tick_with(&options).unwrap(), Success);
    assert_eq!(probes[0].ticks(), 3);
}

#[test]
fn test_wake_up_retriggers_tick_once() {
    let mut tree = Tree::new();
    let root = tree
        .new_control_node(ControlKind::Sequence, "root", NodeConfig::new())
        .unwrap();
    let mut remaining = 2;
    let waker = tree
        .new_leaf_node(
            LeafNode::action(SimpleAction::new(move |ctx| {
                if remaining == 0 {
                    return Ok(Success);
                }
                remaining -= 1;
                ctx.emit_wake_up_signal();
                Ok(Running)
            })),
            "waker",
            NodeConfig::new(),
        )
        .unwrap();
    let done = tree
        .new_leaf_node(LeafNode::sync_action(AlwaysSuccess), "done", NodeConfig::new())
        .unwrap();
    tree.add_child(root, waker).unwrap();
    tree.add_child(root, done).unwrap();
    tree.set_root(root).unwrap();

    assert_eq!(tree.tick_once().unwrap(), Success);
}

#[test]
fn test_requires_wake_up() {
    let mut tree = Tree::new();
    let root = tree
        .new_control_node(ControlKind::Sequence, "root", NodeConfig::new())
        .unwrap();
    let sync = tree
        .new_leaf_node(LeafNode::sync_action(AlwaysSuccess), "sync", NodeConfig::new())
        .unwrap();
    tree.add_child(root, sync).unwrap();
    assert!(!tree.requires_wake_up(root));

    let (polled, _) = scripted(&mut tree, "polled", &[Success]);
    tree.add_child(root, polled).unwrap();
    assert!(tree.requires_wake_up(root));
}
