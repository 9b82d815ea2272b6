use ::behavior_tree_core::{
    hash_map, BehaviorNode, Context, ControlKind, DecoratorKind, Lazy, LeafNode, NodeConfig,
    NodeStatus, PortSpec, PortValue, Result, Symbol, ThreadedAction, Tree, TreeObserver,
};
use std::{collections::HashMap, thread, time::Duration};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug)]
struct Arm {
    name: String,
}

impl PortValue for Arm {}

#[derive(Clone, Debug)]
struct Body {
    left_arm: Arm,
    right_arm: Arm,
}

impl PortValue for Body {}

struct PrintArmNode;

impl BehaviorNode for PrintArmNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<Arm>("arm")]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        static ARM_SYM: Lazy<Symbol> = Lazy::new(|| "arm".into());
        let arm: Arm = ctx.get_input(*ARM_SYM)?;
        println!("PrintArmNode: {}", arm.name);
        Ok(NodeStatus::Success)
    }
}

struct PrintBodyNode;

impl BehaviorNode for PrintBodyNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in::<Body>("body"),
            PortSpec::new_out::<Arm>("left_arm"),
            PortSpec::new_out::<Arm>("right_arm"),
        ]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        static BODY_SYM: Lazy<Symbol> = Lazy::new(|| "body".into());
        static LEFT_ARM_SYM: Lazy<Symbol> = Lazy::new(|| "left_arm".into());
        static RIGHT_ARM_SYM: Lazy<Symbol> = Lazy::new(|| "right_arm".into());
        let body: Body = ctx.get_input(*BODY_SYM)?;
        println!("PrintBodyNode: {:?}", body);
        ctx.set_output(*LEFT_ARM_SYM, body.left_arm)?;
        ctx.set_output(*RIGHT_ARM_SYM, body.right_arm)?;
        Ok(NodeStatus::Success)
    }
}

/// Pretends to move an arm on a worker thread, giving up early when halted.
struct MoveArm {
    steps: u32,
}

impl ThreadedAction for MoveArm {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in::<Arm>("arm")]
    }

    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        let arm: Arm = ctx.get_input("arm")?;
        for step in 0..self.steps {
            if ctx.is_halt_requested() {
                return Ok(NodeStatus::Failure);
            }
            println!("MoveArm: {} step {}", arm.name, step);
            thread::sleep(Duration::from_millis(20));
        }
        Ok(NodeStatus::Success)
    }

    fn on_halted(&mut self) {
        println!("MoveArm: halted");
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let body = Body {
        left_arm: Arm {
            name: "left_arm".to_string(),
        },
        right_arm: Arm {
            name: "right_arm".to_string(),
        },
    };

    let mut tree = Tree::new();
    tree.blackboard().set("body", body)?;

    let root = tree.new_control_node(ControlKind::Sequence, "root", NodeConfig::new())?;
    let ports: HashMap<String, String> = hash_map!(
        "body" => "{body}",
        "left_arm" => "{=}",
        "right_arm" => "{=}",
    );
    let print_body = tree.new_leaf_node(
        LeafNode::sync_action(PrintBodyNode),
        "print_body",
        NodeConfig::from(ports),
    )?;
    tree.add_child(root, print_body)?;

    let print_arms = tree.new_control_node(ControlKind::Sequence, "print_arms", NodeConfig::new())?;
    for arm in ["left_arm", "right_arm"] {
        let print_arm = tree.new_leaf_node(
            LeafNode::sync_action(PrintArmNode),
            &format!("print_{}", arm),
            NodeConfig::new().with_port("arm", format!("{{{}}}", arm)),
        )?;
        tree.add_child(print_arms, print_arm)?;
    }
    tree.add_child(root, print_arms)?;

    // Both arms move at once; the slow one is cut short by the timeout.
    let timeout = tree.new_decorator_node(
        DecoratorKind::Timeout(Some(150)),
        "deadline",
        NodeConfig::new(),
    )?;
    let move_arms =
        tree.new_control_node(ControlKind::ParallelAll, "move_arms", NodeConfig::new())?;
    for (arm, steps) in [("left_arm", 3), ("right_arm", 20)] {
        let move_arm = tree.new_leaf_node(
            LeafNode::threaded(MoveArm { steps }),
            &format!("move_{}", arm),
            NodeConfig::new().with_port("arm", format!("{{{}}}", arm)),
        )?;
        tree.add_child(move_arms, move_arm)?;
    }
    tree.set_child(timeout, move_arms)?;
    tree.add_child(root, timeout)?;
    tree.set_root(root)?;

    let observer = TreeObserver::new(&mut tree);
    let result = tree.tick_while_running(Duration::from_millis(10))?;
    println!("Tree finished with {}", result);

    for name in ["print_body", "move_left_arm", "move_right_arm", "deadline"] {
        if let Some(stats) = observer.statistics_by_name(&tree, name) {
            println!(
                "{}: {} transitions, last result {}",
                name, stats.transitions_count, stats.last_result
            );
        }
    }
    Ok(())
}
