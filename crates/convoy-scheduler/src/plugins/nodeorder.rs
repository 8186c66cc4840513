use crate::api::{NodeInfo, TaskInfo};
use crate::framework::Plugin;

/// Node scoring: prefer lightly loaded nodes and balanced cpu/memory use.
/// Both components score 0-100; the plugin contributes their sum.
pub struct NodeOrderPlugin;

impl NodeOrderPlugin {
    /// Higher for nodes that stay emptier after placing the task
    fn least_allocated(task: &TaskInfo, node: &NodeInfo) -> f64 {
        if node.allocatable.milli_cpu == 0 || node.allocatable.memory == 0 {
            return 0.0;
        }

        let cpu_util = (node.used.milli_cpu + task.res_req.milli_cpu) as f64
            / node.allocatable.milli_cpu as f64;
        let mem_util =
            (node.used.memory + task.res_req.memory) as f64 / node.allocatable.memory as f64;

        let avg = (cpu_util + mem_util) / 2.0 * 100.0;
        (100.0 - avg).clamp(0.0, 100.0)
    }

    /// Higher when cpu and memory utilization stay close to each other
    fn balanced_allocation(task: &TaskInfo, node: &NodeInfo) -> f64 {
        if node.allocatable.milli_cpu == 0 || node.allocatable.memory == 0 {
            return 0.0;
        }

        let cpu_frac = (node.used.milli_cpu + task.res_req.milli_cpu) as f64
            / node.allocatable.milli_cpu as f64;
        let mem_frac =
            (node.used.memory + task.res_req.memory) as f64 / node.allocatable.memory as f64;

        let variance = (cpu_frac - mem_frac).abs();
        ((1.0 - variance) * 100.0).clamp(0.0, 100.0)
    }
}

impl Plugin for NodeOrderPlugin {
    fn name(&self) -> &'static str {
        "nodeorder"
    }

    fn node_order(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        Self::least_allocated(task, node) + Self::balanced_allocation(task, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{NodeInfo, TaskInfo};
    use crate::cache::test_util::{build_node, build_pod};

    fn task(cpu: &str, mem: &str) -> TaskInfo {
        TaskInfo::from_pod(&build_pod("c1", "p1", "", "Pending", cpu, mem, "pg1")).unwrap()
    }

    #[test]
    fn test_prefers_emptier_node() {
        let plugin = NodeOrderPlugin;
        let t = task("1", "1Gi");

        let empty = NodeInfo::from_node(&build_node("n1", "4", "8Gi")).unwrap();
        let mut busy = NodeInfo::from_node(&build_node("n2", "4", "8Gi")).unwrap();
        busy.allocate(&task("2", "4Gi")).unwrap();

        assert!(plugin.node_order(&t, &empty) > plugin.node_order(&t, &busy));
    }

    #[test]
    fn test_balanced_beats_lopsided() {
        let t = task("1", "2Gi");

        // Placing 1 cpu / 2 Gi on an 4 cpu / 8 Gi node is perfectly balanced.
        let node = NodeInfo::from_node(&build_node("n1", "4", "8Gi")).unwrap();
        let balanced = NodeOrderPlugin::balanced_allocation(&t, &node);
        assert!((balanced - 100.0).abs() < 1e-9);

        // A cpu-only task skews utilization.
        let skewed = NodeOrderPlugin::balanced_allocation(&task("4", "0"), &node);
        assert!(skewed < balanced);
    }

    #[test]
    fn test_zero_capacity_scores_zero() {
        let plugin = NodeOrderPlugin;
        let node = NodeInfo::from_node(&build_node("n1", "0", "0")).unwrap();
        assert_eq!(plugin.node_order(&task("1", "1Gi"), &node), 0.0);
    }
}
