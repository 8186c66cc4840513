use crate::api::{NodeInfo, TaskInfo};
use crate::framework::Plugin;

/// Node-filter predicates: node selector matching and taint toleration.
pub struct PredicatesPlugin;

impl Plugin for PredicatesPlugin {
    fn name(&self) -> &'static str {
        "predicates"
    }

    fn predicate(&self, task: &TaskInfo, node: &NodeInfo) -> Result<(), String> {
        for (key, value) in &task.node_selector {
            if node.labels.get(key) != Some(value) {
                return Err(format!("node selector mismatch: {}={}", key, value));
            }
        }

        for taint in &node.taints {
            let tolerated = task.tolerations.iter().any(|t| {
                t.key.as_deref() == Some(taint.key.as_str())
                    && (t.effect.is_none() || t.effect.as_deref() == Some(taint.effect.as_str()))
            });
            if !tolerated {
                return Err(format!(
                    "task does not tolerate taint: {}={}",
                    taint.key, taint.effect
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{NodeInfo, TaskInfo};
    use crate::cache::test_util::{build_node, build_pod};
    use convoy_core::objects::{Taint, Toleration};

    fn task() -> TaskInfo {
        TaskInfo::from_pod(&build_pod("c1", "p1", "", "Pending", "1", "1G", "pg1")).unwrap()
    }

    fn node() -> NodeInfo {
        NodeInfo::from_node(&build_node("n1", "4", "8Gi")).unwrap()
    }

    #[test]
    fn test_selector_match() {
        let plugin = PredicatesPlugin;
        let mut task = task();
        let mut node = node();

        task.node_selector
            .insert("disk".to_string(), "ssd".to_string());
        assert!(plugin.predicate(&task, &node).is_err());

        node.labels.insert("disk".to_string(), "ssd".to_string());
        assert!(plugin.predicate(&task, &node).is_ok());

        node.labels.insert("disk".to_string(), "hdd".to_string());
        assert!(plugin.predicate(&task, &node).is_err());
    }

    #[test]
    fn test_taint_toleration() {
        let plugin = PredicatesPlugin;
        let mut task = task();
        let mut node = node();

        node.taints.push(Taint {
            key: "dedicated".to_string(),
            value: "batch".to_string(),
            effect: "NoSchedule".to_string(),
        });
        assert!(plugin.predicate(&task, &node).is_err());

        task.tolerations.push(Toleration {
            key: Some("dedicated".to_string()),
            effect: None,
        });
        assert!(plugin.predicate(&task, &node).is_ok());

        task.tolerations[0].effect = Some("NoExecute".to_string());
        assert!(plugin.predicate(&task, &node).is_err());
    }
}
