use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scheduler configuration: the ordered action list, the plugin tiers, and
/// per-action argument maps. Loaded from YAML; unknown action or plugin
/// names fail fast at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConf {
    /// Comma-separated action names, executed in order each pass
    pub actions: String,
    /// Plugin tiers; earlier tiers get first say on comparator outcomes
    pub tiers: Vec<Tier>,
    /// Per-action argument maps
    pub configurations: Vec<ActionConf>,
}

impl Default for SchedulerConf {
    fn default() -> Self {
        Self {
            actions: "enqueue, allocate, backfill".to_string(),
            tiers: vec![
                Tier {
                    plugins: vec![PluginOption::new("priority"), PluginOption::new("gang")],
                },
                Tier {
                    plugins: vec![
                        PluginOption::new("drf"),
                        PluginOption::new("predicates"),
                        PluginOption::new("proportion"),
                        PluginOption::new("nodeorder"),
                    ],
                },
            ],
            configurations: Vec::new(),
        }
    }
}

impl SchedulerConf {
    /// Parse a YAML configuration document
    pub fn parse(yaml: &str) -> Result<Self> {
        let conf: SchedulerConf =
            serde_yaml::from_str(yaml).map_err(|e| SchedulerError::MalformedConfig {
                message: e.to_string(),
            })?;
        conf.validate()?;
        Ok(conf)
    }

    /// Fail fast on unknown action or plugin names
    pub fn validate(&self) -> Result<()> {
        for name in self.action_names() {
            if !crate::actions::is_known(&name) {
                return Err(SchedulerError::UnknownAction { name });
            }
        }
        for tier in &self.tiers {
            for plugin in &tier.plugins {
                if !crate::plugins::is_known(&plugin.name) {
                    return Err(SchedulerError::UnknownPlugin {
                        name: plugin.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The configured action names, in execution order
    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// The argument map of an action, if configured
    pub fn action_args(&self, action: &str) -> Option<&ActionConf> {
        self.configurations.iter().find(|c| c.name == action)
    }
}

/// One ordering layer of plugin options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tier {
    pub plugins: Vec<PluginOption>,
}

/// Names a plugin and enables a subset of its extension points.
/// An absent flag means enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginOption {
    pub name: String,
    pub enabled_job_order: Option<bool>,
    pub enabled_queue_order: Option<bool>,
    pub enabled_task_order: Option<bool>,
    pub enabled_namespace_order: Option<bool>,
    pub enabled_predicate: Option<bool>,
    pub enabled_node_order: Option<bool>,
    pub enabled_preemptable: Option<bool>,
    pub enabled_reclaimable: Option<bool>,
    pub enabled_job_ready: Option<bool>,
    pub enabled_job_pipelined: Option<bool>,
    pub enabled_job_enqueueable: Option<bool>,
    pub enabled_job_valid: Option<bool>,
}

impl PluginOption {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Whether an extension-point flag is on; absent defaults to enabled
pub fn enabled(flag: &Option<bool>) -> bool {
    flag.unwrap_or(true)
}

/// Arguments of a single action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionConf {
    pub name: String,
    pub arguments: BTreeMap<String, String>,
}

impl ActionConf {
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.arguments.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.arguments.get(key).and_then(|v| v.parse().ok())
    }
}

/// Node-sampling bounds for the allocate action
#[derive(Debug, Clone)]
pub struct SchedulerOpts {
    /// Lower bound on the sampled node count
    pub min_nodes_to_find: usize,
    /// Target sample percentage, 1-100
    pub percentage_of_nodes_to_find: usize,
    /// Lower bound on the sample percentage
    pub min_percentage_of_nodes_to_find: usize,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            min_nodes_to_find: 100,
            percentage_of_nodes_to_find: 100,
            min_percentage_of_nodes_to_find: 5,
        }
    }
}

impl SchedulerOpts {
    /// Number of candidate nodes to retain out of `total`
    pub fn nodes_to_find(&self, total: usize) -> usize {
        let pct = self
            .percentage_of_nodes_to_find
            .clamp(self.min_percentage_of_nodes_to_find, 100);
        let by_pct = (total * pct).div_ceil(100);
        by_pct.max(self.min_nodes_to_find).min(total)
    }
}
