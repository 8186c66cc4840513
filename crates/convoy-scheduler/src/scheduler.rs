use crate::actions::{self, Action};
use crate::cache::SchedulerCache;
use crate::conf::{SchedulerConf, SchedulerOpts};
use crate::error::{Result, SchedulerError};
use crate::framework::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Configuration for the scheduler driver
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduling passes
    pub schedule_period: Duration,
    /// Action list, tiers and action arguments
    pub conf: SchedulerConf,
    /// Node sampling bounds
    pub opts: SchedulerOpts,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_period: Duration::from_secs(1),
            conf: SchedulerConf::default(),
            opts: SchedulerOpts::default(),
        }
    }
}

/// The scheduler driver: runs one pass per period over the cache. A pass is
/// single-threaded and always runs to completion; only cache ingest and the
/// bind dispatcher are concurrent with it.
pub struct Scheduler {
    cache: Arc<SchedulerCache>,
    config: SchedulerConfig,
    actions: Vec<Box<dyn Action>>,
    pass: u64,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("pass", &self.pass)
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler; fails fast on unknown actions or plugins
    pub fn new(cache: Arc<SchedulerCache>, config: SchedulerConfig) -> Result<Self> {
        config.conf.validate()?;
        let actions = config
            .conf
            .action_names()
            .iter()
            .map(|name| {
                actions::new_action(name).ok_or_else(|| SchedulerError::UnknownAction {
                    name: name.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            cache,
            config,
            actions,
            pass: 0,
        })
    }

    /// Run passes until cancelled
    pub async fn run(&mut self, token: CancellationToken) -> Result<()> {
        info!(
            period = ?self.config.schedule_period,
            actions = %self.config.conf.actions,
            "starting scheduler"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.schedule_period) => self.run_once(),
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// Execute a single scheduling pass: snapshot, open session, run the
    /// configured actions in order, close. Action failures are logged and
    /// the pass continues; it always reaches close.
    pub fn run_once(&mut self) {
        self.pass += 1;
        debug!(pass = self.pass, "starting scheduling pass");

        let snapshot = self.cache.snapshot();
        let mut ssn = match Session::open(
            snapshot,
            &self.config.conf,
            self.config.opts.clone(),
            self.pass,
        ) {
            Ok(ssn) => ssn,
            Err(e) => {
                error!("failed to open session: {}", e);
                return;
            }
        };

        for action in &self.actions {
            if let Err(e) = action.execute(&mut ssn) {
                error!(action = action.name(), "action failed: {}", e);
            }
        }

        ssn.close(&self.cache);
        debug!(pass = self.pass, "scheduling pass complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_util::*;
    use crate::conf::Tier;
    use crate::conf::PluginOption;

    #[tokio::test]
    async fn test_full_pass_enqueues_and_allocates() {
        let (cache, fakes) = build_cache();
        let cache = Arc::new(cache);
        let token = CancellationToken::new();
        cache.run(token.clone());

        cache.add_node(&build_node("n1", "2", "4Gi")).unwrap();
        cache.add_queue(&build_queue("c1", 1));
        let mut pg = build_pod_group("c1", "pg1", "c1", "", 2, Some(resource_list("2", "2G")));
        pg.status.phase = "Pending".to_string();
        cache.add_pod_group(&pg).unwrap();
        for name in ["p1", "p2"] {
            cache
                .add_pod(&build_pod("c1", name, "", "Pending", "1", "1G", "pg1"))
                .unwrap();
        }

        let mut scheduler = Scheduler::new(cache.clone(), SchedulerConfig::default()).unwrap();
        scheduler.run_once();

        let binds = fakes.wait_for_binds(2).await;
        assert_eq!(binds.len(), 2);
        assert!(binds.values().all(|node| node == "n1"));

        // The group was admitted before placement. The status update rides
        // its own dispatcher worker, so give it a moment to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fakes
            .status_updater
            .updates()
            .iter()
            .any(|(key, phase)| key == "c1/pg1" && *phase == convoy_core::PodGroupPhase::Inqueue));
        token.cancel();
    }

    #[tokio::test]
    async fn test_unknown_plugin_fails_construction() {
        let (cache, _fakes) = build_cache();
        let mut config = SchedulerConfig::default();
        config.conf.tiers.push(Tier {
            plugins: vec![PluginOption::new("fairshare-ng")],
        });

        let result = Scheduler::new(Arc::new(cache), config);
        assert!(matches!(
            result.unwrap_err(),
            SchedulerError::UnknownPlugin { .. }
        ));
    }

    #[tokio::test]
    async fn test_pass_survives_with_no_objects() {
        let (cache, _fakes) = build_cache();
        let cache = Arc::new(cache);
        let mut scheduler = Scheduler::new(cache, SchedulerConfig::default()).unwrap();
        scheduler.run_once();
        scheduler.run_once();
    }
}
