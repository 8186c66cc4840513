use super::SchedulerCache;
use convoy_core::events::reasons;
use convoy_core::{JobId, PodGroupPhase, RecordedEvent, TaskId};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Dispatcher sizing and retry policy.
///
/// With the default back-off (5ms * 2^(attempt)) an operation is retried at
/// 5ms, 10ms, 20ms, ... up to `max_retries` times before it is dropped.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of dispatcher workers
    pub workers: usize,
    /// Bound of each worker's operation queue
    pub queue_capacity: usize,
    /// Retry budget per operation
    pub max_retries: u32,
    /// Base back-off delay, doubled per attempt
    pub retry_base: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: 1024,
            max_retries: 15,
            retry_base: Duration::from_millis(5),
        }
    }
}

/// An outbound operation against the external cluster API
#[derive(Debug)]
pub(crate) enum Operation {
    Bind {
        task: TaskId,
        job: JobId,
        namespace: String,
        name: String,
        node: String,
    },
    Evict {
        task: TaskId,
        namespace: String,
        name: String,
        reason: String,
    },
    PodGroupStatus {
        namespace: String,
        name: String,
        phase: PodGroupPhase,
    },
}

/// Route a key to a fixed worker so operations on it serialize
pub(crate) fn route(key: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % workers.max(1)
}

pub(crate) fn spawn_worker(
    cache: Arc<SchedulerCache>,
    mut rx: mpsc::Receiver<Operation>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let op = tokio::select! {
                _ = token.cancelled() => break,
                op = rx.recv() => match op {
                    Some(op) => op,
                    None => break,
                },
            };
            execute(&cache, op, &token).await;
        }
        debug!("dispatcher worker stopped");
    })
}

async fn execute(cache: &SchedulerCache, op: Operation, token: &CancellationToken) {
    let config = cache.dispatch_config().clone();

    match op {
        Operation::Bind {
            task,
            job,
            namespace,
            name,
            node,
        } => {
            let attempt = with_retries(&config, token, || {
                cache.binder().bind(&namespace, &name, &node)
            })
            .await;

            if let Err(e) = attempt {
                error!(task = %task, node = %node, "bind failed permanently: {}", e);
                cache.fail_bind(&task, &job);
                cache.recorder().record(RecordedEvent::warning(
                    format!("Pod/{}/{}", namespace, name),
                    reasons::FAILED_SCHEDULING,
                    format!("binding to node {} failed: {}", node, e),
                ));
            } else {
                info!(task = %task, node = %node, "bound");
            }
        }
        Operation::Evict {
            task,
            namespace,
            name,
            reason,
        } => {
            let attempt = with_retries(&config, token, || {
                cache.evictor().evict(&namespace, &name, &reason)
            })
            .await;

            if let Err(e) = attempt {
                error!(task = %task, "eviction failed permanently: {}", e);
                cache.recorder().record(RecordedEvent::warning(
                    format!("Pod/{}/{}", namespace, name),
                    reasons::PREEMPT_FAILED,
                    format!("eviction failed: {}", e),
                ));
            }
        }
        Operation::PodGroupStatus {
            namespace,
            name,
            phase,
        } => {
            let attempt = with_retries(&config, token, || {
                cache.status_updater().update_pod_group(&namespace, &name, phase)
            })
            .await;

            if let Err(e) = attempt {
                error!(
                    pod_group = %format!("{}/{}", namespace, name),
                    "status update failed permanently: {}", e
                );
            }
        }
    }
}

/// Run `call` until it succeeds, fails non-transiently, the retry budget is
/// exhausted, or the dispatcher is shutting down.
async fn with_retries<F, Fut>(
    config: &DispatchConfig,
    token: &CancellationToken,
    mut call: F,
) -> crate::error::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<()>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < config.max_retries && !token.is_cancelled() => {
                let delay = config.retry_base * 2u32.saturating_pow(attempt);
                debug!(attempt, "transient API error, retrying in {:?}: {}", delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_is_stable_and_in_range() {
        for workers in 1..8 {
            for key in ["c1/p1", "c2/p9", "a", ""] {
                let first = route(key, workers);
                assert_eq!(first, route(key, workers));
                assert!(first < workers);
            }
        }
    }

    #[tokio::test]
    async fn test_with_retries_recovers_from_transient_errors() {
        use crate::error::SchedulerError;
        use std::sync::atomic::{AtomicU32, Ordering};

        let config = DispatchConfig {
            retry_base: Duration::from_millis(1),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let failures = AtomicU32::new(2);

        let result = with_retries(&config, &token, || {
            let remaining = failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(1))
            });
            async move {
                match remaining {
                    Ok(v) if v > 0 => Err(SchedulerError::transient_api("api unavailable")),
                    _ => Ok(()),
                }
            }
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_with_retries_gives_up_on_conflict() {
        use crate::error::SchedulerError;

        let config = DispatchConfig::default();
        let token = CancellationToken::new();
        let mut calls = 0;

        let result = with_retries(&config, &token, || {
            calls += 1;
            async { Err(SchedulerError::conflict("c1/p1", "node assignment changed")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
