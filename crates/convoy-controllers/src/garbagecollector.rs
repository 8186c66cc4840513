use crate::client::ControlClient;
use crate::error::Result;
use crate::workqueue::RateLimitedQueue;
use convoy_core::events::reasons;
use convoy_core::{Job, RecordedEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Deletes finished jobs whose `ttlSecondsAfterFinished` has expired.
/// Jobs whose TTL has not yet run out are re-queued for the remaining time;
/// before deleting, the job is re-fetched so a freshly edited TTL wins.
pub struct GarbageCollector {
    client: Arc<dyn ControlClient>,
    queue: RateLimitedQueue<String>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl GarbageCollector {
    pub fn new(client: Arc<dyn ControlClient>) -> Self {
        let (queue, rx) = RateLimitedQueue::new(15, Duration::from_millis(5));
        Self {
            client,
            queue,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Handle a job ADDED or MODIFIED event
    pub fn on_job_changed(&self, job: &Job) {
        if job.metadata.deletion_timestamp.is_none() && needs_cleanup(job) {
            let key = format!("{}/{}", job.metadata.namespace, job.metadata.name);
            debug!(job = %key, "queueing job for TTL cleanup");
            self.queue.add(key);
        }
    }

    /// Consume cleanup keys until cancelled
    pub fn run(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let collector = Arc::clone(self);
        let mut rx = self
            .rx
            .lock()
            .expect("receiver lock")
            .take()
            .expect("run called once");

        tokio::spawn(async move {
            info!("garbage collector is running");
            loop {
                let key = tokio::select! {
                    _ = token.cancelled() => break,
                    key = rx.recv() => match key {
                        Some(key) => key,
                        None => break,
                    },
                };
                let now = unix_now();
                match collector.process_job_at(&key, now).await {
                    Ok(()) => collector.queue.forget(&key),
                    Err(e) => {
                        warn!(job = %key, "error cleaning up job, will retry: {}", e);
                        if !collector.queue.add_rate_limited(&key, key.clone()) {
                            error!(job = %key, "dropping job cleanup, retry limit reached");
                        }
                    }
                }
            }
            info!("garbage collector stopped");
        })
    }

    /// Check one job's TTL at `now` (seconds since the Unix epoch) and
    /// delete it when expired.
    pub async fn process_job_at(&self, key: &str, now: i64) -> Result<()> {
        let Some((namespace, name)) = key.split_once('/') else {
            warn!(key, "malformed cleanup key");
            return Ok(());
        };

        debug!(job = %key, "checking if job is ready for cleanup");
        let Some(job) = self.client.get_job(namespace, name).await? else {
            return Ok(());
        };
        if !self.ttl_expired(&job, key, now) {
            return Ok(());
        }

        // The cached TTL may be stale; re-check against a fresh read before
        // actually deleting.
        let Some(fresh) = self.client.get_job(namespace, name).await? else {
            return Ok(());
        };
        if !self.ttl_expired(&fresh, key, now) {
            return Ok(());
        }

        info!(job = %key, "cleaning up job, TTL expired");
        self.client.delete_job(namespace, name).await?;
        self.client.record_event(RecordedEvent::normal(
            format!("Job/{}", key),
            reasons::TTL_EXPIRED,
            "job removed, ttlSecondsAfterFinished expired",
        ));
        Ok(())
    }

    /// True when the TTL has run out; otherwise re-queues for the remainder
    fn ttl_expired(&self, job: &Job, key: &str, now: i64) -> bool {
        if job.metadata.deletion_timestamp.is_some() || !needs_cleanup(job) {
            return false;
        }

        let Some(remaining) = time_left(job, now) else {
            return false;
        };
        if remaining <= 0 {
            return true;
        }

        debug!(job = %key, remaining, "TTL not yet expired, re-queueing");
        self.queue
            .add_after(key.to_string(), Duration::from_secs(remaining as u64));
        false
    }
}

/// Whether a job has finished and carries a TTL
fn needs_cleanup(job: &Job) -> bool {
    job.spec.ttl_seconds_after_finished.is_some() && job.status.state.phase.is_finished()
}

/// Seconds until the TTL expires, negative once past. None when the finish
/// time is unknown.
fn time_left(job: &Job, now: i64) -> Option<i64> {
    let ttl = job.spec.ttl_seconds_after_finished?;
    let finished_at = job.status.state.last_transition_time;
    if finished_at == 0 {
        warn!(
            job = %format!("{}/{}", job.metadata.namespace, job.metadata.name),
            "unable to find the time when the job finished"
        );
        return None;
    }
    if finished_at > now {
        warn!(
            job = %format!("{}/{}", job.metadata.namespace, job.metadata.name),
            "job finished in the future, likely clock skew; cleanup deferred"
        );
    }
    Some(finished_at + ttl - now)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;
    use convoy_core::JobStatePhase;

    fn finished_job(name: &str, phase: JobStatePhase, finished_at: i64, ttl: Option<i64>) -> Job {
        let mut job = Job::default();
        job.metadata.name = name.to_string();
        job.metadata.namespace = "default".to_string();
        job.spec.ttl_seconds_after_finished = ttl;
        job.status.state.phase = phase;
        job.status.state.last_transition_time = finished_at;
        job
    }

    #[tokio::test]
    async fn test_expired_job_is_deleted_with_event() {
        let client = MockClient::new();
        client.put_job(finished_job("done", JobStatePhase::Completed, 100, Some(10)));

        let gc = GarbageCollector::new(client.clone());
        gc.process_job_at("default/done", 111).await.unwrap();

        assert_eq!(client.deleted_jobs(), vec!["default/done".to_string()]);
        assert!(client
            .events()
            .iter()
            .any(|e| e.reason == reasons::TTL_EXPIRED));
    }

    #[tokio::test]
    async fn test_unexpired_job_survives() {
        let client = MockClient::new();
        client.put_job(finished_job("fresh", JobStatePhase::Failed, 100, Some(60)));

        let gc = GarbageCollector::new(client.clone());
        gc.process_job_at("default/fresh", 110).await.unwrap();

        assert!(client.deleted_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_running_or_ttl_less_jobs_are_ignored() {
        let client = MockClient::new();
        client.put_job(finished_job("running", JobStatePhase::Running, 100, Some(1)));
        client.put_job(finished_job("no-ttl", JobStatePhase::Completed, 100, None));

        let gc = GarbageCollector::new(client.clone());
        gc.process_job_at("default/running", 500).await.unwrap();
        gc.process_job_at("default/no-ttl", 500).await.unwrap();

        assert!(client.deleted_jobs().is_empty());
    }

    #[test]
    fn test_on_job_changed_filters() {
        let client = MockClient::new();
        let gc = GarbageCollector::new(client);

        // Only finished jobs with a TTL are queued; this one is running.
        let running = finished_job("r", JobStatePhase::Running, 100, Some(5));
        gc.on_job_changed(&running);

        let mut deleting = finished_job("d", JobStatePhase::Completed, 100, Some(5));
        deleting.metadata.deletion_timestamp = Some(200);
        gc.on_job_changed(&deleting);
        // Neither lands in the queue; nothing to assert beyond no panic,
        // the receiver is drained in run() which is not started here.
    }
}
