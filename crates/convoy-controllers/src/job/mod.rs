//! The job controller: watches job events and drives the state machine
//! through a keyed worker pool so all events of one job serialize.

mod state;

pub use state::{JobAction, JobHandler, JobStateMachine};

use crate::client::ControlClient;
use crate::error::Result;
use crate::workqueue::RateLimitedQueue;
use convoy_core::events::reasons;
use convoy_core::{Job, RecordedEvent};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Number of times a job request is retried before it is dropped.
const MAX_RETRIES: u32 = 15;

/// A unit of work for one job
#[derive(Debug, Clone)]
pub struct Request {
    pub namespace: String,
    pub job_name: String,
    pub action: JobAction,
}

impl Request {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.job_name)
    }
}

#[derive(Clone)]
pub struct JobControllerConfig {
    /// Width of the keyed worker pool
    pub workers: usize,
}

impl Default for JobControllerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// Watches jobs and applies lifecycle actions through an injected handler.
/// Requests are routed to a fixed worker by hashing `namespace/name`.
pub struct JobController {
    client: Arc<dyn ControlClient>,
    handler: Arc<dyn JobHandler>,
    queues: Vec<RateLimitedQueue<Request>>,
    receivers: Mutex<Vec<mpsc::UnboundedReceiver<Request>>>,
}

impl JobController {
    pub fn new(
        client: Arc<dyn ControlClient>,
        handler: Arc<dyn JobHandler>,
        config: JobControllerConfig,
    ) -> Self {
        let workers = config.workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut receivers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (queue, rx) = RateLimitedQueue::new(MAX_RETRIES, Duration::from_millis(5));
            queues.push(queue);
            receivers.push(rx);
        }

        Self {
            client,
            handler,
            queues,
            receivers: Mutex::new(receivers),
        }
    }

    /// Route a request to its worker queue
    fn enqueue(&self, request: Request) {
        let worker = Self::route(&request.key(), self.queues.len());
        self.queues[worker].add(request);
    }

    fn route(key: &str, workers: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % workers.max(1)
    }

    // --- Event handlers ---

    pub fn on_job_added(&self, job: &Job) {
        debug!(job = %format!("{}/{}", job.metadata.namespace, job.metadata.name), "job added");
        self.enqueue(Request {
            namespace: job.metadata.namespace.clone(),
            job_name: job.metadata.name.clone(),
            action: JobAction::Sync,
        });
    }

    pub fn on_job_updated(&self, job: &Job) {
        self.on_job_added(job);
    }

    /// An external command (abort, terminate, restart) targeting a job
    pub fn on_command(&self, namespace: &str, job_name: &str, action: JobAction) {
        self.enqueue(Request {
            namespace: namespace.to_string(),
            job_name: job_name.to_string(),
            action,
        });
    }

    /// Spawn the worker pool
    pub fn run(self: &Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let receivers = std::mem::take(&mut *self.receivers.lock().expect("receivers lock"));
        info!(workers = receivers.len(), "job controller is running");

        receivers
            .into_iter()
            .enumerate()
            .map(|(index, mut rx)| {
                let controller = Arc::clone(self);
                let token = token.clone();
                tokio::spawn(async move {
                    debug!(worker = index, "job worker started");
                    loop {
                        let request = tokio::select! {
                            _ = token.cancelled() => break,
                            request = rx.recv() => match request {
                                Some(request) => request,
                                None => break,
                            },
                        };
                        controller.handle(index, request).await;
                    }
                    debug!(worker = index, "job worker stopped");
                })
            })
            .collect()
    }

    async fn handle(&self, worker: usize, request: Request) {
        let key = request.key();
        debug!(worker, key = %key, action = %request.action, "handling job request");

        match self.process(&request).await {
            Ok(()) => self.queues[worker].forget(&key),
            Err(e) => {
                if self.queues[worker].add_rate_limited(&key, request.clone()) {
                    debug!(key = %key, "failed to handle job, re-queued: {}", e);
                } else {
                    warn!(key = %key, "dropping job out of the queue, retry limit reached: {}", e);
                    self.client.record_event(RecordedEvent::warning(
                        format!("Job/{}", key),
                        reasons::EXECUTE_ACTION,
                        format!("job failed on action {} for retry limit reached", request.action),
                    ));
                }
            }
        }
    }

    async fn process(&self, request: &Request) -> Result<()> {
        let Some(job) = self
            .client
            .get_job(&request.namespace, &request.job_name)
            .await?
        else {
            // Deleted while queued; nothing to reconcile.
            return Ok(());
        };

        if request.action != JobAction::Sync {
            self.client.record_event(RecordedEvent::normal(
                format!("Job/{}", request.key()),
                reasons::EXECUTE_ACTION,
                format!("start to execute action {}", request.action),
            ));
        }

        let machine = JobStateMachine::new(self.handler.as_ref());
        if let Err(e) = machine.execute(&job, request.action).await {
            error!(job = %request.key(), "failed to execute {}: {}", request.action, e);
            return Err(e);
        }
        Ok(())
    }
}
