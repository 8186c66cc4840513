//! Authoritative, eventually-consistent view of cluster objects.
//!
//! The cache ingests watch events concurrently with the scheduling pass,
//! produces atomic snapshots, and serializes outbound bind/evict/status
//! operations through a keyed worker pool.

mod dispatch;
pub mod fake;
#[cfg(test)]
pub(crate) mod test_util;

pub use dispatch::DispatchConfig;

use crate::api::{JobInfo, NodeInfo, QueueInfo, Snapshot, TaskInfo};
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use convoy_core::objects::{Node, Pod, PodGroup, PriorityClass, Queue};
use convoy_core::{JobId, PodGroupPhase, QueueId, RecordedEvent, TaskId, TaskStatus, WatchEventType};
use dispatch::Operation;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Issues pod-to-node bindings against the external cluster API
#[async_trait]
pub trait Binder: Send + Sync {
    async fn bind(&self, namespace: &str, name: &str, node: &str) -> Result<()>;
}

/// Deletes pods (with grace) to make room for higher-priority work
#[async_trait]
pub trait Evictor: Send + Sync {
    async fn evict(&self, namespace: &str, name: &str, reason: &str) -> Result<()>;
}

/// Writes PodGroup phase transitions back to the cluster API
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    async fn update_pod_group(
        &self,
        namespace: &str,
        name: &str,
        phase: PodGroupPhase,
    ) -> Result<()>;
}

/// Records user-visible events against cluster objects
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: RecordedEvent);
}

#[derive(Debug, Default)]
struct CacheState {
    nodes: BTreeMap<String, NodeInfo>,
    jobs: BTreeMap<JobId, JobInfo>,
    queues: BTreeMap<QueueId, QueueInfo>,
    priority_classes: BTreeMap<String, i32>,
    /// Binds issued but not yet observed back from the API, task -> node
    assumed: HashMap<TaskId, String>,
}

/// The scheduler cache. Event handlers run concurrently with the pass and
/// mutate the stores under the write lock; `snapshot()` briefly takes the
/// read lock and deep-copies the per-pass mutable state.
pub struct SchedulerCache {
    state: RwLock<CacheState>,
    binder: std::sync::Arc<dyn Binder>,
    evictor: std::sync::Arc<dyn Evictor>,
    status_updater: std::sync::Arc<dyn StatusUpdater>,
    recorder: std::sync::Arc<dyn EventRecorder>,
    senders: Vec<mpsc::Sender<Operation>>,
    receivers: Mutex<Vec<mpsc::Receiver<Operation>>>,
    config: DispatchConfig,
}

impl SchedulerCache {
    pub fn new(
        binder: std::sync::Arc<dyn Binder>,
        evictor: std::sync::Arc<dyn Evictor>,
        status_updater: std::sync::Arc<dyn StatusUpdater>,
        recorder: std::sync::Arc<dyn EventRecorder>,
        config: DispatchConfig,
    ) -> Self {
        let mut senders = Vec::with_capacity(config.workers);
        let mut receivers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            senders.push(tx);
            receivers.push(rx);
        }

        Self {
            state: RwLock::new(CacheState::default()),
            binder,
            evictor,
            status_updater,
            recorder,
            senders,
            receivers: Mutex::new(receivers),
            config,
        }
    }

    /// Spawn the dispatcher workers. Operations on the same task always land
    /// on the same worker, so they serialize.
    pub fn run(self: &std::sync::Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let receivers = std::mem::take(&mut *self.receivers.lock().expect("receivers lock"));
        receivers
            .into_iter()
            .map(|rx| dispatch::spawn_worker(std::sync::Arc::clone(self), rx, token.clone()))
            .collect()
    }

    // --- Snapshot ---

    /// A structurally-consistent copy of the current stores. Jobs whose
    /// PodGroup has not been observed yet are included; actions decide what
    /// to do with them.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read().expect("cache lock poisoned");
        Snapshot {
            nodes: state.nodes.clone(),
            jobs: state.jobs.clone(),
            queues: state.queues.clone(),
        }
    }

    // --- Event handlers (cluster watch ingest) ---

    /// Dispatch a node watch event to the matching handler
    pub fn handle_node_event(&self, event: WatchEventType, node: &Node) -> Result<()> {
        match event {
            WatchEventType::Added => self.add_node(node),
            WatchEventType::Modified => self.update_node(node),
            WatchEventType::Deleted => {
                self.delete_node(&node.metadata.name);
                Ok(())
            }
        }
    }

    /// Dispatch a pod watch event to the matching handler
    pub fn handle_pod_event(&self, event: WatchEventType, pod: &Pod) -> Result<()> {
        match event {
            WatchEventType::Added => self.add_pod(pod),
            WatchEventType::Modified => self.update_pod(pod),
            WatchEventType::Deleted => {
                self.delete_pod(pod);
                Ok(())
            }
        }
    }

    /// Dispatch a pod group watch event to the matching handler
    pub fn handle_pod_group_event(&self, event: WatchEventType, pg: &PodGroup) -> Result<()> {
        match event {
            WatchEventType::Added => self.add_pod_group(pg),
            WatchEventType::Modified => self.update_pod_group(pg),
            WatchEventType::Deleted => {
                self.delete_pod_group(&pg.metadata.namespace, &pg.metadata.name);
                Ok(())
            }
        }
    }

    /// Dispatch a queue watch event to the matching handler
    pub fn handle_queue_event(&self, event: WatchEventType, queue: &Queue) {
        match event {
            WatchEventType::Added => self.add_queue(queue),
            WatchEventType::Modified => self.update_queue(queue),
            WatchEventType::Deleted => self.delete_queue(&queue.metadata.name),
        }
    }

    pub fn add_node(&self, node: &Node) -> Result<()> {
        let info = NodeInfo::from_node(node)?;
        let mut state = self.state.write().expect("cache lock poisoned");
        let name = info.name.clone();
        state.nodes.insert(name.clone(), info);

        // Tasks observed before their node attach now.
        let placed: Vec<TaskInfo> = state
            .jobs
            .values()
            .flat_map(|j| j.tasks.values())
            .filter(|t| t.node_name.as_deref() == Some(name.as_str()))
            .cloned()
            .collect();
        let node_info = state.nodes.get_mut(&name).expect("node just inserted");
        for task in placed {
            if let Err(e) = node_info.add_task(&task) {
                warn!(node = %name, task = %task.uid, "skipping inconsistent task: {}", e);
            }
        }
        Ok(())
    }

    pub fn update_node(&self, node: &Node) -> Result<()> {
        self.delete_node(&node.metadata.name);
        self.add_node(node)
    }

    pub fn delete_node(&self, name: &str) {
        let mut state = self.state.write().expect("cache lock poisoned");
        state.nodes.remove(name);
    }

    pub fn add_pod(&self, pod: &Pod) -> Result<()> {
        let task = match TaskInfo::from_pod(pod) {
            Ok(task) => task,
            Err(e) => {
                debug!(
                    pod = %format!("{}/{}", pod.metadata.namespace, pod.metadata.name),
                    "ignoring pod: {}", e
                );
                return Ok(());
            }
        };

        let mut state = self.state.write().expect("cache lock poisoned");
        let mut task = task;
        if task.priority == 0 && !pod.spec.priority_class_name.is_empty() {
            if let Some(value) = state.priority_classes.get(&pod.spec.priority_class_name) {
                task.priority = *value;
            }
        }

        if let Some(node_name) = task.node_name.clone() {
            if let Some(node) = state.nodes.get_mut(&node_name) {
                node.add_task(&task)?;
            } else {
                warn!(task = %task.uid, node = %node_name, "task placed on unknown node");
            }
        }

        let job_id = task.job.clone();
        let group = job_id
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let job = state
            .jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobInfo::shell(job_id, &task.namespace, &group));
        job.add_task(task);
        Ok(())
    }

    pub fn update_pod(&self, pod: &Pod) -> Result<()> {
        self.delete_pod(pod);
        self.add_pod(pod)
    }

    pub fn delete_pod(&self, pod: &Pod) {
        let Ok(task) = TaskInfo::from_pod(pod) else {
            return;
        };
        let mut state = self.state.write().expect("cache lock poisoned");
        state.assumed.remove(&task.uid);
        let removed = state
            .jobs
            .get_mut(&task.job)
            .and_then(|job| job.remove_task(&task.uid));
        if let Some(stored) = removed {
            if let Some(node_name) = &stored.node_name {
                if let Some(node) = state.nodes.get_mut(node_name) {
                    node.remove_task(&stored.uid, stored.status);
                }
            }
        }
    }

    pub fn add_pod_group(&self, pg: &PodGroup) -> Result<()> {
        let job_id = JobId::new(format!("{}/{}", pg.metadata.namespace, pg.metadata.name));
        let mut state = self.state.write().expect("cache lock poisoned");
        let priority = if pg.spec.priority_class_name.is_empty() {
            0
        } else {
            state
                .priority_classes
                .get(&pg.spec.priority_class_name)
                .copied()
                .unwrap_or(0)
        };
        let job = state
            .jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobInfo::shell(job_id, &pg.metadata.namespace, &pg.metadata.name));
        job.set_pod_group(pg, priority)?;
        Ok(())
    }

    pub fn update_pod_group(&self, pg: &PodGroup) -> Result<()> {
        self.add_pod_group(pg)
    }

    pub fn delete_pod_group(&self, namespace: &str, name: &str) {
        let mut state = self.state.write().expect("cache lock poisoned");
        state.jobs.remove(&JobId::new(format!("{}/{}", namespace, name)));
    }

    pub fn add_queue(&self, queue: &Queue) {
        let info = QueueInfo::from_queue(queue);
        let mut state = self.state.write().expect("cache lock poisoned");
        state.queues.insert(info.uid.clone(), info);
    }

    pub fn update_queue(&self, queue: &Queue) {
        self.add_queue(queue)
    }

    pub fn delete_queue(&self, name: &str) {
        let mut state = self.state.write().expect("cache lock poisoned");
        state.queues.remove(&QueueId::new(name));
    }

    pub fn add_priority_class(&self, pc: &PriorityClass) {
        let mut state = self.state.write().expect("cache lock poisoned");
        state
            .priority_classes
            .insert(pc.metadata.name.clone(), pc.value);
    }

    pub fn delete_priority_class(&self, name: &str) {
        let mut state = self.state.write().expect("cache lock poisoned");
        state.priority_classes.remove(name);
    }

    // --- Outbound operations (session close path) ---

    /// Commit a task-to-node binding. Idempotent by (task, node): repeating
    /// an identical bind coalesces; a conflicting bind fails.
    pub fn bind(&self, task: &TaskInfo, node_name: &str) -> Result<()> {
        let mut state = self.state.write().expect("cache lock poisoned");

        if let Some(assumed) = state.assumed.get(&task.uid) {
            if assumed == node_name {
                return Ok(());
            }
            return Err(SchedulerError::AlreadyBound {
                task: task.uid.clone(),
                node: assumed.clone(),
            });
        }

        let Some(job) = state.jobs.get_mut(&task.job) else {
            return Err(SchedulerError::conflict(
                task.key(),
                "job vanished before bind",
            ));
        };
        job.update_task_status(&task.uid, TaskStatus::Binding)?;
        if let Some(stored) = job.tasks.get_mut(&task.uid) {
            stored.node_name = Some(node_name.to_string());
        }

        let mut placed = task.clone();
        placed.status = TaskStatus::Binding;
        let added = match state.nodes.get_mut(node_name) {
            Some(node) => node.add_task(&placed),
            None => Ok(()),
        };
        if let Err(e) = added {
            if let Some(job) = state.jobs.get_mut(&task.job) {
                let _ = job.update_task_status(&task.uid, TaskStatus::Pending);
            }
            return Err(e);
        }

        state.assumed.insert(task.uid.clone(), node_name.to_string());
        drop(state);

        self.enqueue(
            task.uid.as_str(),
            Operation::Bind {
                task: task.uid.clone(),
                job: task.job.clone(),
                namespace: task.namespace.clone(),
                name: task.name.clone(),
                node: node_name.to_string(),
            },
        )
    }

    /// Initiate eviction of a bound task
    pub fn evict(&self, task: &TaskInfo, reason: &str) -> Result<()> {
        {
            let mut state = self.state.write().expect("cache lock poisoned");
            if let Some(job) = state.jobs.get_mut(&task.job) {
                job.update_task_status(&task.uid, TaskStatus::Releasing)?;
            }
            if let Some(node_name) = &task.node_name {
                if let Some(node) = state.nodes.get_mut(node_name) {
                    node.evict(&task.uid);
                }
            }
        }

        self.enqueue(
            task.uid.as_str(),
            Operation::Evict {
                task: task.uid.clone(),
                namespace: task.namespace.clone(),
                name: task.name.clone(),
                reason: reason.to_string(),
            },
        )
    }

    /// Record a PodGroup phase transition and push it to the API
    pub fn update_pod_group_phase(&self, job_id: &JobId, phase: PodGroupPhase) -> Result<()> {
        let (namespace, name) = {
            let mut state = self.state.write().expect("cache lock poisoned");
            let Some(job) = state.jobs.get_mut(job_id) else {
                return Err(SchedulerError::conflict(
                    job_id.to_string(),
                    "job vanished before status update",
                ));
            };
            job.phase = phase;
            (job.namespace.clone(), job.name.clone())
        };

        self.enqueue(
            job_id.as_str(),
            Operation::PodGroupStatus {
                namespace,
                name,
                phase,
            },
        )
    }

    /// Forward session events to the recorder
    pub fn record_events(&self, events: Vec<RecordedEvent>) {
        for event in events {
            self.recorder.record(event);
        }
    }

    // --- Dispatcher plumbing ---

    fn enqueue(&self, key: &str, op: Operation) -> Result<()> {
        let worker = dispatch::route(key, self.senders.len());
        match self.senders[worker].try_send(op) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(op)) => {
                error!(key, "dispatch queue full, dropping {:?}", op);
                if let Operation::Bind { task, job, .. } = &op {
                    self.fail_bind(task, job);
                }
                Err(SchedulerError::DispatchOverflow {
                    task: TaskId::new(key),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SchedulerError::internal(
                "dispatcher is shut down".to_string(),
            )),
        }
    }

    /// Roll a failed bind back to Pending so the next pass re-plans it
    pub(crate) fn fail_bind(&self, task_id: &TaskId, job_id: &JobId) {
        let mut state = self.state.write().expect("cache lock poisoned");
        let node_name = state.assumed.remove(task_id);

        if let Some(job) = state.jobs.get_mut(job_id) {
            if job.tasks.contains_key(task_id) {
                if let Err(e) = job.update_task_status(task_id, TaskStatus::Pending) {
                    warn!(task = %task_id, "failed to reset task status: {}", e);
                }
                if let Some(task) = job.tasks.get_mut(task_id) {
                    task.node_name = None;
                }
            }
        }

        if let Some(node_name) = node_name {
            if let Some(node) = state.nodes.get_mut(&node_name) {
                node.remove_task(task_id, TaskStatus::Binding);
            }
        }
    }

    pub(crate) fn binder(&self) -> &dyn Binder {
        self.binder.as_ref()
    }

    pub(crate) fn evictor(&self) -> &dyn Evictor {
        self.evictor.as_ref()
    }

    pub(crate) fn status_updater(&self) -> &dyn StatusUpdater {
        self.status_updater.as_ref()
    }

    pub(crate) fn recorder(&self) -> &dyn EventRecorder {
        self.recorder.as_ref()
    }

    pub(crate) fn dispatch_config(&self) -> &DispatchConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_reflects_events() {
        let (cache, _fakes) = build_cache();

        cache.add_node(&build_node("n1", "2", "4Gi")).unwrap();
        cache.add_queue(&build_queue("c1", 1));
        cache
            .add_pod_group(&build_pod_group("c1", "pg1", "c1", "", 2, None))
            .unwrap();
        cache
            .add_pod(&build_pod("c1", "p1", "", "Pending", "1", "1G", "pg1"))
            .unwrap();

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.queues.len(), 1);
        let job = &snapshot.jobs[&JobId::new("c1/pg1")];
        assert_eq!(job.min_member, 2);
        assert_eq!(job.tasks.len(), 1);
    }

    #[test]
    fn test_pod_before_pod_group_creates_shell() {
        let (cache, _fakes) = build_cache();
        cache
            .add_pod(&build_pod("c1", "p1", "", "Pending", "1", "1G", "pg1"))
            .unwrap();

        let snapshot = cache.snapshot();
        let job = &snapshot.jobs[&JobId::new("c1/pg1")];
        assert!(!job.has_pod_group);
        assert_eq!(job.tasks.len(), 1);
    }

    #[test]
    fn test_bound_pod_occupies_node() {
        let (cache, _fakes) = build_cache();
        cache.add_node(&build_node("n1", "2", "4Gi")).unwrap();
        cache
            .add_pod(&build_pod("c1", "p1", "n1", "Running", "1", "1G", "pg1"))
            .unwrap();

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.nodes["n1"].used.milli_cpu, 1000);
        assert_eq!(snapshot.nodes["n1"].idle.milli_cpu, 1000);
    }

    #[test]
    fn test_watch_event_dispatch() {
        let (cache, _fakes) = build_cache();
        cache
            .handle_node_event(WatchEventType::Added, &build_node("n1", "2", "4Gi"))
            .unwrap();

        let pod = build_pod("c1", "p1", "n1", "Running", "1", "1G", "pg1");
        cache.handle_pod_event(WatchEventType::Added, &pod).unwrap();
        assert_eq!(cache.snapshot().nodes["n1"].used.milli_cpu, 1000);

        // The next snapshot reflects a modification atomically.
        let mut moved = pod.clone();
        moved.status.phase = "Succeeded".to_string();
        cache
            .handle_pod_event(WatchEventType::Modified, &moved)
            .unwrap();
        assert!(cache.snapshot().nodes["n1"].used.is_empty());

        cache.handle_pod_event(WatchEventType::Deleted, &moved).unwrap();
        assert!(cache.snapshot().jobs[&JobId::new("c1/pg1")]
            .tasks
            .is_empty());
    }

    #[test]
    fn test_node_added_after_pod_attaches_tasks() {
        let (cache, _fakes) = build_cache();
        cache
            .add_pod(&build_pod("c1", "p1", "n1", "Running", "1", "1G", "pg1"))
            .unwrap();
        cache.add_node(&build_node("n1", "2", "4Gi")).unwrap();

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.nodes["n1"].used.milli_cpu, 1000);
    }

    #[tokio::test]
    async fn test_bind_is_idempotent_and_conflicts_rejected() {
        let (cache, fakes) = build_cache();
        let cache = Arc::new(cache);
        let token = CancellationToken::new();
        cache.run(token.clone());

        cache.add_node(&build_node("n1", "2", "4Gi")).unwrap();
        cache
            .add_pod(&build_pod("c1", "p1", "", "Pending", "1", "1G", "pg1"))
            .unwrap();

        let snapshot = cache.snapshot();
        let task = snapshot.jobs[&JobId::new("c1/pg1")]
            .tasks
            .values()
            .next()
            .unwrap()
            .clone();

        cache.bind(&task, "n1").unwrap();
        // Identical bind coalesces into a no-op.
        cache.bind(&task, "n1").unwrap();
        // A conflicting bind is rejected.
        let err = cache.bind(&task, "n2").unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyBound { .. }));

        let bound = fakes.wait_for_binds(1).await;
        assert_eq!(bound.get("c1/p1").map(|s| s.as_str()), Some("n1"));
        // Dedup: one API call despite two accepted bind requests.
        assert_eq!(fakes.binder.call_count(), 1);
        token.cancel();
    }

    #[tokio::test]
    async fn test_bind_retries_transient_failures() {
        let (cache, fakes) = build_cache_with_binder_failures(2);
        let cache = Arc::new(cache);
        let token = CancellationToken::new();
        cache.run(token.clone());

        cache.add_node(&build_node("n1", "2", "4Gi")).unwrap();
        cache
            .add_pod(&build_pod("c1", "p1", "", "Pending", "1", "1G", "pg1"))
            .unwrap();

        let snapshot = cache.snapshot();
        let task = snapshot.jobs[&JobId::new("c1/pg1")]
            .tasks
            .values()
            .next()
            .unwrap()
            .clone();

        cache.bind(&task, "n1").unwrap();

        // Two injected failures are absorbed by back-off before success.
        let bound = fakes.wait_for_binds(1).await;
        assert_eq!(bound.get("c1/p1").map(|s| s.as_str()), Some("n1"));
        token.cancel();
    }
}
