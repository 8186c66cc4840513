use crate::error::Result;
use async_trait::async_trait;
use convoy_core::{Job, Pod, PodGroup, RecordedEvent};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// The slice of the cluster API the controllers drive.
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Cascading delete with foreground propagation
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_pod_group(&self, namespace: &str, name: &str) -> Result<Option<PodGroup>>;

    async fn create_pod_group(&self, pg: &PodGroup) -> Result<()>;

    async fn update_pod(&self, pod: &Pod) -> Result<()>;

    fn record_event(&self, event: RecordedEvent);
}

/// In-memory client for tests and standalone runs
#[derive(Default)]
pub struct MockClient {
    jobs: Mutex<BTreeMap<String, Job>>,
    pod_groups: Mutex<BTreeMap<String, PodGroup>>,
    pods: Mutex<BTreeMap<String, Pod>>,
    deleted_jobs: Mutex<Vec<String>>,
    events: Mutex<Vec<RecordedEvent>>,
}

impl MockClient {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn put_job(&self, job: Job) {
        let key = format!("{}/{}", job.metadata.namespace, job.metadata.name);
        self.jobs.lock().expect("jobs lock").insert(key, job);
    }

    pub fn put_pod(&self, pod: Pod) {
        let key = format!("{}/{}", pod.metadata.namespace, pod.metadata.name);
        self.pods.lock().expect("pods lock").insert(key, pod);
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .lock()
            .expect("pods lock")
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    pub fn pod_groups(&self) -> Vec<PodGroup> {
        self.pod_groups
            .lock()
            .expect("pod groups lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.deleted_jobs.lock().expect("deleted lock").clone()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

#[async_trait]
impl ControlClient for MockClient {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .expect("jobs lock")
            .get(&format!("{}/{}", namespace, name))
            .cloned())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let key = format!("{}/{}", namespace, name);
        self.jobs.lock().expect("jobs lock").remove(&key);
        self.deleted_jobs.lock().expect("deleted lock").push(key);
        Ok(())
    }

    async fn get_pod_group(&self, namespace: &str, name: &str) -> Result<Option<PodGroup>> {
        Ok(self
            .pod_groups
            .lock()
            .expect("pod groups lock")
            .get(&format!("{}/{}", namespace, name))
            .cloned())
    }

    async fn create_pod_group(&self, pg: &PodGroup) -> Result<()> {
        let key = format!("{}/{}", pg.metadata.namespace, pg.metadata.name);
        self.pod_groups
            .lock()
            .expect("pod groups lock")
            .insert(key, pg.clone());
        Ok(())
    }

    async fn update_pod(&self, pod: &Pod) -> Result<()> {
        self.put_pod(pod.clone());
        Ok(())
    }

    fn record_event(&self, event: RecordedEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}
