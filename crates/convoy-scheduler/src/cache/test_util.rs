//! Shared builders for scheduler tests, shaped after the objects the cluster
//! API would deliver.

use super::fake::{FakeBinder, FakeEvictor, FakeRecorder, FakeStatusUpdater};
use super::{DispatchConfig, SchedulerCache};
use convoy_core::objects::{
    Container, Metadata, Node, Pod, PodGroup, PodGroupSpec, PodGroupStatus, Queue, QueueSpec,
};
use convoy_core::{PodGroupPhase, RecordedEvent, GROUP_NAME_ANNOTATION};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Handles to the fake cluster interfaces behind a test cache
pub struct Fakes {
    pub binder: Arc<FakeBinder>,
    pub evictor: Arc<FakeEvictor>,
    pub status_updater: Arc<FakeStatusUpdater>,
    pub recorder: Arc<FakeRecorder>,
    binder_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    evictor_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Fakes {
    /// Await `count` bind notifications, then return all binds so far
    pub async fn wait_for_binds(&self, count: usize) -> BTreeMap<String, String> {
        let mut rx = self.binder_rx.lock().await;
        for _ in 0..count {
            tokio::time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .expect("timed out waiting for a binding request")
                .expect("binder channel closed");
        }
        self.binder.binds()
    }

    /// Await `count` eviction notifications
    pub async fn wait_for_evictions(&self, count: usize) -> Vec<String> {
        let mut rx = self.evictor_rx.lock().await;
        for _ in 0..count {
            tokio::time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .expect("timed out waiting for an eviction request")
                .expect("evictor channel closed");
        }
        self.evictor.evicted()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.recorder.events()
    }
}

/// A cache wired to fakes, with a small deterministic dispatcher
pub fn build_cache() -> (SchedulerCache, Fakes) {
    build_cache_with_binder_failures(0)
}

pub fn build_cache_with_binder_failures(fail_times: u32) -> (SchedulerCache, Fakes) {
    let (binder, binder_rx) = FakeBinder::failing(fail_times);
    let (evictor, evictor_rx) = FakeEvictor::new();
    let status_updater = FakeStatusUpdater::new();
    let recorder = FakeRecorder::new();

    let cache = SchedulerCache::new(
        binder.clone(),
        evictor.clone(),
        status_updater.clone(),
        recorder.clone(),
        DispatchConfig {
            workers: 2,
            retry_base: Duration::from_millis(1),
            ..Default::default()
        },
    );

    (
        cache,
        Fakes {
            binder,
            evictor,
            status_updater,
            recorder,
            binder_rx: tokio::sync::Mutex::new(binder_rx),
            evictor_rx: tokio::sync::Mutex::new(evictor_rx),
        },
    )
}

/// Build a pod the way the cluster API would deliver it
pub fn build_pod(
    namespace: &str,
    name: &str,
    node_name: &str,
    phase: &str,
    cpu: &str,
    memory: &str,
    group: &str,
) -> Pod {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), cpu.to_string());
    requests.insert("memory".to_string(), memory.to_string());

    let mut annotations = BTreeMap::new();
    annotations.insert(GROUP_NAME_ANNOTATION.to_string(), group.to_string());

    Pod {
        metadata: Metadata {
            name: name.to_string(),
            namespace: namespace.to_string(),
            annotations,
            ..Default::default()
        },
        spec: convoy_core::objects::PodSpec {
            node_name: if node_name.is_empty() {
                None
            } else {
                Some(node_name.to_string())
            },
            containers: vec![Container {
                name: "main".to_string(),
                requests,
            }],
            ..Default::default()
        },
        status: convoy_core::objects::PodStatus {
            phase: phase.to_string(),
        },
    }
}

pub fn build_node(name: &str, cpu: &str, memory: &str) -> Node {
    let mut allocatable = BTreeMap::new();
    allocatable.insert("cpu".to_string(), cpu.to_string());
    allocatable.insert("memory".to_string(), memory.to_string());

    Node {
        metadata: Metadata {
            name: name.to_string(),
            ..Default::default()
        },
        allocatable,
        ..Default::default()
    }
}

pub fn build_pod_group(
    namespace: &str,
    name: &str,
    queue: &str,
    sub_group: &str,
    min_member: u32,
    min_resources: Option<BTreeMap<String, String>>,
) -> PodGroup {
    PodGroup {
        metadata: Metadata {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        },
        spec: PodGroupSpec {
            queue: queue.to_string(),
            sub_group: sub_group.to_string(),
            min_member,
            min_resources,
            ..Default::default()
        },
        status: PodGroupStatus::default(),
    }
}

pub fn build_pending_pod_group(
    namespace: &str,
    name: &str,
    queue: &str,
    min_cpu: &str,
) -> PodGroup {
    let mut pg = build_pod_group(
        namespace,
        name,
        queue,
        "",
        0,
        Some(resource_list(min_cpu, "")),
    );
    pg.status.phase = PodGroupPhase::Pending.to_string();
    pg
}

pub fn build_queue(name: &str, weight: i32) -> Queue {
    Queue {
        metadata: Metadata {
            name: name.to_string(),
            ..Default::default()
        },
        spec: QueueSpec {
            weight,
            reclaimable: None,
            state: None,
        },
    }
}

/// A quantity map; empty strings are omitted
pub fn resource_list(cpu: &str, memory: &str) -> BTreeMap<String, String> {
    let mut list = BTreeMap::new();
    if !cpu.is_empty() {
        list.insert("cpu".to_string(), cpu.to_string());
    }
    if !memory.is_empty() {
        list.insert("memory".to_string(), memory.to_string());
    }
    list
}
