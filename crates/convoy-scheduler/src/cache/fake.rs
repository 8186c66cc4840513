//! In-memory fakes for the external cluster interfaces.
//!
//! Used by tests and by the standalone binary when no real cluster client is
//! wired in; every operation is recorded and optionally signalled on a
//! channel so callers can await the asynchronous dispatcher.

use super::{Binder, Evictor, EventRecorder, StatusUpdater};
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use convoy_core::{PodGroupPhase, RecordedEvent};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Records bindings; fails the first `fail_times` calls with a transient
/// error to exercise the dispatcher's retry path.
pub struct FakeBinder {
    binds: Mutex<BTreeMap<String, String>>,
    calls: AtomicU32,
    fail_times: AtomicU32,
    notify: mpsc::UnboundedSender<String>,
}

impl FakeBinder {
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<String>) {
        Self::failing(0)
    }

    /// A binder whose first `fail_times` calls return a transient error
    pub fn failing(fail_times: u32) -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            std::sync::Arc::new(Self {
                binds: Mutex::new(BTreeMap::new()),
                calls: AtomicU32::new(0),
                fail_times: AtomicU32::new(fail_times),
                notify: tx,
            }),
            rx,
        )
    }

    /// Successful binds so far, `namespace/name -> node`
    pub fn binds(&self) -> BTreeMap<String, String> {
        self.binds.lock().expect("binds lock").clone()
    }

    /// Number of successful bind calls
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Binder for FakeBinder {
    async fn bind(&self, namespace: &str, name: &str, node: &str) -> Result<()> {
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.store(remaining - 1, Ordering::SeqCst);
            return Err(SchedulerError::transient_api("injected bind failure"));
        }

        let key = format!("{}/{}", namespace, name);
        self.binds
            .lock()
            .expect("binds lock")
            .insert(key.clone(), node.to_string());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.notify.send(key);
        Ok(())
    }
}

/// Records evictions
pub struct FakeEvictor {
    evicted: Mutex<Vec<String>>,
    notify: mpsc::UnboundedSender<String>,
}

impl FakeEvictor {
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            std::sync::Arc::new(Self {
                evicted: Mutex::new(Vec::new()),
                notify: tx,
            }),
            rx,
        )
    }

    /// `namespace/name` keys of evicted pods, in order
    pub fn evicted(&self) -> Vec<String> {
        self.evicted.lock().expect("evicted lock").clone()
    }
}

#[async_trait]
impl Evictor for FakeEvictor {
    async fn evict(&self, namespace: &str, name: &str, _reason: &str) -> Result<()> {
        let key = format!("{}/{}", namespace, name);
        self.evicted.lock().expect("evicted lock").push(key.clone());
        let _ = self.notify.send(key);
        Ok(())
    }
}

/// Records PodGroup phase transitions
#[derive(Default)]
pub struct FakeStatusUpdater {
    updates: Mutex<Vec<(String, PodGroupPhase)>>,
}

impl FakeStatusUpdater {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// `(namespace/name, phase)` pairs, in order
    pub fn updates(&self) -> Vec<(String, PodGroupPhase)> {
        self.updates.lock().expect("updates lock").clone()
    }
}

#[async_trait]
impl StatusUpdater for FakeStatusUpdater {
    async fn update_pod_group(
        &self,
        namespace: &str,
        name: &str,
        phase: PodGroupPhase,
    ) -> Result<()> {
        self.updates
            .lock()
            .expect("updates lock")
            .push((format!("{}/{}", namespace, name), phase));
        Ok(())
    }
}

/// Records events
#[derive(Default)]
pub struct FakeRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeRecorder {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl EventRecorder for FakeRecorder {
    fn record(&self, event: RecordedEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}
