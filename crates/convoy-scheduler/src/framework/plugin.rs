use super::SessionState;
use crate::api::{JobInfo, NodeInfo, QueueInfo, TaskInfo};
use convoy_core::{JobId, Resource, TaskId};
use std::cmp::Ordering;

/// A tentative placement change, delivered to plugins so they can keep
/// incremental state (e.g. fair-share accounting) current within the pass.
#[derive(Debug, Clone)]
pub struct AllocationEvent {
    pub task: TaskId,
    pub job: JobId,
    pub node: String,
    pub res_req: Resource,
}

/// A scheduling plugin. Each plugin implements a subset of the extension
/// points; the session composes enabled implementations across tiers.
///
/// Plugins are values owned by the session, never shared across passes.
pub trait Plugin: Send {
    fn name(&self) -> &'static str;

    /// Called once after the session state is assembled
    fn on_session_open(&mut self, _state: &SessionState) {}

    /// Called once before the session flushes its decisions
    fn on_session_close(&mut self, _state: &SessionState) {}

    // --- Comparator points: first non-equal answer across tiers wins ---

    fn job_order(&self, _a: &JobInfo, _b: &JobInfo) -> Option<Ordering> {
        None
    }

    fn queue_order(
        &self,
        _a: &QueueInfo,
        _b: &QueueInfo,
        _state: &SessionState,
    ) -> Option<Ordering> {
        None
    }

    fn task_order(&self, _a: &TaskInfo, _b: &TaskInfo) -> Option<Ordering> {
        None
    }

    fn namespace_order(&self, _a: &str, _b: &str) -> Option<Ordering> {
        None
    }

    // --- Guard points: AND across enabled plugins ---

    /// Whether `task` may run on `node`; Err carries the reject reason
    fn predicate(&self, _task: &TaskInfo, _node: &NodeInfo) -> Result<(), String> {
        Ok(())
    }

    fn job_ready(&self, _job: &JobInfo) -> Option<bool> {
        None
    }

    fn job_pipelined(&self, _job: &JobInfo, _state: &SessionState) -> Option<bool> {
        None
    }

    fn job_enqueueable(&self, _job: &JobInfo, _state: &SessionState) -> Option<bool> {
        None
    }

    /// First invalid answer across tiers wins
    fn job_valid(&self, _job: &JobInfo) -> Option<Result<(), String>> {
        None
    }

    // --- Additive point: scores sum across enabled plugins ---

    fn node_order(&self, _task: &TaskInfo, _node: &NodeInfo) -> f64 {
        0.0
    }

    // --- Queue capacity points (ungated; active when the plugin is in a tier) ---

    /// Whether the queue has consumed its deserved share
    fn overused(&self, _queue: &QueueInfo, _state: &SessionState) -> bool {
        false
    }

    /// Whether the queue may take on `candidate` more resources
    fn allocatable(
        &self,
        _queue: &QueueInfo,
        _candidate: &Resource,
        _state: &SessionState,
    ) -> bool {
        true
    }

    // --- Victim selection: within a tier, answers intersect; the first tier
    //     with any answer wins ---

    fn preemptable(
        &self,
        _preemptor: &JobInfo,
        _candidates: &[&TaskInfo],
        _state: &SessionState,
    ) -> Option<Vec<TaskId>> {
        None
    }

    fn reclaimable(
        &self,
        _reclaimer: &JobInfo,
        _candidates: &[&TaskInfo],
        _state: &SessionState,
    ) -> Option<Vec<TaskId>> {
        None
    }

    // --- Incremental state hooks ---

    fn on_allocate(&mut self, _event: &AllocationEvent, _state: &SessionState) {}

    fn on_deallocate(&mut self, _event: &AllocationEvent, _state: &SessionState) {}
}
