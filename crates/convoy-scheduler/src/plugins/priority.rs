use crate::api::{JobInfo, TaskInfo};
use crate::framework::Plugin;
use std::cmp::Ordering;

/// Orders jobs and tasks by priority (higher first), then creation time.
pub struct PriorityPlugin;

impl Plugin for PriorityPlugin {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn job_order(&self, a: &JobInfo, b: &JobInfo) -> Option<Ordering> {
        Some(
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.creation_timestamp.cmp(&b.creation_timestamp)),
        )
    }

    fn task_order(&self, a: &TaskInfo, b: &TaskInfo) -> Option<Ordering> {
        Some(
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.creation_timestamp.cmp(&b.creation_timestamp)),
        )
    }
}
