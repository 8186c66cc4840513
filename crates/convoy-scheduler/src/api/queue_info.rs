use convoy_core::objects::Queue;
use convoy_core::{QueueId, QueueState};

/// A tenant bucket: the scheduler-side view of a Queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueInfo {
    pub uid: QueueId,
    pub name: String,
    /// Proportional share of the cluster, >= 1
    pub weight: i32,
    /// Whether over-quota resources may be reclaimed from this queue
    pub reclaimable: bool,
    pub state: QueueState,
}

impl QueueInfo {
    pub fn from_queue(queue: &Queue) -> Self {
        let state = match queue.spec.state.as_deref() {
            Some("Closed") => QueueState::Closed,
            _ => QueueState::Open,
        };
        Self {
            uid: QueueId::new(queue.metadata.name.clone()),
            name: queue.metadata.name.clone(),
            weight: queue.spec.weight.max(1),
            reclaimable: queue.spec.reclaimable.unwrap_or(true),
            state,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == QueueState::Open
    }
}
