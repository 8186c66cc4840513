use serde::{Deserialize, Serialize};

/// Watch event type from the cluster API stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// Severity of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// An event recorded against a cluster object, with a machine-readable reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// `Kind/namespace/name` of the object the event is about
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl RecordedEvent {
    pub fn warning(
        object: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            event_type: EventType::Warning,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn normal(
        object: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            event_type: EventType::Normal,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Machine-readable event reasons surfaced to users
pub mod reasons {
    pub const UNSCHEDULABLE: &str = "Unschedulable";
    pub const FAILED_SCHEDULING: &str = "FailedScheduling";
    pub const PREEMPT_FAILED: &str = "PreemptFailed";
    pub const QUEUE_CLOSED: &str = "QueueClosed";
    pub const INSUFFICIENT_RESOURCE: &str = "InsufficientResource";
    pub const TTL_EXPIRED: &str = "TTLExpired";
    pub const EXECUTE_ACTION: &str = "ExecuteAction";
}
