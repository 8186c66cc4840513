//! Convoy Core - Fundamental types for the Convoy batch-scheduling control plane
//!
//! This crate provides:
//! - The resource vector and its dimension-wise arithmetic
//! - API object kinds (Pod, Node, PodGroup, Queue, Job) and their metadata
//! - Task/job/queue phase enums and typed identifiers
//! - Watch events and recorded event reasons
//! - Error types with miette diagnostics

pub mod error;
pub mod events;
pub mod objects;
pub mod resource;
pub mod types;

// Re-export commonly used types
pub use error::{ConvoyError, Result};
pub use events::{EventType, RecordedEvent, WatchEventType};
pub use objects::{
    Job, JobSpec, JobStatus, Metadata, Node, OwnerReference, Pod, PodGroup, PodGroupSpec,
    PodGroupStatus, PriorityClass, Queue, QueueSpec, Taint, TaskTemplate, Toleration,
};
pub use resource::Resource;
pub use types::{
    JobId, JobStatePhase, PodGroupPhase, QueueId, QueueState, TaskId, TaskStatus,
    GROUP_NAME_ANNOTATION, PREEMPTABLE_ANNOTATION,
};

/// Serialize a resource to JSON
pub fn to_json<T: serde::Serialize>(object: &T) -> Result<String> {
    serde_json::to_string(object).map_err(|e| {
        ConvoyError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        ConvoyError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        ConvoyError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let mut pod = Pod::default();
        pod.metadata.name = "trainer-0".to_string();

        let json = to_json(&pod).unwrap();
        assert!(json.contains("trainer-0"));

        let deserialized: Pod = from_json(&json).unwrap();
        assert_eq!(deserialized.metadata.name, "trainer-0");
    }
}
