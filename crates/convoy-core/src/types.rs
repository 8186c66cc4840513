use serde::{Deserialize, Serialize};
use std::fmt;

/// Annotation linking a Pod to the PodGroup it is scheduled with
pub const GROUP_NAME_ANNOTATION: &str = "scheduling.volcano.sh/group-name";

/// Annotation opting a Pod out of preemption when set to "false"
pub const PREEMPTABLE_ANNOTATION: &str = "scheduling.volcano.sh/preemptable";

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Stable identifier of a schedulable task (one Pod)
    TaskId
);
string_id!(
    /// Stable identifier of a job (one PodGroup), `namespace/name`
    JobId
);
string_id!(
    /// Stable identifier of a queue
    QueueId
);

/// Status of a single task within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Allocated,
    Pipelined,
    Binding,
    Bound,
    Running,
    Releasing,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskStatus {
    /// Statuses that count toward a gang's readiness
    pub fn counts_as_ready(self) -> bool {
        matches!(
            self,
            TaskStatus::Allocated
                | TaskStatus::Pipelined
                | TaskStatus::Binding
                | TaskStatus::Bound
                | TaskStatus::Running
                | TaskStatus::Succeeded
        )
    }

    /// Statuses whose resources are held on a node
    pub fn occupies_node(self) -> bool {
        matches!(
            self,
            TaskStatus::Allocated | TaskStatus::Binding | TaskStatus::Bound | TaskStatus::Running
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Lifecycle phase of a PodGroup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodGroupPhase {
    Pending,
    Inqueue,
    Running,
    #[default]
    Unknown,
    Completed,
}

impl fmt::Display for PodGroupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl PodGroupPhase {
    /// Parse a phase from its wire string; empty or unrecognized is Unknown
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => PodGroupPhase::Pending,
            "Inqueue" => PodGroupPhase::Inqueue,
            "Running" => PodGroupPhase::Running,
            "Completed" => PodGroupPhase::Completed,
            _ => PodGroupPhase::Unknown,
        }
    }
}

/// State of a queue. Closed queues admit no new jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueState {
    #[default]
    Open,
    Closed,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Lifecycle phase of a batch Job (controller-side state machine)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatePhase {
    #[default]
    Pending,
    Running,
    Restarting,
    Completed,
    Failed,
    Terminating,
    Terminated,
    Aborted,
}

impl JobStatePhase {
    /// Finished phases are eligible for TTL-based cleanup
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobStatePhase::Completed | JobStatePhase::Failed | JobStatePhase::Terminated
        )
    }
}

impl fmt::Display for JobStatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_classification() {
        assert!(TaskStatus::Allocated.counts_as_ready());
        assert!(TaskStatus::Pipelined.counts_as_ready());
        assert!(!TaskStatus::Pending.counts_as_ready());
        assert!(!TaskStatus::Releasing.counts_as_ready());

        assert!(TaskStatus::Bound.occupies_node());
        assert!(!TaskStatus::Pipelined.occupies_node());
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!(PodGroupPhase::parse("Pending"), PodGroupPhase::Pending);
        assert_eq!(PodGroupPhase::parse(""), PodGroupPhase::Unknown);
        assert_eq!(PodGroupPhase::parse("Inqueue"), PodGroupPhase::Inqueue);
    }

    #[test]
    fn test_job_finished() {
        assert!(JobStatePhase::Completed.is_finished());
        assert!(JobStatePhase::Terminated.is_finished());
        assert!(!JobStatePhase::Running.is_finished());
    }
}
