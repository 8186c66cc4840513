use convoy_core::{JobId, TaskId};
use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The cluster API was unavailable or timed out; the operation is retried
    #[error("Transient API error: {message}")]
    #[diagnostic(
        code(scheduler::transient_api),
        help("The operation is retried with back-off up to the retry budget")
    )]
    TransientApi { message: String },

    /// Observed state diverged from the planned operation
    #[error("Conflict on {object}: {message}")]
    #[diagnostic(
        code(scheduler::conflict),
        help("The operation is dropped; the next pass re-plans from a fresh snapshot")
    )]
    Conflict { object: String, message: String },

    /// A task already carries a different node assignment
    #[error("Task {task} is already bound to node {node}")]
    #[diagnostic(
        code(scheduler::already_bound),
        help("A task holds at most one binding; the conflicting request is rejected")
    )]
    AlreadyBound { task: TaskId, node: String },

    /// A plugin named in the tier configuration does not exist
    #[error("Unknown plugin: {name}")]
    #[diagnostic(
        code(scheduler::unknown_plugin),
        help("Known plugins: priority, gang, drf, proportion, predicates, nodeorder")
    )]
    UnknownPlugin { name: String },

    /// An action named in the configuration does not exist
    #[error("Unknown action: {name}")]
    #[diagnostic(
        code(scheduler::unknown_action),
        help("Known actions: enqueue, allocate, backfill, preempt, reclaim")
    )]
    UnknownAction { name: String },

    /// The scheduler configuration file could not be parsed
    #[error("Malformed scheduler configuration: {message}")]
    #[diagnostic(
        code(scheduler::malformed_config),
        help("Check the actions string and the tiers list in the configuration file")
    )]
    MalformedConfig { message: String },

    /// The bind work queue is full
    #[error("Dispatch queue overflow for task {task}")]
    #[diagnostic(
        code(scheduler::dispatch_overflow),
        help("The task returns to Pending and is re-planned on the next pass")
    )]
    DispatchOverflow { task: TaskId },

    /// A session operation violated its precondition
    #[error("Invalid session operation on job {job}: {message}")]
    #[diagnostic(
        code(scheduler::invalid_operation),
        help("The affected object is skipped; this is likely a bug if it recurs")
    )]
    InvalidOperation { job: JobId, message: String },

    /// Core error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] convoy_core::ConvoyError),

    /// Internal invariant violation
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    Internal { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a TransientApi error
    pub fn transient_api(message: impl Into<String>) -> Self {
        Self::TransientApi {
            message: message.into(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidOperation error
    pub fn invalid_operation(job: JobId, message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            job,
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the bind dispatcher should retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientApi { .. })
    }
}
