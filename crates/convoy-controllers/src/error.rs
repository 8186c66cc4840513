use miette::Diagnostic;
use thiserror::Error;

/// Controller error type
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// The cluster API was unavailable or timed out
    #[error("Transient API error: {message}")]
    #[diagnostic(
        code(controllers::transient_api),
        help("The work item is re-queued with back-off up to the retry budget")
    )]
    TransientApi { message: String },

    /// The object disappeared while being processed
    #[error("Object not found: {key}")]
    #[diagnostic(
        code(controllers::not_found),
        help("The object was deleted concurrently; the work item is dropped")
    )]
    NotFound { key: String },

    /// The object cannot be processed in its current shape
    #[error("Invalid object {key}: {reason}")]
    #[diagnostic(
        code(controllers::invalid_object),
        help("Correct the object; it is skipped until then")
    )]
    InvalidObject { key: String, reason: String },

    /// Core error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] convoy_core::ConvoyError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(controllers::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    Internal { message: String },
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    /// Create a TransientApi error
    pub fn transient_api(message: impl Into<String>) -> Self {
        Self::TransientApi {
            message: message.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an InvalidObject error
    pub fn invalid_object(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
