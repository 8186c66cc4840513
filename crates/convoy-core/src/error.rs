use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Convoy operations
#[derive(Error, Debug, Diagnostic)]
pub enum ConvoyError {
    /// An object failed structural validation
    #[error("Invalid object {object}: {reason}")]
    #[diagnostic(
        code(convoy::invalid_object),
        help("Correct the object and resubmit; it is skipped until then")
    )]
    InvalidObject { object: String, reason: String },

    /// A quantity string could not be parsed
    #[error("Invalid quantity '{value}': {reason}")]
    #[diagnostic(
        code(convoy::invalid_quantity),
        help("Use values like '500m', '2' for cpu and '256Mi', '1Gi' for memory")
    )]
    InvalidQuantity { value: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(convoy::serialization_error),
        help("Ensure the object format is valid JSON or YAML")
    )]
    SerializationError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(convoy::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError { message: String },
}

/// Result type alias for Convoy operations
pub type Result<T> = std::result::Result<T, ConvoyError>;

impl ConvoyError {
    /// Create an InvalidObject error
    pub fn invalid_object(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidQuantity error
    pub fn invalid_quantity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
