//! Error types for the ContextNexus backend.

/// Result type alias for ContextNexus operations.
pub type Result<T> = std::result::Result<T, NexusError>;

/// Main error type for the ContextNexus backend.
///
/// Each variant corresponds to one propagation class; the API layer maps
/// variants to HTTP statuses.
#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    /// Precondition violation, surfaced with the offending field path
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    /// Missing context, content item, or model
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Upstream auth layer rejection (passthrough)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Upstream auth layer rejection (passthrough)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate add or conflicting mutation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dispatcher backpressure
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// All models open or unreachable
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Cancellation signal observed
    #[error("Operation cancelled")]
    Cancelled,

    /// Connector or repository call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else; the message is scrubbed at the API boundary
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NexusError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new rate limited error
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::RateLimited { retry_after_ms }
    }

    /// Create a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this is an availability error
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
