//! Error types for the OpenViking system.

/// Result type alias for OpenViking operations.
pub type Result<T> = std::result::Result<T, VikingError>;

/// Main error type for the OpenViking system.
#[derive(Debug, thiserror::Error)]
pub enum VikingError {
    /// Vector backend has no collection matching the configured name
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Vector-index record lookup failed
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Duplicate primary key on insert
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Schema validation failed
    #[error("Schema error: {0}")]
    Schema(String),

    /// Access gate rejected a URI under the current role/space
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Blob URI absent
    #[error("Not found: {resource} at {uri}")]
    NotFound { resource: String, uri: String },

    /// Malformed URI, bad filter expression, or unknown operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Auth layer rejection
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Backend transient failure
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// HTTP transport errors from remote backends
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VikingError {
    /// Create a new collection-not-found error
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound(name.into())
    }

    /// Create a new record-not-found error
    pub fn record_not_found(id: impl Into<String>) -> Self {
        Self::RecordNotFound(id.into())
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new permission-denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a new not-found error for a blob resource
    pub fn not_found(resource: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            uri: uri.into(),
        }
    }

    /// Create a new invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new HTTP transport error
    pub fn http(msg: impl std::fmt::Display) -> Self {
        Self::Http(msg.to_string())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a blob or record not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::RecordNotFound(_))
    }

    /// Check if this is a collection-not-found error
    pub fn is_collection_not_found(&self) -> bool {
        matches!(self, Self::CollectionNotFound(_))
    }

    /// Check if this is a permission-denied error
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// Check if this is a transient error worth downgrading during shutdown
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Unavailable(_) | Self::Http(_) | Self::CollectionNotFound(_)
        )
    }
}
