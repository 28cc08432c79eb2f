//! Storage error types.

use thiserror::Error;

/// Result type for document store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in document store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document not found: {0}")]
    NotFound(String),

    /// The caller's revision is stale (or missing for an existing document).
    #[error("revision conflict on {id}: expected {expected}, store has {actual}")]
    Conflict {
        id: String,
        expected: String,
        actual: String,
    },

    /// The document identifier and the owning user disagree.
    #[error("user {username} is not allowed to write {id}")]
    Authorization { id: String, username: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    #[error("document store is closed")]
    Closed,

    /// Listeners are driven by tokio tasks and need a runtime to spawn onto.
    #[error("no tokio runtime available to deliver change notifications")]
    NoRuntime,
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}
