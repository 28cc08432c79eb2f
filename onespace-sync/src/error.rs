//! Replication error types.

use onespace_storage::StorageError;
use thiserror::Error;

/// Result type for replication operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while replicating.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No credential is available; replication cannot start.
    #[error("authentication required")]
    AuthRequired,

    /// The remote rejected the credential. Not retried automatically.
    #[error("remote denied access: {0}")]
    Denied(String),

    /// Network or backend failure; retried with backoff.
    #[error("transient replication failure: {0}")]
    Transient(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("replication engine is not running")]
    NotRunning,
}

impl SyncError {
    /// Failures worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Http(_) | Self::Protocol(_))
    }

    /// Credential failures that stop replication until the caller
    /// re-authenticates.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_) | Self::AuthRequired)
    }
}
