//! Error types for user data operations.

use onespace_storage::StorageError;
use onespace_sync::SyncError;
use thiserror::Error;

/// All errors that can occur in user data operations.
#[derive(Debug, Error)]
pub enum UserDataError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The document exists but is not of the kind the operation expects.
    #[error("{id} is not a {expected} document")]
    WrongKind { id: String, expected: &'static str },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UserDataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_conflict())
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_authorization())
    }
}

pub type UserDataResult<T> = Result<T, UserDataError>;
