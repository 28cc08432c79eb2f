//! Identity collaborator: supplies the bearer credential and the user.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// Source of the bearer credential and stable user identifier.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current bearer token. Fails with `AuthRequired` when signed out or
    /// when the token has expired.
    async fn get_token(&self) -> SyncResult<String>;

    async fn get_username(&self) -> SyncResult<String>;

    /// When the current token stops being valid, if known.
    async fn token_expiry(&self) -> Option<DateTime<Utc>> {
        None
    }
}

struct IdentityState {
    username: String,
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process identity holding a fixed user and a replaceable token.
pub struct StaticIdentity {
    state: RwLock<IdentityState>,
}

impl StaticIdentity {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(IdentityState {
                username: username.into(),
                token: Some(token.into()),
                expires_at: None,
            }),
        }
    }

    /// A user that is not signed in.
    pub fn signed_out(username: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(IdentityState {
                username: username.into(),
                token: None,
                expires_at: None,
            }),
        }
    }

    pub fn with_expiry(self, expires_at: DateTime<Utc>) -> Self {
        self.write().expires_at = Some(expires_at);
        self
    }

    /// Makes the current token expire immediately.
    pub fn expire(&self) {
        self.write().expires_at = Some(Utc::now());
    }

    /// Installs a fresh token with no expiry.
    pub fn set_token(&self, token: impl Into<String>) {
        let mut state = self.write();
        state.token = Some(token.into());
        state.expires_at = None;
    }

    pub fn sign_out(&self) {
        self.write().token = None;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IdentityState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IdentityState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn get_token(&self) -> SyncResult<String> {
        let state = self.read();
        if state.expires_at.is_some_and(|at| Utc::now() >= at) {
            return Err(SyncError::AuthRequired);
        }
        state.token.clone().ok_or(SyncError::AuthRequired)
    }

    async fn get_username(&self) -> SyncResult<String> {
        Ok(self.read().username.clone())
    }

    async fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.read().expires_at
    }
}
