//! Session credential cache.
//!
//! Fetches the bearer token and username from the identity collaborator
//! once per session and serves the cached pair until it expires or is
//! cleared after the remote denies it.

use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityProvider;
use crate::types::Credentials;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Caches credentials for a replication session.
pub struct CredentialManager {
    identity: Arc<dyn IdentityProvider>,
    credentials: Arc<RwLock<Option<Credentials>>>,
}

impl CredentialManager {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            credentials: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets valid credentials, fetching them if none are cached.
    pub async fn get_credentials(&self) -> SyncResult<Credentials> {
        {
            let creds = self.credentials.read().await;
            if let Some(c) = creds.as_ref() {
                if !c.is_expired() {
                    return Ok(c.clone());
                }
                debug!(username = %c.username, "cached credential expired, refreshing");
            }
        }
        self.refresh().await
    }

    /// Forces a fetch from the identity collaborator.
    pub async fn refresh(&self) -> SyncResult<Credentials> {
        let token = self.identity.get_token().await.map_err(|e| {
            warn!(error = %e, "no credential available");
            e
        })?;
        let username = self.identity.get_username().await?;
        if username.is_empty() {
            return Err(SyncError::AuthRequired);
        }
        let fresh = Credentials {
            token,
            username,
            expires_at: self.identity.token_expiry().await,
        };
        *self.credentials.write().await = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drops the cached credentials (after the remote denied them).
    pub async fn clear(&self) {
        *self.credentials.write().await = None;
    }

    pub async fn has_valid_credentials(&self) -> bool {
        self.credentials
            .read()
            .await
            .as_ref()
            .is_some_and(|c| !c.is_expired())
    }
}
