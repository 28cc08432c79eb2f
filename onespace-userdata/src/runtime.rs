//! Composition root: opens the store, builds the service and owns the
//! replication session.

use crate::error::{UserDataError, UserDataResult};
use crate::service::UserDataService;
use onespace_storage::{DocumentStore, StoreConfig};
use onespace_sync::{
    HttpRemote, IdentityProvider, RemoteReplica, ReplicationConfig, ReplicationHandle, SyncError,
    start_replication,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub replication: ReplicationConfig,
    /// Extra attempts for a settings or timer update that loses a race.
    pub settings_update_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            replication: ReplicationConfig::default(),
            settings_update_retries: 3,
        }
    }
}

impl AppConfig {
    /// Reads a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> UserDataResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| UserDataError::Config(format!("{}: {e}", path.display())))
    }
}

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG` (default
/// `info`). Later calls leave the first subscriber in place.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// An open OneSpace store with its services.
pub struct OneSpace {
    config: AppConfig,
    store: DocumentStore,
    service: UserDataService,
    sync: Mutex<Option<ReplicationHandle>>,
}

impl OneSpace {
    pub fn open(config: AppConfig) -> UserDataResult<Self> {
        let store = DocumentStore::open(&config.store)?;
        store.ensure_indexes()?;
        let service = UserDataService::new(store.clone(), config.settings_update_retries);
        info!(
            path = ?config.store.path,
            remote = ?config.replication.remote_url,
            "OneSpace opened"
        );
        Ok(Self {
            config,
            store,
            service,
            sync: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn service(&self) -> &UserDataService {
        &self.service
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Starts replication against the configured `remote_url`.
    ///
    /// Returns `None` (the store keeps working offline) when no remote is
    /// configured or no credential is available.
    pub async fn start_sync_from_config(
        &self,
        identity: Arc<dyn IdentityProvider>,
        connectivity: Option<watch::Receiver<bool>>,
    ) -> UserDataResult<Option<ReplicationHandle>> {
        match HttpRemote::from_config(&self.config.replication)? {
            Some(remote) => self.start_sync(Arc::new(remote), identity, connectivity).await,
            None => {
                info!("no remote configured, running offline only");
                Ok(None)
            }
        }
    }

    /// Starts replication against `remote`, replacing any running session.
    ///
    /// Returns `None` when no credential is available.
    pub async fn start_sync(
        &self,
        remote: Arc<dyn RemoteReplica>,
        identity: Arc<dyn IdentityProvider>,
        connectivity: Option<watch::Receiver<bool>>,
    ) -> UserDataResult<Option<ReplicationHandle>> {
        let mut slot = self.sync.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        match start_replication(
            self.store.clone(),
            remote,
            identity,
            connectivity,
            self.config.replication.clone(),
        )
        .await
        {
            Ok(handle) => {
                *slot = Some(handle.clone());
                Ok(Some(handle))
            }
            Err(SyncError::AuthRequired) => {
                warn!("no credential available, running offline only");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The running replication session, if any.
    pub async fn sync_handle(&self) -> Option<ReplicationHandle> {
        self.sync.lock().await.clone()
    }

    /// Stops replication if it is running.
    pub async fn stop_sync(&self) {
        if let Some(handle) = self.sync.lock().await.take() {
            handle.stop().await;
        }
    }

    /// Stops replication, cancels listeners and closes the store. Safe to
    /// call more than once.
    pub async fn close(&self) {
        self.stop_sync().await;
        self.service.cleanup_user_data();
        if !self.store.is_closed() {
            self.store.close();
            info!("OneSpace closed");
        }
    }
}
