//! Replication for OneSpace.
//!
//! Provides live, per-user, bidirectional replication between the local
//! document store and a remote replica with:
//! - Bearer credentials from an identity collaborator, cached per session
//! - A CouchDB-style HTTP remote scoped by a `username` parameter
//! - Push/pull checkpoints persisted in the local store
//! - Exponential backoff on transient failures, `Denied` on rejection
//! - Connectivity-driven disconnect and reconnect

pub mod backoff;
pub mod config;
pub mod connectivity;
pub mod credential_manager;
pub mod error;
pub mod http_remote;
pub mod identity;
pub mod remote;
pub mod replicator;
pub mod types;

pub use config::ReplicationConfig;
pub use connectivity::{ConnectivityReporter, connectivity_channel};
pub use error::{SyncError, SyncResult};
pub use http_remote::HttpRemote;
pub use identity::{IdentityProvider, StaticIdentity};
pub use remote::RemoteReplica;
pub use replicator::{ReplicationEngine, ReplicationHandle, create_replication, start_replication};
pub use types::*;
