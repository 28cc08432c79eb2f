//! DuckDB document store for OneSpace.
//!
//! Provides a per-user, local-first document collection.
//!
//! # Architecture
//!
//! - Documents are JSON objects addressed by `<username>::<kind>[::<qualifier>]`
//! - Indexed fields are extracted into columns on every write and served by
//!   composite indexes, with an unindexed scan as fallback
//! - Every write is scoped: the identifier prefix must match the `username`
//! - Writes append to a sequenced change log consumed by change feeds, the
//!   change notifier and replication

mod config;
mod document;
mod error;
mod feed;
mod index;
mod notifier;
pub mod query;
mod schema;
pub mod scope;
mod store;

pub use config::StoreConfig;
pub use document::{Document, Origin, Revision};
pub use error::{StorageError, StorageResult};
pub use feed::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeSince, ReplicatedChange};
pub use index::{DECLARED_INDEXES, IndexDef, QueryPlan};
pub use notifier::{ChangeNotifier, Listener, ListenerHandle};
pub use query::{CompareOp, Field, FieldValue, Query, SortDirection};
pub use store::{BulkResult, DocumentStore, FindResult, StoreDiagnostics};

use tracing::warn;

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once. An unclean shutdown can leave
/// a WAL file behind that prevents reopening.
pub fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if !wal_path.exists() {
                return Err(first_err.into());
            }
            warn!(
                wal = %wal_path.display(),
                error = %first_err,
                "DuckDB open failed, removing stale WAL and retrying"
            );
            std::fs::remove_file(&wal_path)?;
            duckdb::Connection::open(path)?
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Caps per-database memory and worker threads.
pub(crate) fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit.replace('\'', ""),
        threads.max(1)
    ))?;
    Ok(())
}
