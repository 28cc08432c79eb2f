//! Document store: a thread-safe DuckDB wrapper with modular operations.

mod changes;
mod checkpoints;
mod crud;
mod diagnostics;
mod find;

pub use crud::BulkResult;
pub use diagnostics::StoreDiagnostics;
pub use find::FindResult;

use crate::config::StoreConfig;
use crate::document::{Document, Origin, Revision};
use crate::error::{StorageError, StorageResult};
use crate::feed::ChangeEvent;
use crate::index;
use crate::query::Field;
use crate::schema::{initialize_document_schema, max_seq};
use duckdb::{Connection, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Thread-safe, key-addressed document store backed by DuckDB.
///
/// Writes are serialized by one lock. A write assigns the next sequence
/// number, persists the row and publishes its [`ChangeEvent`] while holding
/// that lock, so feeds observe events in sequence order.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    conn: Option<Connection>,
    changes: Option<broadcast::Sender<ChangeEvent>>,
    last_seq: u64,
}

impl Inner {
    fn conn(&self) -> StorageResult<&Connection> {
        self.conn.as_ref().ok_or(StorageError::Closed)
    }
}

/// A row of the `documents` table.
pub(crate) struct StoredRow {
    pub rev: Revision,
    pub deleted: bool,
    pub body: Map<String, Value>,
}

impl DocumentStore {
    /// Opens the store described by `config`: on disk when it names a path,
    /// in memory otherwise.
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                crate::open_duckdb_with_wal_recovery(path, &config.memory_limit, config.threads)?
            }
            None => {
                let conn = Connection::open_in_memory()?;
                crate::apply_resource_limits(&conn, &config.memory_limit, config.threads)?;
                conn
            }
        };
        Self::from_connection(conn, config.change_buffer)
    }

    /// Opens (or creates) an on-disk store with default limits.
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        Self::open(&StoreConfig::at(path))
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open(&StoreConfig::default())
    }

    fn from_connection(conn: Connection, change_buffer: usize) -> StorageResult<Self> {
        initialize_document_schema(&conn)?;
        index::ensure_indexes(&conn)?;
        let last_seq = max_seq(&conn)?;
        let (tx, _) = broadcast::channel(change_buffer.max(1));
        info!(update_seq = last_seq, "document store opened");
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                conn: Some(conn),
                changes: Some(tx),
                last_seq,
            })),
        })
    }

    /// Closes the store. Live feeds end, and every later operation fails
    /// with [`StorageError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.changes = None;
        if let Some(conn) = inner.conn.take() {
            if let Err(e) = conn.execute_batch("CHECKPOINT") {
                warn!(error = %e, "checkpoint on close failed");
            }
            if let Err((_, e)) = conn.close() {
                warn!(error = %e, "closing DuckDB connection failed");
            }
            info!("document store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().conn.is_none()
    }

    /// Acquire the store lock, recovering from poison if a writer panicked
    /// while holding it.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("document store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Runs `f` against the open connection.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let inner = self.lock();
        f(inner.conn()?)
    }
}

/// Reads the current row for `id`, tombstones included.
pub(crate) fn load_row(conn: &Connection, id: &str) -> StorageResult<Option<StoredRow>> {
    let mut stmt = conn.prepare("SELECT rev, deleted, data_json FROM documents WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let rev: String = row.get(0)?;
    let deleted: bool = row.get(1)?;
    let data: String = row.get(2)?;
    Ok(Some(StoredRow {
        rev: rev.parse()?,
        deleted,
        body: parse_body(&data)?,
    }))
}

pub(crate) fn parse_body(data: &str) -> StorageResult<Map<String, Value>> {
    match serde_json::from_str(data)? {
        Value::Object(body) => Ok(body),
        _ => Err(StorageError::InvalidDocument(
            "stored body is not a JSON object".into(),
        )),
    }
}

/// Persists a new version of `id` and publishes its change event.
///
/// The row replaces any earlier row for the same id inside one transaction.
fn write_row(
    inner: &mut Inner,
    id: &str,
    rev: &Revision,
    deleted: bool,
    body: Map<String, Value>,
    origin: Origin,
) -> StorageResult<ChangeEvent> {
    let seq = inner.last_seq + 1;
    let data_json = serde_json::to_string(&body)?;
    let columns: Vec<duckdb::types::Value> =
        Field::ALL.iter().map(|f| f.extract(&body).to_sql()).collect();

    let conn = inner.conn()?;
    conn.execute_batch("BEGIN TRANSACTION")?;
    let written = conn
        .execute("DELETE FROM documents WHERE id = ?", params![id])
        .and_then(|_| {
            conn.execute(
                "INSERT INTO documents (id, rev, seq, deleted, origin, doc_type, username, completed, ord, completed_at, data_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    rev.to_string(),
                    seq as i64,
                    deleted,
                    origin.as_str(),
                    columns[0],
                    columns[1],
                    columns[2],
                    columns[3],
                    columns[4],
                    data_json,
                ],
            )
        });
    match written {
        Ok(_) => conn.execute_batch("COMMIT")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
    }
    inner.last_seq = seq;

    let event = ChangeEvent {
        seq,
        id: id.to_string(),
        rev: rev.clone(),
        deleted,
        document: (!deleted).then(|| Document {
            id: id.to_string(),
            rev: Some(rev.clone()),
            body,
        }),
        origin,
    };
    if let Some(tx) = &inner.changes {
        // No subscribers is fine; feeds re-read from the table.
        let _ = tx.send(event.clone());
    }
    Ok(event)
}
