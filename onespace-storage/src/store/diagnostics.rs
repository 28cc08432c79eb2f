//! Store health report.

use super::DocumentStore;
use crate::error::StorageResult;
use crate::index;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreDiagnostics {
    pub documents: u64,
    pub tombstones: u64,
    pub update_seq: u64,
    pub indexes: Vec<String>,
    /// Whether a trivial query against the documents table succeeds.
    pub query_ok: bool,
}

impl DocumentStore {
    pub fn diagnostics(&self) -> StorageResult<StoreDiagnostics> {
        let inner = self.lock();
        let conn = inner.conn()?;
        let (documents, tombstones): (i64, i64) = conn.query_row(
            "SELECT COUNT(*) FILTER (WHERE NOT deleted), COUNT(*) FILTER (WHERE deleted) FROM documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let query_ok = match conn.query_row(
            "SELECT id FROM documents WHERE NOT deleted LIMIT 1",
            [],
            |_| Ok(()),
        ) {
            Ok(()) | Err(duckdb::Error::QueryReturnedNoRows) => true,
            Err(e) => {
                warn!(error = %e, "document probe query failed");
                false
            }
        };
        Ok(StoreDiagnostics {
            documents: documents.max(0) as u64,
            tombstones: tombstones.max(0) as u64,
            update_seq: inner.last_seq,
            indexes: index::existing_indexes(conn)?,
            query_ok,
        })
    }
}
