//! Table layout of the document store.

use crate::error::StorageResult;
use duckdb::Connection;

/// Creates the document, change and checkpoint tables if they are missing.
///
/// `documents` holds one row per identifier, tombstones included. The index
/// columns (`doc_type` .. `completed_at`) are extracted from `data_json` on
/// every write. There is no PRIMARY KEY: identifiers are kept unique by the
/// store's write lock, and DuckDB rewrites updates of indexed columns as a
/// delete plus insert, which a key constraint would reject.
pub(crate) fn initialize_document_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id VARCHAR NOT NULL,
            rev VARCHAR NOT NULL,
            seq BIGINT NOT NULL,
            deleted BOOLEAN NOT NULL DEFAULT FALSE,
            origin VARCHAR NOT NULL DEFAULT 'local',
            doc_type VARCHAR,
            username VARCHAR,
            completed BOOLEAN,
            ord BIGINT,
            completed_at VARCHAR,
            data_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_id ON documents(id);
        CREATE INDEX IF NOT EXISTS idx_documents_seq ON documents(seq);

        -- Replication checkpoints: last pushed local seq and last pulled
        -- remote seq, keyed per remote and user.
        CREATE TABLE IF NOT EXISTS replication_checkpoints (
            checkpoint_key VARCHAR PRIMARY KEY,
            checkpoint_value VARCHAR NOT NULL,
            updated_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Highest write sequence persisted so far.
pub(crate) fn max_seq(conn: &Connection) -> StorageResult<u64> {
    let seq: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM documents", [], |row| {
        row.get(0)
    })?;
    Ok(seq.max(0) as u64)
}
