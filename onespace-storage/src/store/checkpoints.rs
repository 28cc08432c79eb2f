//! Replication checkpoints, persisted next to the documents they describe.

use super::DocumentStore;
use crate::error::StorageResult;
use duckdb::params;

impl DocumentStore {
    /// Saves a replication checkpoint (upsert).
    pub fn save_checkpoint(&self, key: &str, value: &str) -> StorageResult<()> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO replication_checkpoints (checkpoint_key, checkpoint_value, updated_at) VALUES (?, ?, ?)",
                params![key, value, now],
            )?;
            Ok(())
        })
    }

    pub fn load_checkpoint(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT checkpoint_value FROM replication_checkpoints WHERE checkpoint_key = ?",
            )?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    /// Clears every checkpoint; the next replication starts from scratch.
    pub fn clear_checkpoints(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM replication_checkpoints", [])?;
            Ok(())
        })
    }
}
