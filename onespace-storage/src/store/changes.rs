//! Change log reads: persisted tails and live feeds.

use super::{DocumentStore, parse_body};
use crate::document::{Document, Origin, Revision};
use crate::error::StorageResult;
use crate::feed::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeSince};
use duckdb::Connection;

impl DocumentStore {
    /// Opens a change feed.
    ///
    /// The persisted tail after `since` is read and, for a live feed, the
    /// broadcast subscription is taken under the same lock, so no write can
    /// fall between the two.
    pub fn changes(
        &self,
        since: ChangeSince,
        live: bool,
        filter: ChangeFilter,
    ) -> StorageResult<ChangeFeed> {
        let inner = self.lock();
        let conn = inner.conn()?;
        let since = match since {
            ChangeSince::Beginning => 0,
            ChangeSince::Seq(seq) => seq,
            ChangeSince::Now => inner.last_seq,
        };
        let backlog = read_tail(conn, since, &filter)?;
        let subscription = if live {
            inner
                .changes
                .as_ref()
                .map(|tx| (tx.subscribe(), self.clone()))
        } else {
            None
        };
        Ok(ChangeFeed::new(backlog, since, filter, subscription))
    }

    /// Persisted changes with a sequence greater than `since`, oldest first.
    /// Only the latest change of each document is kept.
    pub fn changes_since(&self, since: u64, filter: &ChangeFilter) -> StorageResult<Vec<ChangeEvent>> {
        self.with_conn(|conn| read_tail(conn, since, filter))
    }

    /// Current value of the write-sequence counter.
    pub fn update_seq(&self) -> StorageResult<u64> {
        let inner = self.lock();
        inner.conn()?;
        Ok(inner.last_seq)
    }
}

fn read_tail(conn: &Connection, since: u64, filter: &ChangeFilter) -> StorageResult<Vec<ChangeEvent>> {
    let (predicate, mut params) = filter.sql_predicate();
    params.insert(0, duckdb::types::Value::BigInt(since as i64));
    let sql = format!(
        "SELECT seq, id, rev, deleted, origin, data_json FROM documents WHERE seq > ? AND {predicate} ORDER BY seq"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<(i64, String, String, bool, String, String)> = stmt
        .query_map(duckdb::params_from_iter(params.iter()), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<Result<_, _>>()?;

    rows.into_iter()
        .map(|(seq, id, rev, deleted, origin, data)| -> StorageResult<ChangeEvent> {
            let rev: Revision = rev.parse()?;
            let document = if deleted {
                None
            } else {
                Some(Document {
                    id: id.clone(),
                    rev: Some(rev.clone()),
                    body: parse_body(&data)?,
                })
            };
            Ok(ChangeEvent {
                seq: seq.max(0) as u64,
                rev,
                id,
                deleted,
                document,
                origin: Origin::parse(&origin),
            })
        })
        .collect()
}
