//! Point reads and writes: get, put, bulk_put, remove, apply_replicated.

use super::{DocumentStore, Inner, load_row, write_row};
use crate::document::{Document, Origin, Revision};
use crate::error::{StorageError, StorageResult};
use crate::feed::ReplicatedChange;
use crate::scope;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Outcome of one document in a [`DocumentStore::bulk_put`] batch.
#[derive(Debug)]
pub struct BulkResult {
    pub id: String,
    pub outcome: StorageResult<Revision>,
}

impl BulkResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn rev(&self) -> Option<&Revision> {
        self.outcome.as_ref().ok()
    }
}

fn rev_label(rev: Option<&Revision>) -> String {
    rev.map_or_else(|| "none".to_string(), Revision::to_string)
}

impl DocumentStore {
    /// Reads a live document. Missing and tombstoned ids are `NotFound`.
    pub fn get(&self, id: &str) -> StorageResult<Document> {
        self.with_conn(|conn| match load_row(conn, id)? {
            Some(row) if !row.deleted => Ok(Document {
                id: id.to_string(),
                rev: Some(row.rev),
                body: row.body,
            }),
            _ => Err(StorageError::NotFound(id.to_string())),
        })
    }

    /// Writes a document under optimistic concurrency and returns its new
    /// revision.
    ///
    /// An existing document must be written with its current revision; a
    /// new (or tombstoned) id must be written without one.
    pub fn put(&self, doc: &Document) -> StorageResult<Revision> {
        scope::ensure_consistent(doc)?;
        let mut inner = self.lock();
        put_locked(&mut inner, doc)
    }

    /// Writes each document independently. Results are in input order and
    /// one failure does not undo the others.
    pub fn bulk_put(&self, docs: &[Document]) -> StorageResult<Vec<BulkResult>> {
        let mut inner = self.lock();
        inner.conn()?;
        let results: Vec<BulkResult> = docs
            .iter()
            .map(|doc| BulkResult {
                id: doc.id.clone(),
                outcome: scope::ensure_consistent(doc).and_then(|_| put_locked(&mut inner, doc)),
            })
            .collect();
        let failed = results.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 {
            warn!(total = docs.len(), failed, "bulk write partially failed");
        } else {
            debug!(total = docs.len(), "bulk write");
        }
        Ok(results)
    }

    /// Tombstones a document. `doc.rev` must be the current revision.
    ///
    /// The tombstone keeps the owner and kind so it can replicate and be
    /// filtered like a live document.
    pub fn remove(&self, doc: &Document) -> StorageResult<Revision> {
        scope::ensure_consistent(doc)?;
        let mut inner = self.lock();
        let current = match load_row(inner.conn()?, &doc.id)? {
            Some(row) if !row.deleted => row,
            _ => return Err(StorageError::NotFound(doc.id.clone())),
        };
        if doc.rev.as_ref() != Some(&current.rev) {
            return Err(StorageError::Conflict {
                id: doc.id.clone(),
                expected: rev_label(doc.rev.as_ref()),
                actual: current.rev.to_string(),
            });
        }
        let mut body = Map::new();
        for key in ["username", "type"] {
            if let Some(v) = current.body.get(key) {
                body.insert(key.to_string(), v.clone());
            }
        }
        let rev = Revision::next(Some(&current.rev), &body);
        write_row(&mut inner, &doc.id, &rev, true, body, Origin::Local)?;
        debug!(id = %doc.id, rev = %rev, "document removed");
        Ok(rev)
    }

    /// Applies a change received from the remote replica under
    /// last-write-wins. Returns `false` when the local revision wins and
    /// the change is skipped.
    pub fn apply_replicated(&self, change: &ReplicatedChange) -> StorageResult<bool> {
        let owner = match (change.body.get("username").and_then(Value::as_str), change.deleted) {
            (Some(username), _) => username,
            (None, true) => scope::owner_of(&change.id).unwrap_or_default(),
            (None, false) => "",
        };
        scope::ensure_owned(&change.id, owner)?;

        let mut inner = self.lock();
        if let Some(current) = load_row(inner.conn()?, &change.id)? {
            if !change.rev.wins_over(&current.rev) {
                debug!(id = %change.id, local = %current.rev, remote = %change.rev, "replicated change lost to local revision");
                return Ok(false);
            }
        }
        let mut body = change.body.clone();
        if change.deleted {
            body.retain(|k, _| k == "username" || k == "type");
        }
        write_row(&mut inner, &change.id, &change.rev, change.deleted, body, Origin::Remote)?;
        Ok(true)
    }
}

fn put_locked(inner: &mut Inner, doc: &Document) -> StorageResult<Revision> {
    if doc.id.is_empty() {
        return Err(StorageError::InvalidDocument("document id is empty".into()));
    }
    let current = load_row(inner.conn()?, &doc.id)?;
    let live_rev = current.as_ref().filter(|row| !row.deleted).map(|row| &row.rev);
    if doc.rev.as_ref() != live_rev {
        return Err(StorageError::Conflict {
            id: doc.id.clone(),
            expected: rev_label(doc.rev.as_ref()),
            actual: rev_label(live_rev),
        });
    }
    // A recreated id continues from its tombstone so the new revision
    // beats it on every replica.
    let previous = current.as_ref().map(|row| &row.rev);
    let rev = Revision::next(previous, &doc.body);
    write_row(inner, &doc.id, &rev, false, doc.body.clone(), Origin::Local)?;
    debug!(id = %doc.id, rev = %rev, "document written");
    Ok(rev)
}
