//! Change events, declarative change filters and the change feed.

use crate::document::{Document, Origin, Revision};
use crate::error::{StorageError, StorageResult};
use crate::scope;
use crate::store::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One entry of the store's change log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Position in the store's write sequence.
    pub seq: u64,
    pub id: String,
    pub rev: Revision,
    pub deleted: bool,
    /// The written document; `None` for tombstones.
    pub document: Option<Document>,
    pub origin: Origin,
}

impl ChangeEvent {
    /// The replica wire form: the document with `_id`/`_rev`, or a tombstone
    /// carrying `_deleted: true` and the owner.
    pub fn to_wire(&self) -> Value {
        let mut obj = match &self.document {
            Some(doc) => doc.body.clone(),
            None => {
                let mut body = Map::new();
                if let Some(owner) = scope::owner_of(&self.id) {
                    body.insert("username".into(), Value::String(owner.to_string()));
                }
                body.insert("_deleted".into(), Value::Bool(true));
                body
            }
        };
        obj.insert("_id".into(), Value::String(self.id.clone()));
        obj.insert("_rev".into(), Value::String(self.rev.to_string()));
        Value::Object(obj)
    }
}

/// A write received from the remote replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedChange {
    pub id: String,
    pub rev: Revision,
    pub deleted: bool,
    /// Body without the `_`-prefixed bookkeeping keys.
    pub body: Map<String, Value>,
}

impl ReplicatedChange {
    /// Decodes the wire form produced by [`ChangeEvent::to_wire`].
    pub fn from_wire(value: Value) -> StorageResult<Self> {
        let Value::Object(mut obj) = value else {
            return Err(StorageError::InvalidDocument(
                "replicated document is not an object".into(),
            ));
        };
        let id = match obj.remove("_id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => {
                return Err(StorageError::InvalidDocument(
                    "replicated document has no _id".into(),
                ));
            }
        };
        let rev = match obj.remove("_rev") {
            Some(Value::String(rev)) => rev.parse()?,
            _ => return Err(StorageError::InvalidRevision(format!("{id}: missing _rev"))),
        };
        let deleted = obj
            .remove("_deleted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        obj.retain(|k, _| !k.starts_with('_'));
        Ok(Self {
            id,
            rev,
            deleted,
            body: obj,
        })
    }

    /// The document this change carries, if it is not a tombstone.
    pub fn document(&self) -> Option<Document> {
        (!self.deleted).then(|| Document {
            id: self.id.clone(),
            rev: Some(self.rev.clone()),
            body: self.body.clone(),
        })
    }
}

/// Where a change feed starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSince {
    /// Every persisted change.
    Beginning,
    /// Changes with a sequence strictly greater than this one.
    Seq(u64),
    /// Only changes written after the feed is created.
    Now,
}

/// Declarative change filter evaluated inside the store.
///
/// `owner` matches `document.username == owner` or an identifier starting
/// with `"<owner>::"`. The persisted tail is filtered in SQL and live events
/// in [`accepts`](Self::accepts); both see the same result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub owner: Option<String>,
    pub origin: Option<Origin>,
}

impl ChangeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn owned_by(username: impl Into<String>) -> Self {
        Self {
            owner: Some(username.into()),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        if self.origin.is_some_and(|origin| origin != event.origin) {
            return false;
        }
        match &self.owner {
            Some(owner) => {
                let by_field = event
                    .document
                    .as_ref()
                    .and_then(Document::username)
                    .is_some_and(|u| u == owner);
                by_field || scope::owns(&event.id, owner)
            }
            None => true,
        }
    }

    /// SQL predicate over the `documents` table.
    pub(crate) fn sql_predicate(&self) -> (String, Vec<duckdb::types::Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(owner) = &self.owner {
            // owns() is false for an empty owner, so nothing may match one.
            if owner.is_empty() {
                clauses.push("FALSE".to_string());
            } else {
                clauses.push("(username = ? OR starts_with(id, ?))".to_string());
                params.push(duckdb::types::Value::Text(owner.clone()));
                params.push(duckdb::types::Value::Text(format!(
                    "{owner}{}",
                    scope::SEPARATOR
                )));
            }
        }
        if let Some(origin) = self.origin {
            clauses.push("origin = ?".to_string());
            params.push(duckdb::types::Value::Text(origin.as_str().to_string()));
        }
        if clauses.is_empty() {
            ("TRUE".to_string(), params)
        } else {
            (clauses.join(" AND "), params)
        }
    }
}

/// Ordered stream of change events.
///
/// A feed first yields the persisted tail it was created with. A live feed
/// then follows the store's broadcast channel, skipping events it has
/// already yielded; when it falls behind the channel it re-reads the missed
/// range from the database. Live feeds end when the store closes.
pub struct ChangeFeed {
    backlog: VecDeque<ChangeEvent>,
    live: Option<LiveTail>,
    filter: ChangeFilter,
    last_seq: u64,
}

struct LiveTail {
    rx: broadcast::Receiver<ChangeEvent>,
    store: DocumentStore,
}

impl ChangeFeed {
    pub(crate) fn new(
        backlog: Vec<ChangeEvent>,
        since: u64,
        filter: ChangeFilter,
        live: Option<(broadcast::Receiver<ChangeEvent>, DocumentStore)>,
    ) -> Self {
        let last_seq = backlog.last().map_or(since, |e| e.seq.max(since));
        Self {
            backlog: backlog.into(),
            live: live.map(|(rx, store)| LiveTail { rx, store }),
            filter,
            last_seq,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Sequence of the newest event this feed has seen.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Events that can be yielded without waiting.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Next event, or `None` once a non-live feed is drained or the store
    /// behind a live feed has closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Some(event);
            }
            let live = self.live.as_mut()?;
            match live.rx.recv().await {
                Ok(event) => {
                    if event.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = event.seq;
                    if self.filter.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, since = self.last_seq, "change feed lagged, re-reading tail");
                    match live.store.changes_since(self.last_seq, &self.filter) {
                        Ok(missed) => {
                            if let Some(last) = missed.last() {
                                self.last_seq = last.seq;
                            }
                            self.backlog.extend(missed);
                        }
                        Err(e) => {
                            warn!(error = %e, "change feed could not re-read its tail");
                            self.live = None;
                            return None;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.live = None;
                    return None;
                }
            }
        }
    }

    /// Takes every buffered event without waiting. For a non-live feed this
    /// is the whole feed.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        self.backlog.drain(..).collect()
    }
}
