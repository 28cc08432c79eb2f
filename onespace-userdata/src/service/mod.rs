//! Per-kind operations on a user's documents.
//!
//! Thin compositions over the document store. Every mutation checks that
//! the target identifier belongs to the calling user before it touches the
//! store.

mod lifecycle;
mod settings;
mod tasks;
mod timer_state;
mod watch;

use crate::error::{UserDataError, UserDataResult};
use onespace_storage::{ChangeNotifier, Document, DocumentStore, StorageError, scope};
use serde_json::{Map, Value};
use tracing::debug;

/// Keys an update payload can never change.
const RESERVED_KEYS: [&str; 5] = ["_id", "_rev", "_deleted", "type", "username"];

/// Removes the keys an update may not touch.
pub(crate) fn sanitize_updates(updates: &Map<String, Value>) -> Map<String, Value> {
    updates
        .iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Task, settings and timer state operations for any user of one store.
#[derive(Clone)]
pub struct UserDataService {
    store: DocumentStore,
    notifier: ChangeNotifier,
    /// Extra attempts for a singleton merge that loses a revision race.
    update_retries: u32,
}

impl UserDataService {
    pub fn new(store: DocumentStore, update_retries: u32) -> Self {
        let notifier = ChangeNotifier::new(store.clone());
        Self {
            store,
            notifier,
            update_retries,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Reads a singleton, creating it from `default` when absent.
    fn get_or_create(
        &self,
        username: &str,
        id: &str,
        default: impl Fn() -> Document,
    ) -> UserDataResult<Document> {
        scope::validate_username(username)?;
        scope::ensure_owned(id, username)?;
        match self.store.get(id) {
            Ok(doc) => return Ok(doc),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        let mut doc = default();
        match self.store.put(&doc) {
            Ok(rev) => {
                debug!(%id, "created default document");
                doc.rev = Some(rev);
                Ok(doc)
            }
            // Created concurrently (or replicated in) since the read.
            Err(e) if e.is_conflict() => Ok(self.store.get(id)?),
            Err(e) => Err(e.into()),
        }
    }

    /// Revision-checked read-modify-write of a singleton. A write that
    /// loses a race is re-read and re-applied, up to `update_retries`
    /// extra times. An error from `modify` aborts without writing.
    fn modify_singleton(
        &self,
        username: &str,
        id: &str,
        default: impl Fn() -> Document,
        modify: impl Fn(&mut Document) -> UserDataResult<()>,
    ) -> UserDataResult<Document> {
        let mut attempt = 0;
        loop {
            let mut doc = self.get_or_create(username, id, &default)?;
            modify(&mut doc)?;
            match self.store.put(&doc) {
                Ok(rev) => {
                    doc.rev = Some(rev);
                    return Ok(doc);
                }
                Err(StorageError::Conflict { .. }) if attempt < self.update_retries => {
                    attempt += 1;
                    debug!(%id, attempt, "singleton update lost a race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reads a document the user owns and checks its kind.
    fn get_owned(&self, username: &str, id: &str, kind: &'static str) -> UserDataResult<Document> {
        scope::ensure_owned(id, username)?;
        let doc = self.store.get(id)?;
        if doc.doc_type() != Some(kind) {
            return Err(UserDataError::WrongKind {
                id: id.to_string(),
                expected: kind,
            });
        }
        scope::ensure_consistent(&doc)?;
        Ok(doc)
    }
}
