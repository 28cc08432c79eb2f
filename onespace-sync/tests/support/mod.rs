//! Shared test helpers: an in-memory remote replica.

#![allow(dead_code)]

use async_trait::async_trait;
use onespace_storage::{Revision, scope};
use onespace_sync::{
    Credentials, RemoteChange, RemoteChanges, RemoteRev, RemoteReplica, SyncError, SyncResult,
    SyncStatus,
};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Row {
    seq: u64,
    id: String,
    rev: Revision,
    doc: Value,
}

#[derive(Default)]
struct State {
    seq: u64,
    rows: Vec<Row>,
    accepted_tokens: HashSet<String>,
    transient_failures: u32,
    bulk_calls: u32,
    change_calls: u32,
    /// Serve every user's rows regardless of the username scope.
    leak_foreign: bool,
}

/// Remote replica kept in memory, scoped by username like the real one.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
}

impl MemoryRemote {
    pub fn accepting(token: &str) -> Self {
        let remote = Self::default();
        remote.accept(token);
        remote
    }

    pub fn accept(&self, token: &str) {
        self.state.lock().unwrap().accepted_tokens.insert(token.to_string());
    }

    /// Simulates server-side credential expiry.
    pub fn revoke_all(&self) {
        self.state.lock().unwrap().accepted_tokens.clear();
    }

    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().transient_failures = n;
    }

    pub fn leak_foreign_rows(&self) {
        self.state.lock().unwrap().leak_foreign = true;
    }

    /// Writes a document as another device would.
    pub fn insert(&self, doc: Value) {
        let mut state = self.state.lock().unwrap();
        store_row(&mut state, doc);
    }

    pub fn doc(&self, id: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state.rows.iter().find(|r| r.id == id).map(|r| r.doc.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state.rows.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn bulk_calls(&self) -> u32 {
        self.state.lock().unwrap().bulk_calls
    }

    pub fn change_calls(&self) -> u32 {
        self.state.lock().unwrap().change_calls
    }

    fn authorize(state: &mut State, credentials: &Credentials) -> SyncResult<()> {
        if !state.accepted_tokens.contains(&credentials.token) {
            return Err(SyncError::Denied("401 invalid token".into()));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(SyncError::Transient("503 service unavailable".into()));
        }
        Ok(())
    }
}

fn store_row(state: &mut State, doc: Value) {
    let id = doc["_id"].as_str().unwrap().to_string();
    let rev: Revision = doc["_rev"].as_str().unwrap().parse().unwrap();
    if let Some(existing) = state.rows.iter().find(|r| r.id == id) {
        if !rev.wins_over(&existing.rev) {
            return;
        }
    }
    state.rows.retain(|r| r.id != id);
    state.seq += 1;
    let seq = state.seq;
    state.rows.push(Row { seq, id, rev, doc });
}

#[async_trait]
impl RemoteReplica for MemoryRemote {
    async fn changes(
        &self,
        credentials: &Credentials,
        since: &str,
        limit: usize,
    ) -> SyncResult<RemoteChanges> {
        let mut state = self.state.lock().unwrap();
        Self::authorize(&mut state, credentials)?;
        state.change_calls += 1;
        let since: u64 = since.parse().unwrap_or(0);
        let leak = state.leak_foreign;
        let results: Vec<RemoteChange> = state
            .rows
            .iter()
            .filter(|r| r.seq > since)
            .filter(|r| {
                leak || r.doc["username"] == json!(credentials.username)
                    || scope::owns(&r.id, &credentials.username)
            })
            .take(limit)
            .map(|r| RemoteChange {
                seq: json!(r.seq),
                id: r.id.clone(),
                changes: vec![RemoteRev {
                    rev: r.rev.to_string(),
                }],
                deleted: r.doc["_deleted"] == json!(true),
                doc: Some(r.doc.clone()),
            })
            .collect();
        let last_seq = results
            .last()
            .map_or_else(|| json!(since), |r| r.seq.clone());
        Ok(RemoteChanges { results, last_seq })
    }

    async fn bulk_docs(&self, credentials: &Credentials, docs: Vec<Value>) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::authorize(&mut state, credentials)?;
        state.bulk_calls += 1;
        for doc in docs {
            store_row(&mut state, doc);
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        "memory://remote".to_string()
    }
}

/// Routes engine logs through the test harness; `RUST_LOG` selects levels.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Waits (bounded) for a status matching `pred`.
pub async fn wait_status(
    handle: &onespace_sync::ReplicationHandle,
    pred: impl Fn(&SyncStatus) -> bool,
) -> SyncStatus {
    tokio::time::timeout(Duration::from_secs(10), handle.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out; last status {:?}", handle.status()))
}
