//! Shared types for replication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A bearer credential bound to the user it was issued for.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub username: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// Replication engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Disconnected,
    Connecting,
    /// Transferring changes.
    Active,
    /// Converged or waiting out a transient failure.
    Paused,
    /// The remote rejected the credential. Terminal for this session.
    Denied,
}

/// Snapshot published by the engine on every state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_error: Option<String>,
    pub docs_pushed: u64,
    pub docs_pulled: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Disconnected,
            last_error: None,
            docs_pushed: 0,
            docs_pulled: 0,
        }
    }
}

/// Commands sent from a [`ReplicationHandle`](crate::ReplicationHandle).
#[derive(Debug)]
pub enum ReplicationCommand {
    /// Run a replication cycle now.
    SyncNow,
    Stop,
}

/// One revision listed in a remote change row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteRev {
    pub rev: String,
}

/// One row of the remote `_changes` feed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteChange {
    pub seq: Value,
    pub id: String,
    #[serde(default)]
    pub changes: Vec<RemoteRev>,
    #[serde(default)]
    pub doc: Option<Value>,
    #[serde(default)]
    pub deleted: bool,
}

/// A page of the remote `_changes` feed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteChanges {
    pub results: Vec<RemoteChange>,
    pub last_seq: Value,
}

impl RemoteChanges {
    /// `last_seq` as the opaque token passed back as `since`.
    pub fn last_seq_token(&self) -> String {
        seq_token(&self.last_seq)
    }
}

/// Remote sequences may be numbers or strings; both are kept as text.
pub fn seq_token(seq: &Value) -> String {
    match seq {
        Value::String(s) => s.clone(),
        Value::Null => "0".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn credentials_without_expiry_never_expire() {
        let creds = Credentials {
            token: "t".into(),
            username: "alice".into(),
            expires_at: None,
        };
        assert!(!creds.is_expired());

        let expired = Credentials {
            expires_at: Some(Utc::now() - Duration::seconds(1)),
            ..creds
        };
        assert!(expired.is_expired());
    }

    #[test]
    fn seq_tokens() {
        assert_eq!(seq_token(&json!(12)), "12");
        assert_eq!(seq_token(&json!("12-abc")), "12-abc");
        assert_eq!(seq_token(&Value::Null), "0");
    }

    #[test]
    fn remote_changes_parse_couch_rows() {
        let page: RemoteChanges = serde_json::from_value(json!({
            "results": [
                {"seq": 3, "id": "alice::settings", "changes": [{"rev": "2-a"}], "doc": {"_id": "alice::settings", "_rev": "2-a"}},
                {"seq": "4-x", "id": "alice::task::1::a", "changes": [{"rev": "3-b"}], "deleted": true}
            ],
            "last_seq": "4-x"
        }))
        .unwrap();
        assert_eq!(page.results.len(), 2);
        assert!(page.results[1].deleted);
        assert!(page.results[1].doc.is_none());
        assert_eq!(page.last_seq_token(), "4-x");
    }
}
