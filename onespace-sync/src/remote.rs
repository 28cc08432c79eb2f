//! Remote replica seam.

use crate::error::SyncResult;
use crate::types::{Credentials, RemoteChanges};
use async_trait::async_trait;
use serde_json::Value;

/// A remote endpoint speaking the replica change protocol.
///
/// Every call carries the session credentials; implementations scope each
/// request to `credentials.username` so the remote filters server-side too.
#[async_trait]
pub trait RemoteReplica: Send + Sync {
    /// Changes after the opaque `since` token, at most `limit` rows, with
    /// documents included.
    async fn changes(
        &self,
        credentials: &Credentials,
        since: &str,
        limit: usize,
    ) -> SyncResult<RemoteChanges>;

    /// Stores documents with their revisions as given (no new edits).
    async fn bulk_docs(&self, credentials: &Credentials, docs: Vec<Value>) -> SyncResult<()>;

    /// Identifies the remote in checkpoint keys and logs.
    fn endpoint(&self) -> String;
}
