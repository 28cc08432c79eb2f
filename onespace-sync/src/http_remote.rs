//! HTTP client for a CouchDB-style remote replica.
//!
//! Uses `GET {base}/_changes` and `POST {base}/_bulk_docs`, both scoped by a
//! `username` query parameter and authenticated with a bearer token.

use crate::config::ReplicationConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteReplica;
use crate::types::{Credentials, RemoteChanges};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

/// Remote replica reached over HTTP.
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, config: &ReplicationConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Builds a remote from `config.remote_url`; `None` when unset.
    pub fn from_config(config: &ReplicationConfig) -> SyncResult<Option<Self>> {
        config
            .remote_url
            .as_deref()
            .map(|url| Self::new(url, config))
            .transpose()
    }
}

/// Maps non-success statuses onto the replication error taxonomy.
async fn check_status(resp: Response, what: &str) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SyncError::Denied(format!("{what}: {status} {body}")))
        }
        _ => Err(SyncError::Transient(format!("{what}: {status} {body}"))),
    }
}

#[async_trait]
impl RemoteReplica for HttpRemote {
    async fn changes(
        &self,
        credentials: &Credentials,
        since: &str,
        limit: usize,
    ) -> SyncResult<RemoteChanges> {
        let url = format!("{}/_changes", self.base_url);
        let limit = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&credentials.token)
            .query(&[
                ("since", since),
                ("limit", limit.as_str()),
                ("include_docs", "true"),
                ("username", credentials.username.as_str()),
            ])
            .send()
            .await?;
        let page: RemoteChanges = check_status(resp, "GET _changes")
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("malformed _changes response: {e}")))?;
        debug!(since, rows = page.results.len(), "pulled change page");
        Ok(page)
    }

    async fn bulk_docs(&self, credentials: &Credentials, docs: Vec<Value>) -> SyncResult<()> {
        let url = format!("{}/_bulk_docs", self.base_url);
        let count = docs.len();
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&credentials.token)
            .query(&[("username", credentials.username.as_str())])
            .json(&json!({ "docs": docs, "new_edits": false }))
            .send()
            .await?;
        check_status(resp, "POST _bulk_docs").await?;
        debug!(count, "pushed documents");
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}
