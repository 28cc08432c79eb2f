//! Replication configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the replication engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Base URL of the remote replica. `None` keeps the device offline-only.
    pub remote_url: Option<String>,

    /// Documents per push request and changes per pull request.
    pub batch_size: usize,

    /// How often a paused session polls the remote for changes (seconds).
    pub poll_interval_secs: u64,

    /// First retry delay after a transient failure (milliseconds).
    pub initial_backoff_ms: u64,

    /// Retry delay cap (milliseconds).
    pub max_backoff_ms: u64,

    /// Per-request timeout (seconds).
    pub request_timeout_secs: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            batch_size: 100,
            poll_interval_secs: 30,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
            request_timeout_secs: 30,
        }
    }
}

impl ReplicationConfig {
    pub fn with_remote(url: impl Into<String>) -> Self {
        Self {
            remote_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
