//! Document store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for opening a [`DocumentStore`](crate::DocumentStore).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` opens an in-memory store.
    pub path: Option<PathBuf>,

    /// DuckDB memory cap (e.g. "256MB").
    pub memory_limit: String,

    /// DuckDB worker threads.
    pub threads: u32,

    /// Capacity of the live change channel. Slow subscribers that fall
    /// further behind re-read the missed tail from the database.
    pub change_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            memory_limit: "256MB".to_string(),
            threads: 2,
            change_buffer: 1024,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}
