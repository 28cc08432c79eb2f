//! Documents and revisions.
//!
//! A document is a JSON object addressed by a string key. On the wire and in
//! change events it is a flat object carrying `_id` and `_rev` next to the
//! body fields, so a document read from the store can be shipped to the
//! remote replica unchanged.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Length of the hex digest kept in a revision token.
const DIGEST_LEN: usize = 32;

/// Revision token: `<generation>-<digest>`.
///
/// Revisions are totally ordered by generation, then digest. That order is
/// the last-write-wins rule used when replicated writes meet local ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision {
    generation: u64,
    digest: String,
}

impl Revision {
    /// Derives the revision that follows `previous` for the given body.
    pub fn next(previous: Option<&Revision>, body: &Map<String, Value>) -> Self {
        let generation = previous.map_or(1, |r| r.generation + 1);
        let mut hasher = Sha256::new();
        if let Some(prev) = previous {
            hasher.update(prev.to_string().as_bytes());
        }
        hasher.update(b"\n");
        // serde_json::Map is ordered by key, so the encoding is canonical.
        hasher.update(Value::Object(body.clone()).to_string().as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(DIGEST_LEN);
        Self { generation, digest }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Returns true if `self` beats `other` under last-write-wins.
    pub fn wins_over(&self, other: &Revision) -> bool {
        self.cmp(other) == Ordering::Greater
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.digest.cmp(&other.digest))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.digest)
    }
}

impl FromStr for Revision {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, digest) = s
            .split_once('-')
            .ok_or_else(|| StorageError::InvalidRevision(s.to_string()))?;
        let generation: u64 = generation
            .parse()
            .map_err(|_| StorageError::InvalidRevision(s.to_string()))?;
        if generation == 0 || digest.is_empty() {
            return Err(StorageError::InvalidRevision(s.to_string()));
        }
        Ok(Self {
            generation,
            digest: digest.to_string(),
        })
    }
}

impl TryFrom<String> for Revision {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.to_string()
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Document {
    /// Creates a new, never-written document.
    pub fn new(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            body,
        }
    }

    /// Builds a document from a JSON value that must be an object.
    pub fn from_value(id: impl Into<String>, value: Value) -> Result<Self, StorageError> {
        let id = id.into();
        match value {
            Value::Object(body) => Ok(Self::new(id, body)),
            other => Err(StorageError::InvalidDocument(format!(
                "{id}: body must be a JSON object, got {other}"
            ))),
        }
    }

    /// The owning user recorded in the body.
    pub fn username(&self) -> Option<&str> {
        self.get_str("username")
    }

    /// The document kind recorded in the body (`task`, `settings`, ...).
    pub fn doc_type(&self) -> Option<&str> {
        self.get_str("type")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.body.get(field).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.body.get(field).and_then(Value::as_i64)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.body.insert(field.into(), value);
    }

    /// Shallow merge: top-level keys of `updates` replace the body's keys.
    pub fn merge(&mut self, updates: &Map<String, Value>) {
        for (k, v) in updates {
            self.body.insert(k.clone(), v.clone());
        }
    }
}

/// Where a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written through the local command API.
    Local,
    /// Applied from the remote replica.
    Remote,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "remote" => Self::Remote,
            _ => Self::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn first_revision_is_generation_one() {
        let rev = Revision::next(None, &body(json!({"a": 1})));
        assert_eq!(rev.generation(), 1);
        assert_eq!(rev.digest().len(), DIGEST_LEN);
    }

    #[test]
    fn next_revision_bumps_generation_and_changes_digest() {
        let b = body(json!({"a": 1}));
        let r1 = Revision::next(None, &b);
        let r2 = Revision::next(Some(&r1), &b);
        assert_eq!(r2.generation(), 2);
        assert_ne!(r1.digest(), r2.digest());
        assert!(r2.wins_over(&r1));
        assert!(!r1.wins_over(&r2));
    }

    #[test]
    fn revision_parse_roundtrip() {
        let rev: Revision = "3-abc123".parse().unwrap();
        assert_eq!(rev.generation(), 3);
        assert_eq!(rev.to_string(), "3-abc123");
    }

    #[test]
    fn revision_parse_rejects_garbage() {
        assert!("abc".parse::<Revision>().is_err());
        assert!("0-abc".parse::<Revision>().is_err());
        assert!("x-abc".parse::<Revision>().is_err());
        assert!("2-".parse::<Revision>().is_err());
    }

    #[test]
    fn equal_generation_breaks_tie_on_digest() {
        let a: Revision = "2-aaa".parse().unwrap();
        let b: Revision = "2-bbb".parse().unwrap();
        assert!(b.wins_over(&a));
        assert!(!a.wins_over(&a));
    }

    #[test]
    fn document_serializes_flat() {
        let mut doc = Document::from_value("alice::settings", json!({"type": "settings"})).unwrap();
        doc.rev = Some("1-abc".parse().unwrap());
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v, json!({"_id": "alice::settings", "_rev": "1-abc", "type": "settings"}));

        let back: Document = serde_json::from_value(v).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn document_without_rev_omits_key() {
        let doc = Document::from_value("bob::settings", json!({})).unwrap();
        let v = serde_json::to_value(&doc).unwrap();
        assert!(v.get("_rev").is_none());
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(Document::from_value("x", json!([1, 2])).is_err());
    }

    #[test]
    fn merge_is_shallow() {
        let mut doc = Document::from_value(
            "alice::settings",
            json!({"pomodoro": {"workDuration": 25, "enabled": false}, "theme": "x"}),
        )
        .unwrap();
        doc.merge(&body(json!({"pomodoro": {"enabled": true}})));
        assert_eq!(doc.get("pomodoro"), Some(&json!({"enabled": true})));
        assert_eq!(doc.get_str("theme"), Some("x"));
    }
}
