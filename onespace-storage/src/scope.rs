//! User scoping guard.
//!
//! Identifiers have the shape `<username>::<kind>[::<qualifier>]`. The prefix
//! is the only authorization boundary the store knows about: every mutation
//! passes through these checks before it reaches the database.

use crate::document::Document;
use crate::error::{StorageError, StorageResult};

/// Separator between the segments of a document identifier.
pub const SEPARATOR: &str = "::";

/// Returns true iff `id` starts with `"<username>::"`.
pub fn owns(id: &str, username: &str) -> bool {
    if id.is_empty() || username.is_empty() {
        return false;
    }
    id.strip_prefix(username)
        .is_some_and(|rest| rest.starts_with(SEPARATOR))
}

/// The owner segment of an identifier, if it has one.
pub fn owner_of(id: &str) -> Option<&str> {
    match id.split_once(SEPARATOR) {
        Some((owner, _)) if !owner.is_empty() => Some(owner),
        _ => None,
    }
}

/// Fails with `Authorization` unless `username` owns `id`.
pub fn ensure_owned(id: &str, username: &str) -> StorageResult<()> {
    if owns(id, username) {
        Ok(())
    } else {
        Err(StorageError::Authorization {
            id: id.to_string(),
            username: username.to_string(),
        })
    }
}

/// Fails with `Authorization` unless the body's `username` field owns the id.
pub fn ensure_consistent(doc: &Document) -> StorageResult<()> {
    match doc.username() {
        Some(username) => ensure_owned(&doc.id, username),
        None => Err(StorageError::Authorization {
            id: doc.id.clone(),
            username: String::new(),
        }),
    }
}

/// Rejects usernames that cannot be used as an identifier prefix.
///
/// A name containing the separator could make one user's prefix a prefix of
/// another user's identifiers (`a` vs `a::b`).
pub fn validate_username(username: &str) -> StorageResult<()> {
    if username.trim().is_empty() {
        return Err(StorageError::InvalidDocument("username is empty".into()));
    }
    if username.contains(SEPARATOR) {
        return Err(StorageError::InvalidDocument(format!(
            "username {username:?} contains the {SEPARATOR:?} separator"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn owns_requires_separator_after_username() {
        assert!(owns("alice::task::1::x", "alice"));
        assert!(owns("alice::settings", "alice"));
        assert!(!owns("alice2::settings", "alice"));
        assert!(!owns("alice", "alice"));
        assert!(!owns("alice:settings", "alice"));
        assert!(!owns("bob::settings", "alice"));
    }

    #[test]
    fn owns_rejects_empty_inputs() {
        assert!(!owns("", "alice"));
        assert!(!owns("::settings", ""));
    }

    #[test]
    fn owner_of_extracts_prefix() {
        assert_eq!(owner_of("alice::timer::state"), Some("alice"));
        assert_eq!(owner_of("::settings"), None);
        assert_eq!(owner_of("nope"), None);
    }

    #[test]
    fn ensure_consistent_checks_username_field() {
        let ok = Document::from_value("alice::settings", json!({"username": "alice"})).unwrap();
        assert!(ensure_consistent(&ok).is_ok());

        let bad = Document::from_value("alice::settings", json!({"username": "bob"})).unwrap();
        assert!(ensure_consistent(&bad).unwrap_err().is_authorization());

        let missing = Document::from_value("alice::settings", json!({})).unwrap();
        assert!(ensure_consistent(&missing).unwrap_err().is_authorization());
    }

    #[test]
    fn validate_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
        assert!(validate_username("a::b").is_err());
    }

    proptest! {
        #[test]
        fn owns_matches_prefix_definition(id in ".{0,24}", user in "[a-z]{0,8}") {
            let expected = !user.is_empty() && !id.is_empty() && id.starts_with(&format!("{user}::"));
            prop_assert_eq!(owns(&id, &user), expected);
        }

        #[test]
        fn built_ids_are_owned(user in "[a-z][a-z0-9_.@-]{0,12}", kind in "[a-z]{1,8}") {
            let id = format!("{user}::{kind}");
            prop_assert!(owns(&id, &user));
            prop_assert_eq!(owner_of(&id), Some(user.as_str()));
        }
    }
}
