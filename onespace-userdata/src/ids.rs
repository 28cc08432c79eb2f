//! Document identifiers and kinds.
//!
//! Every identifier starts with the owner: `<username>::<kind>[::<qualifier>]`.
//! Tasks carry their creation time and a random suffix as the qualifier;
//! the two singletons have fixed identifiers.

use chrono::{DateTime, SecondsFormat, Utc};
use onespace_storage::scope::SEPARATOR;
use rand::Rng;

pub const TASK_TYPE: &str = "task";
pub const SETTINGS_TYPE: &str = "settings";
pub const TIMER_STATE_TYPE: &str = "timer_state";

const SUFFIX_LEN: usize = 11;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn settings_id(username: &str) -> String {
    format!("{username}{SEPARATOR}settings")
}

pub fn timer_state_id(username: &str) -> String {
    format!("{username}{SEPARATOR}timer{SEPARATOR}state")
}

/// `<username>::task::<created_ms>::<suffix>`
pub fn task_id(username: &str, created_ms: i64, suffix: &str) -> String {
    format!("{username}{SEPARATOR}task{SEPARATOR}{created_ms}{SEPARATOR}{suffix}")
}

/// A fresh task identifier for a task created at `created_ms`.
pub fn new_task_id(username: &str, created_ms: i64) -> String {
    task_id(username, created_ms, &random_suffix())
}

/// Eleven random base-36 characters.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// The creation timestamp embedded in a task identifier.
pub fn task_created_ms(id: &str) -> Option<i64> {
    let mut parts = id.split(SEPARATOR);
    let _owner = parts.next()?;
    if parts.next()? != TASK_TYPE {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Timestamps are stored as RFC 3339 UTC with millisecond precision, which
/// keeps them sortable as text.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use onespace_storage::scope;

    #[test]
    fn singleton_ids() {
        assert_eq!(settings_id("alice"), "alice::settings");
        assert_eq!(timer_state_id("alice"), "alice::timer::state");
        assert!(scope::owns(&timer_state_id("alice"), "alice"));
    }

    #[test]
    fn task_ids_embed_creation_time() {
        let id = new_task_id("alice", 1_700_000_000_123);
        assert!(id.starts_with("alice::task::1700000000123::"));
        let suffix = id.rsplit(SEPARATOR).next().unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
        assert_eq!(task_created_ms(&id), Some(1_700_000_000_123));
        assert_eq!(task_created_ms("alice::settings"), None);
    }

    #[test]
    fn suffixes_differ() {
        assert_ne!(random_suffix(), random_suffix());
    }

    #[test]
    fn timestamps_are_millisecond_utc() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(timestamp(at), "2023-11-14T22:13:20.123Z");
    }
}
