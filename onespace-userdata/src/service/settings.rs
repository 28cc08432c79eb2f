//! Settings singleton operations.

use super::{UserDataService, sanitize_updates};
use crate::error::UserDataResult;
use crate::ids::settings_id;
use crate::types::UserSettings;
use onespace_storage::Document;
use serde_json::{Map, Value, json};

impl UserDataService {
    /// The user's settings, created with defaults on first access.
    pub fn get_user_settings(&self, username: &str) -> UserDataResult<Document> {
        self.get_or_create(username, &settings_id(username), || {
            UserSettings::default_document(username)
        })
    }

    /// The well-known settings sections.
    pub fn user_settings(&self, username: &str) -> UserDataResult<UserSettings> {
        Ok(UserSettings::from_document(&self.get_user_settings(username)?))
    }

    /// Shallow-merges `updates` into the settings.
    pub fn update_user_settings(
        &self,
        username: &str,
        updates: &Map<String, Value>,
    ) -> UserDataResult<Document> {
        let updates = sanitize_updates(updates);
        self.modify_singleton(
            username,
            &settings_id(username),
            || UserSettings::default_document(username),
            |doc| {
                doc.merge(&updates);
                Ok(())
            },
        )
    }

    pub fn update_pomodoro_settings(
        &self,
        username: &str,
        updates: &Map<String, Value>,
    ) -> UserDataResult<Document> {
        self.merge_section(username, "pomodoro", updates)
    }

    pub fn update_focus_mode_settings(
        &self,
        username: &str,
        updates: &Map<String, Value>,
    ) -> UserDataResult<Document> {
        self.merge_section(username, "focusMode", updates)
    }

    /// Flips `pomodoro.enabled` and returns the new value.
    pub fn toggle_pomodoro(&self, username: &str) -> UserDataResult<bool> {
        self.toggle_section(username, "pomodoro")
    }

    /// Flips `focusMode.enabled` and returns the new value.
    pub fn toggle_focus_mode(&self, username: &str) -> UserDataResult<bool> {
        self.toggle_section(username, "focusMode")
    }

    /// Merges `updates` into one object-valued section.
    fn merge_section(
        &self,
        username: &str,
        key: &str,
        updates: &Map<String, Value>,
    ) -> UserDataResult<Document> {
        self.modify_singleton(
            username,
            &settings_id(username),
            || UserSettings::default_document(username),
            |doc| {
                let mut section = match doc.get(key) {
                    Some(Value::Object(existing)) => existing.clone(),
                    _ => Map::new(),
                };
                section.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
                doc.set(key, Value::Object(section));
                Ok(())
            },
        )
    }

    fn toggle_section(&self, username: &str, key: &str) -> UserDataResult<bool> {
        let doc = self.modify_singleton(
            username,
            &settings_id(username),
            || UserSettings::default_document(username),
            |doc| {
                let enabled = doc
                    .get(key)
                    .and_then(|s| s.get("enabled"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let mut section = match doc.get(key) {
                    Some(Value::Object(existing)) => existing.clone(),
                    _ => Map::new(),
                };
                section.insert("enabled".into(), json!(!enabled));
                doc.set(key, Value::Object(section));
                Ok(())
            },
        )?;
        Ok(doc
            .get(key)
            .and_then(|s| s.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}
