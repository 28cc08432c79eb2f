//! Typed views of the settings and timer state documents.
//!
//! The stored documents stay plain JSON so partial updates and fields added
//! by other clients survive a round trip. These types read and build the
//! well-known parts.

use crate::error::{UserDataError, UserDataResult};
use crate::ids::{SETTINGS_TYPE, TIMER_STATE_TYPE, settings_id, timer_state_id};
use onespace_storage::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Pomodoro durations in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PomodoroSettings {
    pub work_duration: u32,
    pub short_break: u32,
    pub long_break: u32,
    pub cycles_before_long_break: u32,
    pub enabled: bool,
}

impl Default for PomodoroSettings {
    fn default() -> Self {
        Self {
            work_duration: 25,
            short_break: 5,
            long_break: 15,
            cycles_before_long_break: 4,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FocusModeSettings {
    pub enabled: bool,
    pub nudge_after_minutes: u32,
}

impl Default for FocusModeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            nudge_after_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThemeColors {
    pub primary: String,
    pub secondary: String,
    pub background: String,
    pub text_secondary: String,
    pub text_primary: String,
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self {
            primary: "#ffa90a".into(),
            secondary: "#ffd793".into(),
            background: "#ffffff".into(),
            text_secondary: "#999999".into(),
            text_primary: "#262626".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub colors: ThemeColors,
}

/// The per-user settings singleton.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub pomodoro: PomodoroSettings,
    pub focus_mode: FocusModeSettings,
    pub theme: Theme,
}

impl UserSettings {
    /// Reads the well-known sections; missing or malformed sections fall
    /// back to their defaults.
    pub fn from_document(doc: &Document) -> Self {
        Self {
            pomodoro: section(doc, "pomodoro"),
            focus_mode: section(doc, "focusMode"),
            theme: section(doc, "theme"),
        }
    }

    /// The document created on first access.
    pub fn default_document(username: &str) -> Document {
        let mut body = Map::new();
        body.insert("type".into(), json!(SETTINGS_TYPE));
        body.insert("username".into(), json!(username));
        if let Ok(Value::Object(sections)) = serde_json::to_value(Self::default()) {
            body.extend(sections);
        }
        Document::new(settings_id(username), body)
    }
}

fn section<T: serde::de::DeserializeOwned + Default>(doc: &Document, key: &str) -> T {
    doc.get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Pomodoro phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerPhase {
    #[default]
    Work,
    ShortBreak,
    LongBreak,
}

/// The per-user timer state singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerState {
    pub is_active: bool,
    pub is_paused: bool,
    pub current_phase: TimerPhase,
    /// Seconds left in the current phase.
    pub time_remaining: u32,
    pub cycles_completed: u32,
    pub session_start_time: Option<String>,
    /// Task being worked on. Not checked against existing tasks.
    pub task_id: Option<String>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            is_active: false,
            is_paused: false,
            current_phase: TimerPhase::Work,
            time_remaining: 1500,
            cycles_completed: 0,
            session_start_time: None,
            task_id: None,
        }
    }
}

impl TimerState {
    /// Reads the typed fields. Missing fields take their defaults; a field
    /// of the wrong type or range is an error.
    pub fn from_document(doc: &Document) -> UserDataResult<Self> {
        serde_json::from_value(Value::Object(doc.body.clone())).map_err(|e| {
            UserDataError::InvalidRequest(format!("{} is not a valid timer state: {e}", doc.id))
        })
    }

    /// The state's fields as a partial update.
    pub fn to_updates(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn default_document(username: &str) -> Document {
        let mut body = Map::new();
        body.insert("type".into(), json!(TIMER_STATE_TYPE));
        body.insert("username".into(), json!(username));
        body.extend(Self::default().to_updates());
        Document::new(timer_state_id(username), body)
    }
}
