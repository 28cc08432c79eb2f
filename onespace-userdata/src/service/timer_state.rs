//! Timer state singleton operations.

use super::{UserDataService, sanitize_updates};
use crate::error::UserDataResult;
use crate::ids::timer_state_id;
use crate::types::{TimerPhase, TimerState};
use chrono::Utc;
use onespace_storage::Document;
use serde_json::{Map, Value};
use tracing::info;

impl UserDataService {
    /// The user's timer state, created with defaults on first access.
    pub fn get_timer_state(&self, username: &str) -> UserDataResult<Document> {
        self.get_or_create(username, &timer_state_id(username), || {
            TimerState::default_document(username)
        })
    }

    pub fn timer_state(&self, username: &str) -> UserDataResult<TimerState> {
        TimerState::from_document(&self.get_timer_state(username)?)
    }

    /// Shallow-merges `updates` into the timer state. The merged state must
    /// still read as a valid [`TimerState`], otherwise nothing is written.
    pub fn update_timer_state(
        &self,
        username: &str,
        updates: &Map<String, Value>,
    ) -> UserDataResult<Document> {
        let updates = sanitize_updates(updates);
        self.modify_singleton(
            username,
            &timer_state_id(username),
            || TimerState::default_document(username),
            |doc| {
                doc.merge(&updates);
                TimerState::from_document(doc).map(|_| ())
            },
        )
    }

    /// Applies `transition` to the stored timer state and saves the result.
    /// The transition is re-applied to the fresh state if the write races.
    fn transition_timer(
        &self,
        username: &str,
        transition: impl Fn(&mut TimerState),
    ) -> UserDataResult<TimerState> {
        let doc = self.modify_singleton(
            username,
            &timer_state_id(username),
            || TimerState::default_document(username),
            |doc| {
                let mut state = TimerState::from_document(doc)?;
                transition(&mut state);
                doc.merge(&state.to_updates());
                Ok(())
            },
        )?;
        TimerState::from_document(&doc)
    }

    /// Starts the timer, optionally on a task. A running timer is unchanged.
    pub fn start_timer(&self, username: &str, task_id: Option<&str>) -> UserDataResult<TimerState> {
        let now = Utc::now();
        self.transition_timer(username, |s| {
            s.start(task_id, now);
        })
    }

    pub fn pause_timer(&self, username: &str) -> UserDataResult<TimerState> {
        self.transition_timer(username, |s| {
            s.pause();
        })
    }

    pub fn resume_timer(&self, username: &str) -> UserDataResult<TimerState> {
        let now = Utc::now();
        self.transition_timer(username, |s| {
            s.resume(now);
        })
    }

    /// Stops the timer and refills the current phase from the settings.
    pub fn reset_timer(&self, username: &str) -> UserDataResult<TimerState> {
        let pomodoro = self.user_settings(username)?.pomodoro;
        self.transition_timer(username, |s| s.reset(&pomodoro))
    }

    /// Finishes the current phase and returns the state of the next one.
    pub fn complete_timer_phase(&self, username: &str) -> UserDataResult<TimerState> {
        let pomodoro = self.user_settings(username)?.pomodoro;
        let state = self.transition_timer(username, |s| {
            s.complete_phase(&pomodoro);
        })?;
        let message = match state.current_phase {
            TimerPhase::Work => "break over, back to work",
            TimerPhase::ShortBreak | TimerPhase::LongBreak => "work phase complete, time for a break",
        };
        info!(%username, phase = ?state.current_phase, cycles = state.cycles_completed, "{message}");
        Ok(state)
    }
}
