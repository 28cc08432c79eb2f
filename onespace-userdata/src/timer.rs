//! Pomodoro phase bookkeeping.
//!
//! Pure state transitions on [`TimerState`]. The countdown itself is driven
//! by the caller, which persists the state after each transition.

use crate::ids::timestamp;
use crate::types::{PomodoroSettings, TimerPhase, TimerState};
use chrono::{DateTime, Utc};

impl PomodoroSettings {
    /// Length of `phase` in seconds.
    pub fn duration_secs(&self, phase: TimerPhase) -> u32 {
        let minutes = match phase {
            TimerPhase::Work => self.work_duration,
            TimerPhase::ShortBreak => self.short_break,
            TimerPhase::LongBreak => self.long_break,
        };
        minutes.saturating_mul(60)
    }
}

impl TimerState {
    /// Counting down: active and not paused.
    pub fn is_running(&self) -> bool {
        self.is_active && !self.is_paused
    }

    /// Starts (or resumes) the countdown. A running timer is left alone.
    /// `task_id` replaces the tracked task when given.
    pub fn start(&mut self, task_id: Option<&str>, now: DateTime<Utc>) -> bool {
        if self.is_running() {
            return false;
        }
        self.is_active = true;
        self.is_paused = false;
        self.session_start_time = Some(timestamp(now));
        if let Some(task_id) = task_id {
            self.task_id = Some(task_id.to_string());
        }
        true
    }

    pub fn pause(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.is_paused = true;
        true
    }

    /// Resumes a paused timer.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active || !self.is_paused {
            return false;
        }
        self.start(None, now)
    }

    /// One second elapsed. Returns `true` when the phase has run out and
    /// [`complete_phase`](Self::complete_phase) should be called.
    pub fn tick(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        if self.time_remaining > 0 {
            self.time_remaining -= 1;
            false
        } else {
            true
        }
    }

    /// Stops the timer and refills the current phase.
    pub fn reset(&mut self, settings: &PomodoroSettings) {
        *self = Self {
            current_phase: self.current_phase,
            time_remaining: settings.duration_secs(self.current_phase),
            cycles_completed: self.cycles_completed,
            ..Self::default()
        };
    }

    /// Ends the current phase and moves to the next one, stopped.
    ///
    /// A finished work phase counts a cycle and is followed by a long break
    /// every `cycles_before_long_break` cycles, otherwise a short break.
    /// Breaks are followed by work.
    pub fn complete_phase(&mut self, settings: &PomodoroSettings) -> TimerPhase {
        let next = match self.current_phase {
            TimerPhase::Work => {
                self.cycles_completed = self.cycles_completed.saturating_add(1);
                let every = settings.cycles_before_long_break.max(1);
                if self.cycles_completed % every == 0 {
                    TimerPhase::LongBreak
                } else {
                    TimerPhase::ShortBreak
                }
            }
            TimerPhase::ShortBreak | TimerPhase::LongBreak => TimerPhase::Work,
        };
        *self = Self {
            current_phase: next,
            time_remaining: settings.duration_secs(next),
            cycles_completed: self.cycles_completed,
            ..Self::default()
        };
        next
    }
}
