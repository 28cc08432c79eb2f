//! First-login setup.

use super::UserDataService;
use crate::error::UserDataResult;
use crate::types::{TimerState, UserSettings};
use onespace_storage::{Field, Query, scope};
use tracing::{info, warn};

impl UserDataService {
    /// Creates the settings and timer state singletons for a user who has
    /// no documents yet. Returns whether anything was created.
    ///
    /// A singleton that fails to write is logged and left to be created
    /// lazily on first read.
    pub fn initialize_user_data(&self, username: &str) -> UserDataResult<bool> {
        scope::validate_username(username)?;
        let existing = self
            .store
            .find(&Query::new().eq(Field::Username, username).limit(1))?;
        if !existing.is_empty() {
            return Ok(false);
        }

        let defaults = [
            UserSettings::default_document(username),
            TimerState::default_document(username),
        ];
        let results = self.store.bulk_put(&defaults)?;
        for result in &results {
            if let Err(e) = &result.outcome {
                warn!(id = %result.id, error = %e, "failed to create default document");
            }
        }
        info!(%username, "initialized user data");
        Ok(results.iter().any(|r| r.is_ok()))
    }
}
