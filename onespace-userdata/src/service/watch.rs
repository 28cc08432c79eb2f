use super::UserDataService;
use crate::error::UserDataResult;
use onespace_storage::{ChangeEvent, ListenerHandle, scope};

impl UserDataService {
    /// Calls `listener` for every change to a document `username` owns,
    /// starting with the next write. Cancel through the returned handle.
    pub fn watch_changes<F>(&self, username: &str, listener: F) -> UserDataResult<ListenerHandle>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        scope::validate_username(username)?;
        Ok(self.notifier.watch(username, listener)?)
    }

    /// Cancels every listener registered through this service.
    pub fn cleanup_user_data(&self) {
        self.notifier.cancel_all();
    }
}
