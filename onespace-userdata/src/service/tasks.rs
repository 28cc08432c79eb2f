//! Task operations.

use super::{UserDataService, sanitize_updates};
use crate::error::{UserDataError, UserDataResult};
use crate::ids::{TASK_TYPE, new_task_id, timestamp};
use chrono::Utc;
use onespace_storage::{BulkResult, Document, Field, Query, SortDirection, scope};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use tracing::{debug, info, warn};

fn incomplete_tasks(username: &str) -> Query {
    Query::new()
        .eq(Field::Type, TASK_TYPE)
        .eq(Field::Username, username)
        .eq(Field::Completed, false)
        .sort(Field::Order, SortDirection::Asc)
}

fn completed_tasks(username: &str) -> Query {
    Query::new()
        .eq(Field::Type, TASK_TYPE)
        .eq(Field::Username, username)
        .eq(Field::Completed, true)
        .sort(Field::CompletedAt, SortDirection::Desc)
}

impl UserDataService {
    /// The user's incomplete tasks in display order.
    pub fn get_user_tasks(&self, username: &str) -> UserDataResult<Vec<Document>> {
        scope::validate_username(username)?;
        let tasks = self.store.find(&incomplete_tasks(username))?;
        debug!(%username, count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    /// The user's completed tasks, most recently completed first.
    pub fn get_completed_tasks(&self, username: &str) -> UserDataResult<Vec<Document>> {
        scope::validate_username(username)?;
        Ok(self.store.find(&completed_tasks(username))?)
    }

    /// The first incomplete task, if any.
    pub fn current_task(&self, username: &str) -> UserDataResult<Option<Document>> {
        scope::validate_username(username)?;
        let mut first = self.store.find(&incomplete_tasks(username).limit(1))?;
        Ok(first.pop())
    }

    /// Creates a task from `data` and returns the stored document.
    ///
    /// `order` defaults to the creation time in milliseconds so new tasks
    /// sort after older ones. If that would not place the task after every
    /// incomplete task (a dense reorder with a clock far in the past) it is
    /// bumped to one past the largest order.
    pub fn create_task(&self, username: &str, data: &Map<String, Value>) -> UserDataResult<Document> {
        scope::validate_username(username)?;
        let now = Utc::now();
        let created_ms = now.timestamp_millis();
        let stamp = timestamp(now);

        let mut body = Map::new();
        body.insert("type".into(), json!(TASK_TYPE));
        body.insert("username".into(), json!(username));
        body.insert("createdAt".into(), json!(stamp));
        body.insert("updatedAt".into(), json!(stamp));
        body.insert("completed".into(), json!(false));
        body.insert("order".into(), json!(created_ms));
        let data = sanitize_updates(data);
        let explicit_order = data.contains_key("order");
        body.extend(data);

        let mut doc = Document::new(new_task_id(username, created_ms), body);
        if !explicit_order {
            let max_order = self
                .get_user_tasks(username)?
                .iter()
                .filter_map(|t| t.get_i64("order"))
                .max();
            if let Some(max_order) = max_order.filter(|max| *max >= created_ms) {
                warn!(%username, created_ms, max_order, "clock behind existing task order, appending after it");
                doc.set("order", json!(max_order + 1));
            }
        }

        let rev = self.store.put(&doc)?;
        doc.rev = Some(rev);
        info!(id = %doc.id, "task created");
        Ok(doc)
    }

    /// Shallow-merges `updates` into a task and refreshes `updatedAt`.
    pub fn update_task(
        &self,
        username: &str,
        task_id: &str,
        updates: &Map<String, Value>,
    ) -> UserDataResult<Document> {
        let mut doc = self.get_owned(username, task_id, TASK_TYPE)?;
        doc.merge(&sanitize_updates(updates));
        doc.set("updatedAt", json!(timestamp(Utc::now())));
        let rev = self.store.put(&doc)?;
        doc.rev = Some(rev);
        debug!(id = %task_id, "task updated");
        Ok(doc)
    }

    /// Marks a task completed now.
    pub fn complete_task(&self, username: &str, task_id: &str) -> UserDataResult<Document> {
        let mut updates = Map::new();
        updates.insert("completed".into(), json!(true));
        updates.insert("completedAt".into(), json!(timestamp(Utc::now())));
        self.update_task(username, task_id, &updates)
    }

    pub fn delete_task(&self, username: &str, task_id: &str) -> UserDataResult<()> {
        let doc = self.get_owned(username, task_id, TASK_TYPE)?;
        self.store.remove(&doc)?;
        info!(id = %task_id, "task deleted");
        Ok(())
    }

    /// Gives the listed tasks the orders `0..n` in list order.
    ///
    /// Every task is read and checked before anything is written: one task
    /// owned by someone else (or missing) fails the whole call with no
    /// writes. The write itself is a bulk write, so the per-task results
    /// are returned for the caller to inspect.
    pub fn reorder_tasks(&self, username: &str, task_ids: &[String]) -> UserDataResult<Vec<BulkResult>> {
        scope::validate_username(username)?;
        let mut seen = HashSet::new();
        if let Some(dup) = task_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(UserDataError::InvalidRequest(format!(
                "task {dup} listed more than once"
            )));
        }

        let stamp = timestamp(Utc::now());
        let mut staged = Vec::with_capacity(task_ids.len());
        for (i, id) in task_ids.iter().enumerate() {
            let mut doc = self.get_owned(username, id, TASK_TYPE)?;
            doc.set("order", json!(i));
            doc.set("updatedAt", json!(stamp));
            staged.push(doc);
        }

        let results = self.store.bulk_put(&staged)?;
        let failed = results.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 {
            warn!(%username, total = results.len(), failed, "reorder partially applied");
        } else {
            debug!(%username, total = results.len(), "tasks reordered");
        }
        Ok(results)
    }
}
