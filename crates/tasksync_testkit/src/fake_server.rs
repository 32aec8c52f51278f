//! A stateful in-memory remote authority.
//!
//! [`FakeServer`] behaves like the real service closely enough for
//! end-to-end tests: it keeps live records and tombstones stamped with a
//! server clock, answers deltas relative to a cursor, rejects updates and
//! deletes of unknown ids with 404, and can be taken offline or scripted to
//! fail specific calls.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tasksync_engine::{RemoteApi, RemoteError, RemoteResult};
use tasksync_protocol::{
    Category, CategoryPatch, Completion, CompletionDelta, CompletionKey, DeltaEnvelope,
    NewCategory, NewCompletion, NewTodo, RemoteCategory, RemoteCompletion, RemoteCompletionKey,
    RemoteTime, RemoteTodo, SyncCursor, Todo, TodoDelta, TodoPatch,
};
use tracing::debug;

/// Key used to script failures of [`RemoteApi::list_categories`].
pub const LIST_CATEGORIES: &str = "listCategories";
/// Key used to script failures of [`RemoteApi::todo_delta`].
pub const TODO_DELTA: &str = "todoDelta";
/// Key used to script failures of [`RemoteApi::completion_delta`].
pub const COMPLETION_DELTA: &str = "completionDelta";

#[derive(Debug, Clone)]
struct Stamped<T> {
    value: T,
    stamp: DateTime<Utc>,
}

struct ServerState {
    now: DateTime<Utc>,
    todos: BTreeMap<String, Stamped<Todo>>,
    todo_tombstones: BTreeMap<String, DateTime<Utc>>,
    categories: BTreeMap<String, Category>,
    completions: BTreeMap<CompletionKey, Stamped<Completion>>,
    completion_tombstones: BTreeMap<CompletionKey, DateTime<Utc>>,
    offline: bool,
    scripted: HashMap<String, VecDeque<u16>>,
    calls: Vec<String>,
    writes: u64,
}

impl ServerState {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: start,
            todos: BTreeMap::new(),
            todo_tombstones: BTreeMap::new(),
            categories: BTreeMap::new(),
            completions: BTreeMap::new(),
            completion_tombstones: BTreeMap::new(),
            offline: false,
            scripted: HashMap::new(),
            calls: Vec::new(),
            writes: 0,
        }
    }

    /// Advances the server clock by one second and returns the new time.
    fn tick(&mut self) -> DateTime<Utc> {
        self.now += Duration::seconds(1);
        self.writes += 1;
        self.now
    }

    /// Logs the call and applies injected failures.
    fn enter(&mut self, call: String, key: &str) -> RemoteResult<()> {
        self.calls.push(call);
        if self.offline {
            return Err(RemoteError::Network("connection refused".into()));
        }
        match self.scripted.get_mut(key).and_then(VecDeque::pop_front) {
            Some(status) => Err(RemoteError::http(status, "scripted failure")),
            None => Ok(()),
        }
    }

    /// Todo deltas report RFC 3339 text, completion deltas epoch millis.
    fn sync_time(&self, millis: bool) -> Option<RemoteTime> {
        Some(if millis {
            RemoteTime::Millis(self.now.timestamp_millis())
        } else {
            RemoteTime::Text(SyncCursor::new(self.now).to_string())
        })
    }
}

/// A remote authority held in memory.
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    /// Creates an empty server whose clock starts at 2024-01-01.
    pub fn new() -> Self {
        Self::starting_at(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }

    /// Creates an empty server whose clock starts at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ServerState::new(start)),
        }
    }

    /// Returns the server clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    /// Takes the server off the network, or brings it back.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Makes the next call for `key` fail with `status`.
    ///
    /// `key` is an entity key (todo or category id, `todoId:date` for
    /// completions) or one of [`LIST_CATEGORIES`], [`TODO_DELTA`] and
    /// [`COMPLETION_DELTA`]. Scripted statuses queue up.
    pub fn fail_next(&self, key: impl Into<String>, status: u16) {
        self.state
            .lock()
            .scripted
            .entry(key.into())
            .or_default()
            .push_back(status);
    }

    /// Returns every call received, as `method:key` for writes and the
    /// method name for reads.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Returns how many write calls were received for `key`.
    pub fn calls_for(&self, key: &str) -> usize {
        let suffix = format!(":{key}");
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.ends_with(&suffix))
            .count()
    }

    /// Returns how many writes changed server state.
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    /// Returns a live todo.
    pub fn todo(&self, id: &str) -> Option<Todo> {
        self.state.lock().todos.get(id).map(|t| t.value.clone())
    }

    /// Returns live todos ordered by id.
    pub fn todos(&self) -> Vec<Todo> {
        self.state
            .lock()
            .todos
            .values()
            .map(|t| t.value.clone())
            .collect()
    }

    /// Returns live categories ordered by id.
    pub fn categories(&self) -> Vec<Category> {
        self.state.lock().categories.values().cloned().collect()
    }

    /// Returns live completions ordered by key.
    pub fn completions(&self) -> Vec<Completion> {
        self.state
            .lock()
            .completions
            .values()
            .map(|c| c.value.clone())
            .collect()
    }

    /// Writes a todo as another device would.
    pub fn put_todo(&self, mut todo: Todo) {
        let mut state = self.state.lock();
        let stamp = state.tick();
        todo.updated_at = stamp;
        state.todo_tombstones.remove(&todo.id);
        state.todos.insert(
            todo.id.clone(),
            Stamped {
                value: todo,
                stamp,
            },
        );
    }

    /// Deletes a todo as another device would.
    pub fn remove_todo(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        if state.todos.remove(id).is_none() {
            return false;
        }
        let stamp = state.tick();
        state.todo_tombstones.insert(id.to_string(), stamp);
        true
    }

    /// Writes a category as another device would.
    pub fn put_category(&self, mut category: Category) {
        let mut state = self.state.lock();
        category.updated_at = state.tick();
        category.deleted_at = None;
        state.categories.insert(category.id.clone(), category);
    }

    /// Deletes a category as another device would.
    pub fn remove_category(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.categories.remove(id).is_some();
        if removed {
            state.tick();
        }
        removed
    }

    /// Writes a completion as another device would.
    pub fn put_completion(&self, completion: Completion) {
        let mut state = self.state.lock();
        let stamp = state.tick();
        let key = completion.key();
        state.completion_tombstones.remove(&key);
        state.completions.insert(
            key,
            Stamped {
                value: completion,
                stamp,
            },
        );
    }

    /// Deletes a completion as another device would.
    pub fn remove_completion(&self, key: &CompletionKey) -> bool {
        let mut state = self.state.lock();
        if state.completions.remove(key).is_none() {
            return false;
        }
        let stamp = state.tick();
        state.completion_tombstones.insert(key.clone(), stamp);
        true
    }
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: &str, key: &str) -> RemoteError {
    RemoteError::http(404, format!("{kind} {key} not found"))
}

fn time(at: DateTime<Utc>) -> Option<RemoteTime> {
    Some(RemoteTime::Text(SyncCursor::new(at).to_string()))
}

fn date_text(date: chrono::NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn remote_todo(todo: &Todo) -> RemoteTodo {
    RemoteTodo {
        id: Some(todo.id.clone()),
        title: Some(todo.title.clone()),
        notes: todo.notes.clone(),
        category_id: todo.category_id.clone(),
        due_date: todo.due_date.map(date_text),
        recurrence: todo.recurrence.clone(),
        created_at: time(todo.created_at),
        updated_at: time(todo.updated_at),
    }
}

fn remote_category(category: &Category) -> RemoteCategory {
    RemoteCategory {
        id: Some(category.id.clone()),
        name: Some(category.name.clone()),
        color: category.color.clone(),
        sort_order: Some(category.sort_order),
        created_at: time(category.created_at),
        updated_at: time(category.updated_at),
    }
}

fn remote_completion(completion: &Completion) -> RemoteCompletion {
    RemoteCompletion {
        todo_id: Some(completion.todo_id.clone()),
        date: Some(date_text(completion.date)),
        completed_at: time(completion.completed_at),
        created_at: None,
    }
}

#[async_trait]
impl RemoteApi for FakeServer {
    async fn create_todo(&self, todo: &NewTodo) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.enter(format!("createTodo:{}", todo.id), &todo.id)?;
        let stamp = state.tick();
        // Redelivered creates overwrite: client ids make create idempotent.
        let created_at = state
            .todos
            .get(&todo.id)
            .map_or(stamp, |existing| existing.value.created_at);
        let mut value = todo.to_todo(stamp);
        value.created_at = created_at;
        state.todo_tombstones.remove(&todo.id);
        state
            .todos
            .insert(todo.id.clone(), Stamped { value, stamp });
        debug!(id = %todo.id, "server created todo");
        Ok(())
    }

    async fn update_todo(&self, patch: &TodoPatch) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.enter(format!("updateTodo:{}", patch.id), &patch.id)?;
        if !state.todos.contains_key(&patch.id) {
            return Err(not_found("todo", &patch.id));
        }
        let stamp = state.tick();
        if let Some(entry) = state.todos.get_mut(&patch.id) {
            patch.apply_to(&mut entry.value, stamp);
            entry.stamp = stamp;
        }
        Ok(())
    }

    async fn delete_todo(&self, id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.enter(format!("deleteTodo:{id}"), id)?;
        if state.todos.remove(id).is_none() {
            return Err(not_found("todo", id));
        }
        let stamp = state.tick();
        state.todo_tombstones.insert(id.to_string(), stamp);
        Ok(())
    }

    async fn create_category(&self, category: &NewCategory) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.enter(format!("createCategory:{}", category.id), &category.id)?;
        let stamp = state.tick();
        state
            .categories
            .insert(category.id.clone(), category.to_category(stamp));
        Ok(())
    }

    async fn update_category(&self, patch: &CategoryPatch) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.enter(format!("updateCategory:{}", patch.id), &patch.id)?;
        if !state.categories.contains_key(&patch.id) {
            return Err(not_found("category", &patch.id));
        }
        let stamp = state.tick();
        if let Some(category) = state.categories.get_mut(&patch.id) {
            patch.apply_to(category, stamp);
        }
        Ok(())
    }

    async fn delete_category(&self, id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.enter(format!("deleteCategory:{id}"), id)?;
        if state.categories.remove(id).is_none() {
            return Err(not_found("category", id));
        }
        state.tick();
        Ok(())
    }

    async fn create_completion(&self, completion: &NewCompletion) -> RemoteResult<()> {
        let key = completion.key();
        let key_text = key.to_string();
        let mut state = self.state.lock();
        state.enter(format!("createCompletion:{key_text}"), &key_text)?;
        let stamp = state.tick();
        state.completion_tombstones.remove(&key);
        state.completions.insert(
            key,
            Stamped {
                value: completion.to_completion(stamp),
                stamp,
            },
        );
        Ok(())
    }

    async fn delete_completion(&self, key: &CompletionKey) -> RemoteResult<()> {
        let key_text = key.to_string();
        let mut state = self.state.lock();
        state.enter(format!("deleteCompletion:{key_text}"), &key_text)?;
        if state.completions.remove(key).is_none() {
            return Err(not_found("completion", &key_text));
        }
        let stamp = state.tick();
        state.completion_tombstones.insert(key.clone(), stamp);
        Ok(())
    }

    async fn list_categories(&self) -> RemoteResult<Vec<RemoteCategory>> {
        let mut state = self.state.lock();
        state.enter(LIST_CATEGORIES.to_string(), LIST_CATEGORIES)?;
        Ok(state.categories.values().map(remote_category).collect())
    }

    async fn todo_delta(&self, since: &SyncCursor) -> RemoteResult<TodoDelta> {
        let mut state = self.state.lock();
        state.enter(TODO_DELTA.to_string(), TODO_DELTA)?;
        let since = since.as_datetime();
        let updated = state
            .todos
            .values()
            .filter(|t| t.stamp > since)
            .map(|t| remote_todo(&t.value))
            .collect();
        let deleted = state
            .todo_tombstones
            .iter()
            .filter(|(_, at)| **at > since)
            .map(|(id, _)| id.clone())
            .collect();
        Ok(DeltaEnvelope::new(updated, deleted, state.sync_time(false)))
    }

    async fn completion_delta(&self, since: &SyncCursor) -> RemoteResult<CompletionDelta> {
        let mut state = self.state.lock();
        state.enter(COMPLETION_DELTA.to_string(), COMPLETION_DELTA)?;
        let since = since.as_datetime();
        let updated = state
            .completions
            .values()
            .filter(|c| c.stamp > since)
            .map(|c| remote_completion(&c.value))
            .collect();
        let deleted = state
            .completion_tombstones
            .iter()
            .filter(|(_, at)| **at > since)
            .map(|(key, _)| RemoteCompletionKey {
                todo_id: Some(key.todo_id.clone()),
                date: Some(date_text(key.date)),
            })
            .collect();
        Ok(DeltaEnvelope::new(updated, deleted, state.sync_time(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[tokio::test]
    async fn delta_returns_changes_after_cursor() {
        let server = FakeServer::new();
        server.create_todo(&NewTodo::new("a", "first")).await.unwrap();
        let cursor = SyncCursor::new(server.now());
        server.create_todo(&NewTodo::new("b", "second")).await.unwrap();
        server.delete_todo("a").await.unwrap();

        let delta = server.todo_delta(&cursor).await.unwrap();
        let ids: Vec<_> = delta.updated.iter().filter_map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["b"]);
        assert_eq!(delta.deleted, vec!["a"]);
        assert_eq!(
            delta.sync_time,
            Some(RemoteTime::Text(SyncCursor::new(server.now()).to_string()))
        );
        let completions = server.completion_delta(&cursor).await.unwrap();
        assert_eq!(
            completions.sync_time.and_then(|t| t.to_datetime()),
            Some(server.now())
        );

        let empty = server
            .todo_delta(&SyncCursor::new(server.now()))
            .await
            .unwrap();
        assert!(empty.updated.is_empty());
        assert!(empty.deleted.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_404() {
        let server = FakeServer::new();
        let err = server
            .update_todo(&TodoPatch {
                id: "missing".into(),
                ..TodoPatch::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            server
                .delete_completion(&CompletionKey::new("t", day()))
                .await
                .unwrap_err()
                .status(),
            Some(404)
        );
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let server = FakeServer::new();
        let todo = NewTodo::new("a", "x");
        server.create_todo(&todo).await.unwrap();
        let created_at = server.todo("a").unwrap().created_at;
        server.create_todo(&todo).await.unwrap();

        assert_eq!(server.todos().len(), 1);
        assert_eq!(server.todo("a").unwrap().created_at, created_at);
        assert_eq!(server.calls_for("a"), 2);
    }

    #[tokio::test]
    async fn failure_injection() {
        let server = FakeServer::new();
        server.fail_next("a", 503);
        let err = server.create_todo(&NewTodo::new("a", "x")).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(server.create_todo(&NewTodo::new("a", "x")).await.is_ok());

        server.set_offline(true);
        assert!(matches!(
            server.delete_todo("a").await,
            Err(RemoteError::Network(_))
        ));
        assert!(matches!(
            server.list_categories().await,
            Err(RemoteError::Network(_))
        ));
        server.set_offline(false);
        server.delete_todo("a").await.unwrap();
        assert!(server.todo("a").is_none());
        assert_eq!(
            server.calls(),
            vec![
                "createTodo:a",
                "createTodo:a",
                "deleteTodo:a",
                "listCategories",
                "deleteTodo:a"
            ]
        );
    }

    #[tokio::test]
    async fn other_device_writes_show_up_in_deltas() {
        let server = FakeServer::new();
        let cursor = SyncCursor::new(server.now());
        server.put_completion(NewCompletion {
            todo_id: "t".into(),
            date: day(),
            completed_at: None,
        }
        .to_completion(server.now()));

        let delta = server.completion_delta(&cursor).await.unwrap();
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.updated[0].date.as_deref(), Some("2024-05-01"));

        let cursor = SyncCursor::new(server.now());
        assert!(server.remove_completion(&CompletionKey::new("t", day())));
        let delta = server.completion_delta(&cursor).await.unwrap();
        assert!(delta.updated.is_empty());
        assert_eq!(delta.deleted.len(), 1);
    }
}
