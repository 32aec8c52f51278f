//! The remote authority collaborator.

use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tasksync_protocol::{
    CategoryPatch, CompletionDelta, CompletionKey, Mutation, NewCategory, NewCompletion, NewTodo,
    RemoteCategory, SyncCursor, TodoDelta, TodoPatch,
};

/// Calls the engine makes against the remote authority.
///
/// Every method is a suspension point; nothing else in the engine awaits.
/// Implementations tag failures with the right [`RemoteError`] variant.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Creates a todo with a client-generated id.
    async fn create_todo(&self, todo: &NewTodo) -> RemoteResult<()>;

    /// Applies a partial update to a todo.
    async fn update_todo(&self, patch: &TodoPatch) -> RemoteResult<()>;

    /// Deletes a todo.
    async fn delete_todo(&self, id: &str) -> RemoteResult<()>;

    /// Creates a category.
    async fn create_category(&self, category: &NewCategory) -> RemoteResult<()>;

    /// Applies a partial update to a category.
    async fn update_category(&self, patch: &CategoryPatch) -> RemoteResult<()>;

    /// Deletes a category.
    async fn delete_category(&self, id: &str) -> RemoteResult<()>;

    /// Marks a todo done for a day.
    async fn create_completion(&self, completion: &NewCompletion) -> RemoteResult<()>;

    /// Unmarks a todo for a day.
    async fn delete_completion(&self, key: &CompletionKey) -> RemoteResult<()>;

    /// Returns the complete current category set.
    async fn list_categories(&self) -> RemoteResult<Vec<RemoteCategory>>;

    /// Returns todo changes since `since`.
    async fn todo_delta(&self, since: &SyncCursor) -> RemoteResult<TodoDelta>;

    /// Returns completion changes since `since`.
    async fn completion_delta(&self, since: &SyncCursor) -> RemoteResult<CompletionDelta>;
}

/// Sends one mutation to the remote.
///
/// Local preconditions are checked first and fail with
/// [`RemoteError::Precondition`] without any I/O.
pub async fn apply_mutation(remote: &dyn RemoteApi, mutation: &Mutation) -> RemoteResult<()> {
    mutation.validate()?;

    match mutation {
        Mutation::CreateTodo(todo) => remote.create_todo(todo).await,
        Mutation::UpdateTodo(patch) => remote.update_todo(patch).await,
        Mutation::DeleteTodo(target) => remote.delete_todo(&target.id).await,
        Mutation::CreateCategory(category) => remote.create_category(category).await,
        Mutation::UpdateCategory(patch) => remote.update_category(patch).await,
        Mutation::DeleteCategory(target) => remote.delete_category(&target.id).await,
        Mutation::CreateCompletion(completion) => remote.create_completion(completion).await,
        Mutation::DeleteCompletion(key) => remote.delete_completion(key).await,
    }
}

/// Pull calls a [`MockRemote`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullCall {
    /// [`RemoteApi::list_categories`].
    Categories,
    /// [`RemoteApi::todo_delta`].
    TodoDelta,
    /// [`RemoteApi::completion_delta`].
    CompletionDelta,
}

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    push_failures: HashMap<String, VecDeque<RemoteError>>,
    pull_failures: HashMap<PullCall, RemoteError>,
    categories: Vec<RemoteCategory>,
    todo_delta: Option<TodoDelta>,
    completion_delta: Option<CompletionDelta>,
    since: Vec<SyncCursor>,
    latency: Duration,
}

/// A scripted remote for unit tests.
///
/// Push calls succeed unless a failure was scripted for the entity key;
/// each scripted failure is consumed by one call. Pull calls return the
/// configured responses, or empty ones.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    /// Creates a remote that accepts everything and has nothing to pull.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next push call for `entity_key` fail with `error`.
    ///
    /// Calls queue up: scripting twice fails the next two calls.
    pub fn fail_next(&self, entity_key: impl Into<String>, error: RemoteError) {
        self.state
            .lock()
            .push_failures
            .entry(entity_key.into())
            .or_default()
            .push_back(error);
    }

    /// Makes every call of `call` fail with `error` until cleared.
    pub fn fail_pull(&self, call: PullCall, error: RemoteError) {
        self.state.lock().pull_failures.insert(call, error);
    }

    /// Clears pull failures.
    pub fn clear_pull_failures(&self) {
        self.state.lock().pull_failures.clear();
    }

    /// Sets the category listing.
    pub fn set_categories(&self, categories: Vec<RemoteCategory>) {
        self.state.lock().categories = categories;
    }

    /// Sets the todo delta response.
    pub fn set_todo_delta(&self, delta: TodoDelta) {
        self.state.lock().todo_delta = Some(delta);
    }

    /// Sets the completion delta response.
    pub fn set_completion_delta(&self, delta: CompletionDelta) {
        self.state.lock().completion_delta = Some(delta);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Returns the calls made so far, as `method:key`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Returns the cursors passed to delta calls.
    pub fn delta_cursors(&self) -> Vec<SyncCursor> {
        self.state.lock().since.clone()
    }

    async fn wait(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn push_call(&self, method: &str, key: &str) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("{method}:{key}"));
        match state
            .push_failures
            .get_mut(key)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn pull_call(&self, call: PullCall, method: &str) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(method.to_string());
        match state.pull_failures.get(&call) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn create_todo(&self, todo: &NewTodo) -> RemoteResult<()> {
        self.wait().await;
        self.push_call("createTodo", &todo.id)
    }

    async fn update_todo(&self, patch: &TodoPatch) -> RemoteResult<()> {
        self.wait().await;
        self.push_call("updateTodo", &patch.id)
    }

    async fn delete_todo(&self, id: &str) -> RemoteResult<()> {
        self.wait().await;
        self.push_call("deleteTodo", id)
    }

    async fn create_category(&self, category: &NewCategory) -> RemoteResult<()> {
        self.wait().await;
        self.push_call("createCategory", &category.id)
    }

    async fn update_category(&self, patch: &CategoryPatch) -> RemoteResult<()> {
        self.wait().await;
        self.push_call("updateCategory", &patch.id)
    }

    async fn delete_category(&self, id: &str) -> RemoteResult<()> {
        self.wait().await;
        self.push_call("deleteCategory", id)
    }

    async fn create_completion(&self, completion: &NewCompletion) -> RemoteResult<()> {
        self.wait().await;
        self.push_call("createCompletion", &completion.key().to_string())
    }

    async fn delete_completion(&self, key: &CompletionKey) -> RemoteResult<()> {
        self.wait().await;
        self.push_call("deleteCompletion", &key.to_string())
    }

    async fn list_categories(&self) -> RemoteResult<Vec<RemoteCategory>> {
        self.wait().await;
        self.pull_call(PullCall::Categories, "listCategories")?;
        Ok(self.state.lock().categories.clone())
    }

    async fn todo_delta(&self, since: &SyncCursor) -> RemoteResult<TodoDelta> {
        self.wait().await;
        self.pull_call(PullCall::TodoDelta, "todoDelta")?;
        let mut state = self.state.lock();
        state.since.push(*since);
        Ok(state
            .todo_delta
            .clone()
            .unwrap_or_else(|| TodoDelta::empty(None)))
    }

    async fn completion_delta(&self, since: &SyncCursor) -> RemoteResult<CompletionDelta> {
        self.wait().await;
        self.pull_call(PullCall::CompletionDelta, "completionDelta")?;
        let mut state = self.state.lock();
        state.since.push(*since);
        Ok(state
            .completion_delta
            .clone()
            .unwrap_or_else(|| CompletionDelta::empty(None)))
    }
}
