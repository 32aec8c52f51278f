//! The local durable store collaborator.

use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use tasksync_protocol::{
    Category, ChangeId, Completion, CompletionKey, Mutation, PendingChange, SyncCursor, Todo,
};

/// Retry bookkeeping written onto a pending change after a transient failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryUpdate {
    /// Message of the failure.
    pub last_error: String,
    /// Earliest next attempt.
    pub next_retry_at: DateTime<Utc>,
    /// Whether the failure consumes one retry.
    pub increment_retry_count: bool,
}

/// Local storage used by the outbox and the push and pull engines.
///
/// Implementations must make every mutating call durable before it returns,
/// so that a process killed at any point resumes from a consistent state.
/// Upserts overwrite by identity and deleting an absent entity is a no-op,
/// which makes replayed pulls and redelivered pushes harmless.
pub trait LocalStore: Send + Sync {
    /// Appends a ready change with a fresh id.
    fn enqueue(&self, mutation: Mutation, now: DateTime<Utc>) -> SyncResult<PendingChange>;

    /// Returns up to `limit` changes that may be attempted at `now`, in
    /// queue order.
    fn ready_pending_changes(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SyncResult<Vec<PendingChange>>;

    /// Returns every pending change, dead letters included, in queue order.
    fn all_pending(&self) -> SyncResult<Vec<PendingChange>>;

    /// Returns one pending change.
    fn pending_change(&self, id: ChangeId) -> SyncResult<Option<PendingChange>>;

    /// Removes changes. Unknown ids are ignored.
    fn remove_pending_changes(&self, ids: &[ChangeId]) -> SyncResult<()>;

    /// Marks a change as retrying.
    fn mark_pending_retry(&self, id: ChangeId, update: RetryUpdate) -> SyncResult<()>;

    /// Parks a change as a dead letter.
    fn mark_pending_dead_letter(&self, id: ChangeId, last_error: &str) -> SyncResult<()>;

    /// Returns dead-lettered changes in queue order.
    fn dead_letters(&self) -> SyncResult<Vec<PendingChange>>;

    /// Puts a dead letter back in the queue with a fresh retry budget.
    ///
    /// The change keeps its original position.
    fn requeue_dead_letter(&self, id: ChangeId) -> SyncResult<PendingChange>;

    /// Drops a pending change regardless of status.
    fn discard_pending(&self, id: ChangeId) -> SyncResult<PendingChange>;

    /// Inserts or replaces todos by id.
    fn upsert_todos(&self, todos: &[Todo]) -> SyncResult<()>;

    /// Deletes todos by id and returns how many existed.
    fn delete_todos(&self, ids: &[String]) -> SyncResult<usize>;

    /// Inserts or replaces categories by id.
    fn upsert_categories(&self, categories: &[Category]) -> SyncResult<()>;

    /// Soft-deletes active categories and returns how many changed.
    fn soft_delete_categories(&self, ids: &[String], at: DateTime<Utc>) -> SyncResult<usize>;

    /// Inserts or replaces completions by key.
    fn upsert_completions(&self, completions: &[Completion]) -> SyncResult<()>;

    /// Deletes completions by key and returns how many existed.
    fn delete_completions(&self, keys: &[CompletionKey]) -> SyncResult<usize>;

    /// Returns categories that are not soft-deleted.
    fn active_categories(&self) -> SyncResult<Vec<Category>>;

    /// Returns one todo.
    fn todo(&self, id: &str) -> SyncResult<Option<Todo>>;

    /// Returns all todos ordered by id.
    fn todos(&self) -> SyncResult<Vec<Todo>>;

    /// Returns one category, soft-deleted or not.
    fn category(&self, id: &str) -> SyncResult<Option<Category>>;

    /// Returns all categories ordered by id, soft-deleted included.
    fn categories(&self) -> SyncResult<Vec<Category>>;

    /// Returns all completions ordered by key.
    fn completions(&self) -> SyncResult<Vec<Completion>>;

    /// Returns the pull cursor.
    fn cursor(&self) -> SyncResult<Option<SyncCursor>>;

    /// Replaces the pull cursor. `None` forces the next pull to start over.
    fn set_cursor(&self, cursor: Option<SyncCursor>) -> SyncResult<()>;
}
