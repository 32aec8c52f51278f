//! In-memory store state and the record log that makes it durable.
//!
//! Every mutating [`LocalStore`] call is reduced to one [`StoreRecord`],
//! handed to a [`RecordLog`] and only then applied to the in-memory state.
//! [`MemoryStore`] uses a log that discards records; the journal-backed
//! store writes them to disk and rebuilds the state by replaying them.

use crate::error::{SyncError, SyncResult};
use crate::store::{LocalStore, RetryUpdate};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tasksync_protocol::{
    Category, ChangeId, ChangeStatus, Completion, CompletionKey, Mutation, PendingChange,
    SyncCursor, Todo,
};
use tracing::debug;

/// One durable state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreRecord {
    /// Inserts or replaces a pending change.
    PutPending {
        /// The change as it must be stored.
        change: PendingChange,
    },
    /// Removes pending changes.
    RemovePending {
        /// Removed ids.
        ids: Vec<ChangeId>,
    },
    /// Inserts or replaces todos.
    UpsertTodos {
        /// The todos.
        todos: Vec<Todo>,
    },
    /// Deletes todos.
    DeleteTodos {
        /// Deleted ids.
        ids: Vec<String>,
    },
    /// Inserts or replaces categories.
    UpsertCategories {
        /// The categories.
        categories: Vec<Category>,
    },
    /// Soft-deletes categories.
    SoftDeleteCategories {
        /// Affected ids.
        ids: Vec<String>,
        /// Deletion time.
        at: DateTime<Utc>,
    },
    /// Inserts or replaces completions.
    UpsertCompletions {
        /// The completions.
        completions: Vec<Completion>,
    },
    /// Deletes completions.
    DeleteCompletions {
        /// Deleted keys.
        keys: Vec<CompletionKey>,
    },
    /// Replaces the pull cursor.
    SetCursor {
        /// New cursor.
        cursor: Option<SyncCursor>,
    },
    /// Replaces the whole state.
    Snapshot(StoreSnapshot),
}

/// Full store contents, as written by compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Next id handed out by enqueue.
    pub next_change_id: ChangeId,
    /// Pending changes in id order.
    pub pending: Vec<PendingChange>,
    /// Todos in id order.
    pub todos: Vec<Todo>,
    /// Categories in id order.
    pub categories: Vec<Category>,
    /// Completions in key order.
    pub completions: Vec<Completion>,
    /// Pull cursor.
    #[serde(default)]
    pub cursor: Option<SyncCursor>,
}

/// Destination of store records.
pub trait RecordLog: Send + Sync {
    /// Persists `record`. The state is only updated if this succeeds.
    fn append(&self, record: &StoreRecord) -> SyncResult<()>;
}

/// A log that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLog;

impl RecordLog for NoLog {
    fn append(&self, _record: &StoreRecord) -> SyncResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    next_change_id: ChangeId,
    pending: BTreeMap<ChangeId, PendingChange>,
    todos: BTreeMap<String, Todo>,
    categories: BTreeMap<String, Category>,
    completions: BTreeMap<CompletionKey, Completion>,
    cursor: Option<SyncCursor>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            next_change_id: 1,
            pending: BTreeMap::new(),
            todos: BTreeMap::new(),
            categories: BTreeMap::new(),
            completions: BTreeMap::new(),
            cursor: None,
        }
    }
}

impl StoreState {
    pub(crate) fn apply(&mut self, record: StoreRecord) {
        match record {
            StoreRecord::PutPending { change } => {
                self.next_change_id = self.next_change_id.max(change.id.saturating_add(1));
                self.pending.insert(change.id, change);
            }
            StoreRecord::RemovePending { ids } => {
                for id in ids {
                    self.pending.remove(&id);
                }
            }
            StoreRecord::UpsertTodos { todos } => {
                for todo in todos {
                    self.todos.insert(todo.id.clone(), todo);
                }
            }
            StoreRecord::DeleteTodos { ids } => {
                for id in ids {
                    self.todos.remove(&id);
                }
            }
            StoreRecord::UpsertCategories { categories } => {
                for category in categories {
                    self.categories.insert(category.id.clone(), category);
                }
            }
            StoreRecord::SoftDeleteCategories { ids, at } => {
                for id in ids {
                    if let Some(category) = self.categories.get_mut(&id) {
                        if category.deleted_at.is_none() {
                            category.deleted_at = Some(at);
                        }
                    }
                }
            }
            StoreRecord::UpsertCompletions { completions } => {
                for completion in completions {
                    self.completions.insert(completion.key(), completion);
                }
            }
            StoreRecord::DeleteCompletions { keys } => {
                for key in keys {
                    self.completions.remove(&key);
                }
            }
            StoreRecord::SetCursor { cursor } => self.cursor = cursor,
            StoreRecord::Snapshot(snapshot) => *self = Self::from_snapshot(snapshot),
        }
    }

    pub(crate) fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            next_change_id: self.next_change_id,
            pending: self.pending.values().cloned().collect(),
            todos: self.todos.values().cloned().collect(),
            categories: self.categories.values().cloned().collect(),
            completions: self.completions.values().cloned().collect(),
            cursor: self.cursor,
        }
    }

    fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut state = Self {
            next_change_id: snapshot.next_change_id.max(1),
            cursor: snapshot.cursor,
            ..Self::default()
        };
        for change in snapshot.pending {
            state.apply(StoreRecord::PutPending { change });
        }
        state.apply(StoreRecord::UpsertTodos {
            todos: snapshot.todos,
        });
        state.apply(StoreRecord::UpsertCategories {
            categories: snapshot.categories,
        });
        state.apply(StoreRecord::UpsertCompletions {
            completions: snapshot.completions,
        });
        state
    }

    fn sorted_pending(&self, filter: impl Fn(&PendingChange) -> bool) -> Vec<PendingChange> {
        let mut changes: Vec<_> = self
            .pending
            .values()
            .filter(|c| filter(c))
            .cloned()
            .collect();
        changes.sort_by(|a, b| a.queue_order(b));
        changes
    }

    fn existing_pending(&self, id: ChangeId) -> SyncResult<PendingChange> {
        self.pending
            .get(&id)
            .cloned()
            .ok_or(SyncError::UnknownChange(id))
    }
}

/// A [`LocalStore`] whose state lives in memory and whose transitions go
/// through a [`RecordLog`].
pub struct StateStore<L: RecordLog> {
    state: RwLock<StoreState>,
    log: L,
}

/// A volatile store.
pub type MemoryStore = StateStore<NoLog>;

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::from_parts(StoreState::default(), NoLog)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RecordLog> StateStore<L> {
    pub(crate) fn from_parts(state: StoreState, log: L) -> Self {
        Self {
            state: RwLock::new(state),
            log,
        }
    }

    /// Returns the full store contents.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.read().snapshot()
    }

    pub(crate) fn log(&self) -> &L {
        &self.log
    }

    /// Runs `f` with the state write-locked, so no transition interleaves.
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        f(&mut self.state.write())
    }

    fn commit(&self, state: &mut StoreState, record: StoreRecord) -> SyncResult<()> {
        self.log.append(&record)?;
        state.apply(record);
        Ok(())
    }

    fn put_pending(
        &self,
        id: ChangeId,
        update: impl FnOnce(&mut PendingChange),
    ) -> SyncResult<PendingChange> {
        let mut state = self.state.write();
        let mut change = state.existing_pending(id)?;
        update(&mut change);
        self.commit(
            &mut state,
            StoreRecord::PutPending {
                change: change.clone(),
            },
        )?;
        Ok(change)
    }
}

impl<L: RecordLog> LocalStore for StateStore<L> {
    fn enqueue(&self, mutation: Mutation, now: DateTime<Utc>) -> SyncResult<PendingChange> {
        let mut state = self.state.write();
        let change = PendingChange::new(state.next_change_id, mutation, now);
        self.commit(
            &mut state,
            StoreRecord::PutPending {
                change: change.clone(),
            },
        )?;
        debug!(
            change_id = change.id,
            entity_id = %change.entity_id,
            kind = change.change.type_name(),
            "change enqueued"
        );
        Ok(change)
    }

    fn ready_pending_changes(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SyncResult<Vec<PendingChange>> {
        let state = self.state.read();
        let mut ready = state.sorted_pending(|c| c.is_ready(now));
        ready.truncate(limit);
        Ok(ready)
    }

    fn all_pending(&self) -> SyncResult<Vec<PendingChange>> {
        Ok(self.state.read().sorted_pending(|_| true))
    }

    fn pending_change(&self, id: ChangeId) -> SyncResult<Option<PendingChange>> {
        Ok(self.state.read().pending.get(&id).cloned())
    }

    fn remove_pending_changes(&self, ids: &[ChangeId]) -> SyncResult<()> {
        let mut state = self.state.write();
        let ids: Vec<_> = ids
            .iter()
            .copied()
            .filter(|id| state.pending.contains_key(id))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.commit(&mut state, StoreRecord::RemovePending { ids })
    }

    fn mark_pending_retry(&self, id: ChangeId, update: RetryUpdate) -> SyncResult<()> {
        self.put_pending(id, |change| {
            change.status = ChangeStatus::Retrying;
            change.next_retry_at = Some(update.next_retry_at);
            change.last_error = Some(update.last_error);
            if update.increment_retry_count {
                change.retry_count = change.retry_count.saturating_add(1);
            }
        })
        .map(|_| ())
    }

    fn mark_pending_dead_letter(&self, id: ChangeId, last_error: &str) -> SyncResult<()> {
        self.put_pending(id, |change| {
            change.status = ChangeStatus::DeadLetter;
            change.next_retry_at = None;
            change.last_error = Some(last_error.to_string());
        })
        .map(|_| ())
    }

    fn dead_letters(&self) -> SyncResult<Vec<PendingChange>> {
        Ok(self
            .state
            .read()
            .sorted_pending(|c| c.status == ChangeStatus::DeadLetter))
    }

    fn requeue_dead_letter(&self, id: ChangeId) -> SyncResult<PendingChange> {
        let current = self
            .pending_change(id)?
            .ok_or(SyncError::UnknownChange(id))?;
        if current.status != ChangeStatus::DeadLetter {
            return Err(SyncError::NotDeadLettered(id));
        }
        self.put_pending(id, |change| {
            change.status = ChangeStatus::Ready;
            change.retry_count = 0;
            change.next_retry_at = None;
            change.last_error = None;
        })
    }

    fn discard_pending(&self, id: ChangeId) -> SyncResult<PendingChange> {
        let mut state = self.state.write();
        let change = state.existing_pending(id)?;
        self.commit(&mut state, StoreRecord::RemovePending { ids: vec![id] })?;
        Ok(change)
    }

    fn upsert_todos(&self, todos: &[Todo]) -> SyncResult<()> {
        if todos.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        self.commit(
            &mut state,
            StoreRecord::UpsertTodos {
                todos: todos.to_vec(),
            },
        )
    }

    fn delete_todos(&self, ids: &[String]) -> SyncResult<usize> {
        let mut state = self.state.write();
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| state.todos.contains_key(*id) && seen.insert(id.as_str()))
            .cloned()
            .collect();
        let count = ids.len();
        if count > 0 {
            self.commit(&mut state, StoreRecord::DeleteTodos { ids })?;
        }
        Ok(count)
    }

    fn upsert_categories(&self, categories: &[Category]) -> SyncResult<()> {
        if categories.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        self.commit(
            &mut state,
            StoreRecord::UpsertCategories {
                categories: categories.to_vec(),
            },
        )
    }

    fn soft_delete_categories(&self, ids: &[String], at: DateTime<Utc>) -> SyncResult<usize> {
        let mut state = self.state.write();
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| {
                state.categories.get(*id).is_some_and(Category::is_active)
                    && seen.insert(id.as_str())
            })
            .cloned()
            .collect();
        let count = ids.len();
        if count > 0 {
            self.commit(&mut state, StoreRecord::SoftDeleteCategories { ids, at })?;
        }
        Ok(count)
    }

    fn upsert_completions(&self, completions: &[Completion]) -> SyncResult<()> {
        if completions.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        self.commit(
            &mut state,
            StoreRecord::UpsertCompletions {
                completions: completions.to_vec(),
            },
        )
    }

    fn delete_completions(&self, keys: &[CompletionKey]) -> SyncResult<usize> {
        let mut state = self.state.write();
        let mut seen = HashSet::new();
        let keys: Vec<CompletionKey> = keys
            .iter()
            .filter(|key| state.completions.contains_key(*key) && seen.insert(*key))
            .cloned()
            .collect();
        let count = keys.len();
        if count > 0 {
            self.commit(&mut state, StoreRecord::DeleteCompletions { keys })?;
        }
        Ok(count)
    }

    fn active_categories(&self) -> SyncResult<Vec<Category>> {
        Ok(self
            .state
            .read()
            .categories
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect())
    }

    fn todo(&self, id: &str) -> SyncResult<Option<Todo>> {
        Ok(self.state.read().todos.get(id).cloned())
    }

    fn todos(&self) -> SyncResult<Vec<Todo>> {
        Ok(self.state.read().todos.values().cloned().collect())
    }

    fn category(&self, id: &str) -> SyncResult<Option<Category>> {
        Ok(self.state.read().categories.get(id).cloned())
    }

    fn categories(&self) -> SyncResult<Vec<Category>> {
        Ok(self.state.read().categories.values().cloned().collect())
    }

    fn completions(&self) -> SyncResult<Vec<Completion>> {
        Ok(self.state.read().completions.values().cloned().collect())
    }

    fn cursor(&self) -> SyncResult<Option<SyncCursor>> {
        Ok(self.state.read().cursor)
    }

    fn set_cursor(&self, cursor: Option<SyncCursor>) -> SyncResult<()> {
        let mut state = self.state.write();
        if state.cursor == cursor {
            return Ok(());
        }
        self.commit(&mut state, StoreRecord::SetCursor { cursor })
    }
}
