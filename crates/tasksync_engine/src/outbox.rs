//! The outbox: local writes plus the queue of changes awaiting the remote.

use crate::clock::Clock;
use crate::error::SyncResult;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tasksync_protocol::{ChangeId, Mutation, PendingChange};
use tracing::{info, warn};

/// Front door for local mutations.
///
/// [`Outbox::record`] is what a host calls when the user edits something:
/// the mutation is applied to local state and queued for the push engine.
#[derive(Clone)]
pub struct Outbox {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
}

impl Outbox {
    /// Creates an outbox over `store`.
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Applies `mutation` locally, then queues it.
    ///
    /// The local write lands first, so a crash in between leaves a local
    /// edit that is not yet queued rather than a queued edit with no local
    /// effect.
    pub fn record(&self, mutation: Mutation) -> SyncResult<PendingChange> {
        let now = self.clock.now();
        apply_local(self.store.as_ref(), &mutation, now)?;
        self.store.enqueue(mutation, now)
    }

    /// Queues `mutation` without touching local state.
    pub fn enqueue(&self, mutation: Mutation) -> SyncResult<PendingChange> {
        self.store.enqueue(mutation, self.clock.now())
    }

    /// Returns up to `limit` changes that may be attempted now.
    pub fn get_ready(&self, limit: usize) -> SyncResult<Vec<PendingChange>> {
        self.store.ready_pending_changes(self.clock.now(), limit)
    }

    /// Returns every queued change.
    pub fn pending(&self) -> SyncResult<Vec<PendingChange>> {
        self.store.all_pending()
    }

    /// Returns parked changes.
    pub fn dead_letters(&self) -> SyncResult<Vec<PendingChange>> {
        self.store.dead_letters()
    }

    /// Puts a dead letter back in the queue.
    pub fn requeue(&self, id: ChangeId) -> SyncResult<PendingChange> {
        let change = self.store.requeue_dead_letter(id)?;
        info!(change_id = id, entity_id = %change.entity_id, "dead letter requeued");
        Ok(change)
    }

    /// Drops a queued change.
    pub fn discard(&self, id: ChangeId) -> SyncResult<PendingChange> {
        let change = self.store.discard_pending(id)?;
        info!(change_id = id, entity_id = %change.entity_id, "pending change discarded");
        Ok(change)
    }
}

/// Applies a mutation to local entity state.
///
/// Updates to entities that do not exist locally are logged and ignored.
pub fn apply_local(
    store: &dyn LocalStore,
    mutation: &Mutation,
    now: DateTime<Utc>,
) -> SyncResult<()> {
    match mutation {
        Mutation::CreateTodo(new) => store.upsert_todos(&[new.to_todo(now)]),
        Mutation::UpdateTodo(patch) => match store.todo(&patch.id)? {
            Some(mut todo) => {
                patch.apply_to(&mut todo, now);
                store.upsert_todos(&[todo])
            }
            None => {
                warn!(entity_id = %patch.id, "update for unknown local todo");
                Ok(())
            }
        },
        Mutation::DeleteTodo(target) => store.delete_todos(&[target.id.clone()]).map(|_| ()),
        Mutation::CreateCategory(new) => store.upsert_categories(&[new.to_category(now)]),
        Mutation::UpdateCategory(patch) => match store.category(&patch.id)? {
            Some(mut category) => {
                patch.apply_to(&mut category, now);
                store.upsert_categories(&[category])
            }
            None => {
                warn!(entity_id = %patch.id, "update for unknown local category");
                Ok(())
            }
        },
        Mutation::DeleteCategory(target) => store
            .soft_delete_categories(&[target.id.clone()], now)
            .map(|_| ()),
        Mutation::CreateCompletion(new) => store.upsert_completions(&[new.to_completion(now)]),
        Mutation::DeleteCompletion(key) => store.delete_completions(&[key.clone()]).map(|_| ()),
    }
}
