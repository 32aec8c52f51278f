//! The push engine: drains the outbox against the remote.

use crate::classify::classify;
use crate::clock::Clock;
use crate::config::BackoffSchedule;
use crate::error::SyncResult;
use crate::remote::{apply_mutation, RemoteApi};
use crate::resolver::blocking_create;
use crate::retry::{decide, RetryAction};
use crate::store::{LocalStore, RetryUpdate};
use std::collections::HashSet;
use std::sync::Arc;
use tasksync_protocol::{MutationOp, PendingChange};
use tracing::{debug, info, warn};

/// Counts from one push run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushRunResult {
    /// Changes sent to the remote.
    pub processed: usize,
    /// Changes the remote accepted.
    pub succeeded: usize,
    /// Changes that failed, dead-lettered or not.
    pub failed: usize,
    /// Changes parked as dead letters.
    pub dead_letter: usize,
    /// Changes skipped behind an unresolved create.
    pub deferred: usize,
    /// Changes removed from the outbox, including success-equivalent failures.
    pub removed: usize,
    /// Changes that were ready at the start of the run.
    pub ready: usize,
    /// Whether the run stopped at a retryable failure.
    pub blocking_failure: bool,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

/// Drains ready outbox entries in queue order.
///
/// # Ordering
///
/// Changes are sent one at a time. A failure that will be retried stops the
/// run: nothing queued after it is attempted until it goes through, which
/// keeps the remote applying changes in the order they were made. Fatal and
/// success-equivalent failures do not stop the run.
pub struct PushEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<dyn Clock>,
    backoff: BackoffSchedule,
}

impl PushEngine {
    /// Creates a push engine.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
        backoff: BackoffSchedule,
    ) -> Self {
        Self {
            store,
            remote,
            clock,
            backoff,
        }
    }

    /// Processes up to `max_items` ready changes.
    ///
    /// Remote failures never escape; they are folded into the result. An
    /// error means the local store failed.
    pub async fn run(&self, max_items: usize) -> SyncResult<PushRunResult> {
        let ready = self
            .store
            .ready_pending_changes(self.clock.now(), max_items)?;
        let all_pending = self.store.all_pending()?;
        let mut resolved = HashSet::new();
        let mut result = PushRunResult {
            ready: ready.len(),
            ..PushRunResult::default()
        };

        for change in &ready {
            if let Some(blocker) = blocking_create(change, &all_pending, &resolved) {
                debug!(
                    change_id = change.id,
                    entity_id = %change.entity_id,
                    blocked_by = blocker.id,
                    "change deferred behind unresolved create"
                );
                result.deferred += 1;
                continue;
            }

            result.processed += 1;
            match apply_mutation(self.remote.as_ref(), &change.change).await {
                Ok(()) => {
                    self.store.remove_pending_changes(&[change.id])?;
                    mark_resolved(&mut resolved, change);
                    result.succeeded += 1;
                    result.removed += 1;
                    debug!(
                        change_id = change.id,
                        entity_id = %change.entity_id,
                        kind = change.change.type_name(),
                        "change pushed"
                    );
                }
                Err(err) => {
                    let classification = classify(&err, &change.change);
                    let decision = decide(
                        change.retry_count,
                        &classification,
                        self.clock.now(),
                        &self.backoff,
                    );

                    match decision.action {
                        RetryAction::Remove => {
                            self.store.remove_pending_changes(&[change.id])?;
                            mark_resolved(&mut resolved, change);
                            result.removed += 1;
                            info!(
                                change_id = change.id,
                                entity_id = %change.entity_id,
                                reason = decision.reason_code,
                                "failure already matches desired state, change removed"
                            );
                        }
                        RetryAction::Retry => {
                            let next_retry_at = decision
                                .next_retry_at
                                .unwrap_or_else(|| self.clock.now());
                            self.store.mark_pending_retry(
                                change.id,
                                RetryUpdate {
                                    last_error: classification.message.clone(),
                                    next_retry_at,
                                    increment_retry_count: true,
                                },
                            )?;
                            result.failed += 1;
                            result.blocking_failure = true;
                            result.last_error = Some(classification.message);
                            warn!(
                                change_id = change.id,
                                entity_id = %change.entity_id,
                                category = %classification.category,
                                retry_count = decision.next_retry_count,
                                %next_retry_at,
                                "push failed, retry scheduled; stopping run"
                            );
                            break;
                        }
                        RetryAction::DeadLetter => {
                            self.store
                                .mark_pending_dead_letter(change.id, &classification.message)?;
                            result.failed += 1;
                            result.dead_letter += 1;
                            result.last_error = Some(classification.message);
                            warn!(
                                change_id = change.id,
                                entity_id = %change.entity_id,
                                category = %classification.category,
                                reason = decision.reason_code,
                                "change dead-lettered"
                            );
                        }
                    }
                }
            }
        }

        info!(
            ready = result.ready,
            processed = result.processed,
            succeeded = result.succeeded,
            failed = result.failed,
            dead_letter = result.dead_letter,
            deferred = result.deferred,
            blocking = result.blocking_failure,
            "push run finished"
        );
        Ok(result)
    }
}

fn mark_resolved(resolved: &mut HashSet<u64>, change: &PendingChange) {
    if change.op() == MutationOp::Create {
        resolved.insert(change.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RemoteError;
    use crate::memory_store::MemoryStore;
    use crate::remote::MockRemote;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use tasksync_protocol::{
        ChangeStatus, CompletionKey, Mutation, NewTodo, TodoPatch, TodoRef,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        remote: Arc<MockRemote>,
        clock: Arc<ManualClock>,
        engine: PushEngine,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let clock = Arc::new(ManualClock::new(start()));
        let engine = PushEngine::new(
            store.clone(),
            remote.clone(),
            clock.clone(),
            BackoffSchedule::default(),
        );
        Fixture {
            store,
            remote,
            clock,
            engine,
        }
    }

    fn enqueue(f: &Fixture, mutation: Mutation) -> PendingChange {
        let change = f.store.enqueue(mutation, f.clock.now()).unwrap();
        f.clock.advance(std::time::Duration::from_millis(1));
        change
    }

    fn create(id: &str) -> Mutation {
        Mutation::CreateTodo(NewTodo::new(id, "x"))
    }

    fn update(id: &str) -> Mutation {
        Mutation::UpdateTodo(TodoPatch {
            id: id.into(),
            title: Some("y".into()),
            ..TodoPatch::default()
        })
    }

    #[tokio::test]
    async fn successful_changes_are_removed_in_order() {
        let f = fixture();
        enqueue(&f, create("a"));
        enqueue(&f, update("a"));
        enqueue(&f, Mutation::DeleteTodo(TodoRef { id: "a".into() }));

        let result = f.engine.run(50).await.unwrap();
        assert_eq!(result.ready, 3);
        assert_eq!(result.processed, 3);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.removed, 3);
        assert!(!result.blocking_failure);
        assert_eq!(
            f.remote.calls(),
            vec!["createTodo:a", "updateTodo:a", "deleteTodo:a"]
        );
        assert!(f.store.all_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_blocks_the_rest_of_the_run() {
        let f = fixture();
        let a = enqueue(&f, create("a"));
        let b = enqueue(&f, create("b"));
        let c = enqueue(&f, create("c"));
        f.remote.fail_next("b", RemoteError::Network("reset".into()));

        let result = f.engine.run(50).await.unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert!(result.blocking_failure);
        assert!(result.last_error.unwrap().contains("reset"));
        assert_eq!(f.remote.calls(), vec!["createTodo:a", "createTodo:b"]);

        assert!(f.store.pending_change(a.id).unwrap().is_none());
        let b = f.store.pending_change(b.id).unwrap().unwrap();
        assert_eq!(b.status, ChangeStatus::Retrying);
        assert_eq!(b.retry_count, 1);
        assert_eq!(b.next_retry_at, Some(f.clock.now() + Duration::seconds(30)));
        let c = f.store.pending_change(c.id).unwrap().unwrap();
        assert_eq!(c.status, ChangeStatus::Ready);
    }

    #[tokio::test]
    async fn dead_letter_does_not_block() {
        let f = fixture();
        let a = enqueue(&f, create("a"));
        enqueue(&f, create("b"));
        f.remote.fail_next("a", RemoteError::http(422, "bad title"));

        let result = f.engine.run(50).await.unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(result.dead_letter, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.succeeded, 1);
        assert!(!result.blocking_failure);

        let parked = f.store.pending_change(a.id).unwrap().unwrap();
        assert_eq!(parked.status, ChangeStatus::DeadLetter);
        assert_eq!(parked.last_error.as_deref(), Some("http 422: bad title"));
    }

    #[tokio::test]
    async fn update_behind_retrying_create_is_deferred() {
        let f = fixture();
        let create = enqueue(&f, create("a"));
        let update = enqueue(&f, update("a"));
        enqueue(&f, self::create("b"));

        // First run: the create fails transiently and blocks.
        f.remote.fail_next("a", RemoteError::Timeout);
        f.engine.run(50).await.unwrap();

        // Second run, before the create's backoff elapses: only the update
        // and b are ready; the update must wait.
        let result = f.engine.run(50).await.unwrap();
        assert_eq!(result.ready, 2);
        assert_eq!(result.deferred, 1);
        assert_eq!(result.succeeded, 1);
        assert!(!f.remote.calls().contains(&"updateTodo:a".to_string()));
        assert!(f.store.pending_change(update.id).unwrap().is_some());

        // After the backoff the create goes first and releases the update.
        f.clock.advance(std::time::Duration::from_secs(30));
        let result = f.engine.run(50).await.unwrap();
        assert_eq!(result.deferred, 0);
        assert_eq!(result.succeeded, 2);
        assert!(f.store.pending_change(create.id).unwrap().is_none());
        assert!(f.store.all_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_delete_404_is_removed_as_success() {
        let f = fixture();
        let key = CompletionKey::new("t1", NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        enqueue(&f, Mutation::DeleteCompletion(key.clone()));
        f.remote
            .fail_next(key.to_string(), RemoteError::http(404, "not found"));

        let result = f.engine.run(50).await.unwrap();
        assert_eq!(result.removed, 1);
        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 0);
        assert!(f.store.all_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fourth_transient_failure_dead_letters() {
        let f = fixture();
        let change = enqueue(&f, create("a"));
        for _ in 0..4 {
            f.remote.fail_next("a", RemoteError::http(503, "busy"));
        }

        for _ in 0..3 {
            let result = f.engine.run(50).await.unwrap();
            assert!(result.blocking_failure);
            f.clock.advance(std::time::Duration::from_secs(600));
        }
        let result = f.engine.run(50).await.unwrap();
        assert!(!result.blocking_failure);
        assert_eq!(result.dead_letter, 1);

        let parked = f.store.pending_change(change.id).unwrap().unwrap();
        assert_eq!(parked.status, ChangeStatus::DeadLetter);
        assert_eq!(parked.retry_count, 3);
    }

    #[tokio::test]
    async fn precondition_violation_is_dead_lettered_without_a_call() {
        let f = fixture();
        enqueue(&f, update(""));

        let result = f.engine.run(50).await.unwrap();
        assert_eq!(result.dead_letter, 1);
        assert!(f.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn batch_size_caps_the_run() {
        let f = fixture();
        for i in 0..5 {
            enqueue(&f, create(&format!("t{i}")));
        }
        let result = f.engine.run(2).await.unwrap();
        assert_eq!(result.ready, 2);
        assert_eq!(f.store.all_pending().unwrap().len(), 3);
    }
}
