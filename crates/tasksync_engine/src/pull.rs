//! The delta pull engine: remote changes into local state.

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteApi;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tasksync_protocol::{
    normalize_category, normalize_completion, normalize_completion_key, normalize_todo,
    RemoteTime, SyncCursor,
};
use tracing::{debug, info, warn};

/// Counts from the category step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPullStats {
    /// Categories received and upserted.
    pub pulled: usize,
    /// Local categories soft-deleted because the remote no longer has them.
    pub soft_deleted: usize,
    /// Records dropped for a missing identity.
    pub skipped: usize,
}

/// Counts from a delta step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPullStats {
    /// Records upserted.
    pub updated: usize,
    /// Local records removed.
    pub deleted: usize,
    /// Records or keys dropped as undecodable or for a missing or invalid identity.
    pub skipped: usize,
}

/// Outcome of one pull run.
///
/// Check `ok` before trusting `server_sync_time`. Counts from steps that
/// completed before a failure are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRunResult {
    /// Whether every step succeeded and the cursor advanced.
    pub ok: bool,
    /// Category step counts.
    pub categories: CategoryPullStats,
    /// Todo step counts.
    pub todos: DeltaPullStats,
    /// Completion step counts.
    pub completions: DeltaPullStats,
    /// The cursor stored by this run.
    pub server_sync_time: Option<SyncCursor>,
    /// Message of the failure that stopped the run.
    pub last_error: Option<String>,
}

/// Reconciles local state with the remote authority.
pub struct PullEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<dyn Clock>,
}

impl PullEngine {
    /// Creates a pull engine.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            remote,
            clock,
        }
    }

    /// Pulls everything that changed since `cursor`.
    ///
    /// Steps run in order: category snapshot, todo delta, completion delta,
    /// cursor advance. A failing step stops the run with `ok: false`; writes
    /// from earlier steps stay, the cursor does not move.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingCursor`] or [`SyncError::InvalidCursor`]
    /// before doing anything. Use [`SyncCursor::epoch`] for an initial pull.
    pub async fn run(&self, cursor: Option<&str>) -> SyncResult<PullRunResult> {
        let text = cursor.ok_or(SyncError::MissingCursor)?;
        let since = SyncCursor::parse(text).map_err(|_| SyncError::InvalidCursor {
            value: text.to_string(),
        })?;

        let mut result = PullRunResult::default();
        match self.run_steps(since, &mut result).await {
            Ok(cursor) => {
                result.ok = true;
                result.server_sync_time = Some(cursor);
                info!(
                    %since,
                    %cursor,
                    categories = result.categories.pulled,
                    todos = result.todos.updated,
                    completions = result.completions.updated,
                    "pull run finished"
                );
            }
            Err(err) => {
                warn!(%since, error = %err, "pull run failed, cursor not advanced");
                result.last_error = Some(err.to_string());
            }
        }
        Ok(result)
    }

    async fn run_steps(
        &self,
        since: SyncCursor,
        result: &mut PullRunResult,
    ) -> SyncResult<SyncCursor> {
        result.categories = self.pull_categories().await?;

        let todo_delta = self.remote.todo_delta(&since).await?;
        if todo_delta.malformed > 0 {
            warn!(count = todo_delta.malformed, "dropped undecodable todo delta entries");
        }
        result.todos.skipped += todo_delta.malformed;
        let now = self.clock.now();
        let mut todos = Vec::with_capacity(todo_delta.updated.len());
        for remote in &todo_delta.updated {
            match normalize_todo(remote, now) {
                Ok(todo) => todos.push(todo),
                Err(err) => {
                    warn!(error = %err, "skipping remote todo");
                    result.todos.skipped += 1;
                }
            }
        }
        self.store.upsert_todos(&todos)?;
        result.todos.updated = todos.len();
        result.todos.deleted = self.store.delete_todos(&todo_delta.deleted)?;
        debug!(
            updated = result.todos.updated,
            deleted = result.todos.deleted,
            "todo delta applied"
        );

        let completion_delta = self.remote.completion_delta(&since).await?;
        if completion_delta.malformed > 0 {
            warn!(
                count = completion_delta.malformed,
                "dropped undecodable completion delta entries"
            );
        }
        result.completions.skipped += completion_delta.malformed;
        let now = self.clock.now();
        let mut completions = Vec::with_capacity(completion_delta.updated.len());
        for remote in &completion_delta.updated {
            match normalize_completion(remote, now) {
                Ok(completion) => completions.push(completion),
                Err(err) => {
                    warn!(error = %err, "skipping remote completion");
                    result.completions.skipped += 1;
                }
            }
        }
        let mut keys = Vec::with_capacity(completion_delta.deleted.len());
        for remote in &completion_delta.deleted {
            match normalize_completion_key(remote) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    warn!(error = %err, "skipping deleted completion key");
                    result.completions.skipped += 1;
                }
            }
        }
        self.store.upsert_completions(&completions)?;
        result.completions.updated = completions.len();
        result.completions.deleted = self.store.delete_completions(&keys)?;
        debug!(
            updated = result.completions.updated,
            deleted = result.completions.deleted,
            "completion delta applied"
        );

        let reported = SyncCursor::latest_of([
            todo_delta.sync_time.as_ref().and_then(RemoteTime::to_datetime),
            completion_delta.sync_time.as_ref().and_then(RemoteTime::to_datetime),
        ]);
        let next = advance(since, reported, self.clock.now());
        self.store.set_cursor(Some(next))?;
        Ok(next)
    }

    async fn pull_categories(&self) -> SyncResult<CategoryPullStats> {
        let listed = self.remote.list_categories().await?;
        let now = self.clock.now();
        let mut stats = CategoryPullStats::default();

        let mut categories = Vec::with_capacity(listed.len());
        for remote in &listed {
            match normalize_category(remote, now) {
                Ok(category) => categories.push(category),
                Err(err) => {
                    warn!(error = %err, "skipping remote category");
                    stats.skipped += 1;
                }
            }
        }
        self.store.upsert_categories(&categories)?;
        stats.pulled = categories.len();

        let present: HashSet<&str> = categories.iter().map(|c| c.id.as_str()).collect();
        let missing: Vec<String> = self
            .store
            .active_categories()?
            .into_iter()
            .filter(|c| !present.contains(c.id.as_str()))
            .map(|c| c.id)
            .collect();
        stats.soft_deleted = self.store.soft_delete_categories(&missing, now)?;

        debug!(
            pulled = stats.pulled,
            soft_deleted = stats.soft_deleted,
            "category snapshot applied"
        );
        Ok(stats)
    }
}

/// Picks the cursor to store after a successful pull.
///
/// The latest reported server time wins, or `now` if the remote reported
/// none. The result is never earlier than `since`.
fn advance(since: SyncCursor, reported: Option<SyncCursor>, now: DateTime<Utc>) -> SyncCursor {
    let next = reported.unwrap_or_else(|| SyncCursor::new(now));
    next.max(since)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RemoteError;
    use crate::memory_store::MemoryStore;
    use crate::remote::{MockRemote, PullCall};
    use chrono::{NaiveDate, TimeZone};
    use tasksync_protocol::{
        CompletionDelta, DeltaEnvelope, NewCategory, NewTodo, RemoteCategory, RemoteCompletion,
        RemoteCompletionKey, RemoteTodo, TodoDelta,
    };

    const T0: &str = "2024-05-01T10:00:00.000Z";
    const T1: &str = "2024-05-01T11:00:00.000Z";
    const T2: &str = "2024-05-01T11:30:00.000Z";

    struct Fixture {
        store: Arc<MemoryStore>,
        remote: Arc<MockRemote>,
        clock: Arc<ManualClock>,
        engine: PullEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let engine = PullEngine::new(store.clone(), remote.clone(), clock.clone());
        Fixture {
            store,
            remote,
            clock,
            engine,
        }
    }

    fn remote_category(id: &str) -> RemoteCategory {
        RemoteCategory {
            id: Some(id.into()),
            name: Some(id.to_uppercase()),
            ..RemoteCategory::default()
        }
    }

    fn remote_todo(id: &str) -> RemoteTodo {
        RemoteTodo {
            id: Some(id.into()),
            title: Some("from server".into()),
            ..RemoteTodo::default()
        }
    }

    fn text(at: &str) -> Option<RemoteTime> {
        Some(RemoteTime::Text(at.into()))
    }

    fn key(todo_id: &str, date: &str) -> RemoteCompletionKey {
        RemoteCompletionKey {
            todo_id: Some(todo_id.into()),
            date: Some(date.into()),
        }
    }

    #[tokio::test]
    async fn cursor_is_required_and_must_parse() {
        let f = fixture();
        assert!(matches!(
            f.engine.run(None).await,
            Err(SyncError::MissingCursor)
        ));
        assert!(matches!(
            f.engine.run(Some("yesterday")).await,
            Err(SyncError::InvalidCursor { .. })
        ));
        assert!(f.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn cursor_advances_to_latest_sync_time() {
        let f = fixture();
        f.remote
            .set_todo_delta(TodoDelta::new(vec![remote_todo("t1")], vec![], text(T1)));
        f.remote
            .set_completion_delta(CompletionDelta::empty(text(T2)));

        let result = f.engine.run(Some(T0)).await.unwrap();
        assert!(result.ok);
        assert_eq!(result.todos.updated, 1);
        let expected = SyncCursor::parse(T2).unwrap();
        assert_eq!(result.server_sync_time, Some(expected));
        assert_eq!(f.store.cursor().unwrap(), Some(expected));
        assert_eq!(
            f.remote.calls(),
            vec!["listCategories", "todoDelta", "completionDelta"]
        );
        assert_eq!(
            f.remote.delta_cursors(),
            vec![SyncCursor::parse(T0).unwrap(); 2]
        );
    }

    #[tokio::test]
    async fn unparseable_sync_times_fall_back_to_now() {
        let f = fixture();
        f.remote
            .set_todo_delta(TodoDelta::empty(text("not a time")));

        let result = f.engine.run(Some(T0)).await.unwrap();
        assert_eq!(result.server_sync_time, Some(SyncCursor::new(f.clock.now())));
    }

    #[tokio::test]
    async fn epoch_millis_sync_time_advances_the_cursor() {
        let f = fixture();
        f.remote.set_todo_delta(TodoDelta::new(
            vec![remote_todo("t1")],
            vec![],
            Some(RemoteTime::Millis(1_714_561_200_000)),
        ));
        f.remote
            .set_completion_delta(CompletionDelta::empty(text(T0)));

        let result = f.engine.run(Some(T0)).await.unwrap();
        assert!(result.ok);
        assert!(f.store.todo("t1").unwrap().is_some());
        let expected = SyncCursor::parse(T1).unwrap();
        assert_eq!(result.server_sync_time, Some(expected));
        assert_eq!(f.store.cursor().unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn undecodable_entries_count_as_skipped() {
        let f = fixture();
        let mut todos = TodoDelta::new(vec![remote_todo("t1")], vec![], text(T1));
        todos.malformed = 2;
        f.remote.set_todo_delta(todos);
        let mut completions = CompletionDelta::empty(None);
        completions.malformed = 1;
        f.remote.set_completion_delta(completions);

        let result = f.engine.run(Some(T0)).await.unwrap();
        assert!(result.ok);
        assert_eq!(result.todos.updated, 1);
        assert_eq!(result.todos.skipped, 2);
        assert_eq!(result.completions.skipped, 1);
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let f = fixture();
        f.remote.set_todo_delta(TodoDelta::empty(text(T0)));

        let result = f.engine.run(Some(T1)).await.unwrap();
        assert_eq!(result.server_sync_time, Some(SyncCursor::parse(T1).unwrap()));
    }

    #[tokio::test]
    async fn failed_step_keeps_earlier_writes_but_not_the_cursor() {
        let f = fixture();
        f.remote.set_categories(vec![remote_category("c1")]);
        f.remote
            .fail_pull(PullCall::CompletionDelta, RemoteError::Timeout);
        f.remote
            .set_todo_delta(TodoDelta::new(vec![remote_todo("t1")], vec![], text(T1)));

        let result = f.engine.run(Some(T0)).await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.last_error.as_deref(), Some("remote error: request timed out"));
        assert_eq!(result.server_sync_time, None);
        assert_eq!(result.categories.pulled, 1);
        assert!(f.store.category("c1").unwrap().is_some());
        assert!(f.store.todo("t1").unwrap().is_some());
        assert_eq!(f.store.cursor().unwrap(), None);
    }

    #[tokio::test]
    async fn category_missing_remotely_is_soft_deleted_once() {
        let f = fixture();
        for id in ["c1", "c2"] {
            f.store
                .upsert_categories(&[NewCategory {
                    id: id.into(),
                    name: id.into(),
                    color: None,
                    sort_order: 0,
                }
                .to_category(f.clock.now())])
                .unwrap();
        }
        f.remote.set_categories(vec![remote_category("c1")]);

        let first = f.engine.run(Some(T0)).await.unwrap();
        assert_eq!(first.categories.soft_deleted, 1);
        let deleted_at = f.store.category("c2").unwrap().unwrap().deleted_at;
        assert!(deleted_at.is_some());

        f.clock.advance(std::time::Duration::from_secs(60));
        let second = f.engine.run(Some(T0)).await.unwrap();
        assert_eq!(second.categories.soft_deleted, 0);
        assert_eq!(f.store.category("c2").unwrap().unwrap().deleted_at, deleted_at);
        assert!(f.store.category("c1").unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn deletions_are_deduplicated() {
        let f = fixture();
        let now = f.clock.now();
        f.store
            .upsert_todos(&[NewTodo::new("t1", "x").to_todo(now)])
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        f.store
            .upsert_completions(&[tasksync_protocol::NewCompletion {
                todo_id: "t1".into(),
                date: day,
                completed_at: None,
            }
            .to_completion(now)])
            .unwrap();

        f.remote.set_todo_delta(TodoDelta::new(
            vec![],
            vec!["t1".into(), "t1".into(), "gone".into()],
            text(T1),
        ));
        f.remote.set_completion_delta(DeltaEnvelope::new(
            vec![],
            vec![key("t1", "2024-05-01"), key("t1", "2024-05-01")],
            None,
        ));

        let first = f.engine.run(Some(T0)).await.unwrap();
        assert_eq!(first.todos.deleted, 1);
        assert_eq!(first.completions.deleted, 1);

        let cursor = first.server_sync_time.unwrap().to_string();
        let second = f.engine.run(Some(&cursor)).await.unwrap();
        assert!(second.ok);
        assert_eq!(second.todos.deleted, 0);
        assert_eq!(second.completions.deleted, 0);
    }

    #[tokio::test]
    async fn records_without_identity_are_skipped() {
        let f = fixture();
        f.remote.set_categories(vec![RemoteCategory::default()]);
        f.remote.set_todo_delta(TodoDelta::new(
            vec![remote_todo("t1"), RemoteTodo::default()],
            vec![],
            None,
        ));
        f.remote.set_completion_delta(DeltaEnvelope::new(
            vec![RemoteCompletion {
                todo_id: Some("t1".into()),
                date: Some("someday".into()),
                ..RemoteCompletion::default()
            }],
            vec![key("", "2024-05-01")],
            None,
        ));

        let result = f.engine.run(Some(T0)).await.unwrap();
        assert!(result.ok);
        assert_eq!(result.categories.skipped, 1);
        assert_eq!(result.todos.updated, 1);
        assert_eq!(result.todos.skipped, 1);
        assert_eq!(result.completions.skipped, 2);
    }

    #[test]
    fn advance_prefers_reported_time() {
        let since = SyncCursor::parse(T0).unwrap();
        let reported = SyncCursor::parse(T2).ok();
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(advance(since, reported, now), SyncCursor::parse(T2).unwrap());
        assert_eq!(advance(since, None, now), SyncCursor::new(now));
    }
}
