//! The sync coordinator: single-flight, debounced push-then-pull cycles.

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::outbox::Outbox;
use crate::pull::PullEngine;
use crate::push::PushEngine;
use crate::remote::RemoteApi;
use crate::state::{SyncCycleReport, SyncState, SyncStats, SyncTrigger};
use crate::store::LocalStore;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tasksync_protocol::{Mutation, PendingChange, SyncCursor};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Orchestrates push and pull runs for one local store.
///
/// At most one cycle runs at a time; a request that arrives while a cycle
/// is active is dropped, not queued. Triggers are coalesced: each one
/// restarts the debounce window and a single cycle runs when it elapses.
/// A cycle already in flight is never cancelled by a later trigger.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    outbox: Outbox,
    push: PushEngine,
    pull: PullEngine,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    online: AtomicBool,
    generation: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

/// Clears the single-flight flag when the cycle ends, however it ends.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl SyncCoordinator {
    /// Creates a coordinator. It starts online and idle.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let push = PushEngine::new(
            store.clone(),
            remote.clone(),
            clock.clone(),
            config.backoff.clone(),
        );
        let pull = PullEngine::new(store.clone(), remote, clock.clone());
        let outbox = Outbox::new(store.clone(), clock.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                outbox,
                push,
                pull,
                clock,
                running: AtomicBool::new(false),
                online: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                timer: Mutex::new(None),
                state: RwLock::new(SyncState::Idle),
                stats: RwLock::new(SyncStats::default()),
            }),
        }
    }

    /// Returns the outbox over the coordinator's store.
    pub fn outbox(&self) -> &Outbox {
        &self.inner.outbox
    }

    /// Records a local mutation and schedules a cycle.
    pub fn record(&self, mutation: Mutation) -> SyncResult<PendingChange> {
        let change = self.inner.outbox.record(mutation)?;
        self.trigger(SyncTrigger::LocalChange);
        Ok(change)
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.read()
    }

    /// Returns running totals.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns true while a cycle is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Returns the last known connectivity.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Updates connectivity. Coming back online triggers a cycle.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::AcqRel);
        if online && !was_online {
            info!("connectivity restored");
            self.trigger(SyncTrigger::Reconnect);
        } else if !online && was_online {
            info!("connectivity lost, sync paused");
        }
    }

    /// Schedules a debounced cycle.
    ///
    /// Must be called from within a Tokio runtime; outside one the trigger
    /// is dropped with a warning.
    pub fn trigger(&self, trigger: SyncTrigger) {
        if !self.is_online() {
            debug!(%trigger, "offline, trigger ignored");
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(%trigger, "no async runtime, trigger ignored");
                return;
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let inner = Arc::clone(&self.inner);
        let debounce = inner.config.debounce;
        let task = runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if inner.generation.load(Ordering::Acquire) != generation {
                return;
            }
            if let Err(err) = inner.run_cycle(trigger).await {
                error!(
                    %trigger,
                    error = %err,
                    retryable = err.is_retryable(),
                    "sync cycle failed"
                );
            }
        });

        if self.inner.timer.lock().replace(task).is_some() {
            debug!(%trigger, "trigger coalesced into pending cycle");
        }
    }

    /// Runs a cycle immediately, skipping the debounce window.
    ///
    /// Returns `Ok(None)` if offline or if another cycle is running.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local store fails.
    pub async fn run_now(&self, trigger: SyncTrigger) -> SyncResult<Option<SyncCycleReport>> {
        self.inner.run_cycle(trigger).await
    }

    /// Waits for the scheduled cycle, if any, to finish.
    pub async fn settle(&self) {
        loop {
            let task = self.inner.timer.lock().take();
            match task {
                Some(task) => {
                    if let Err(err) = task.await {
                        error!(error = %err, "sync task panicked");
                    }
                }
                None => break,
            }
        }
    }
}

impl Inner {
    async fn run_cycle(&self, trigger: SyncTrigger) -> SyncResult<Option<SyncCycleReport>> {
        if !self.online.load(Ordering::Acquire) {
            debug!(%trigger, "offline, cycle skipped");
            return Ok(None);
        }
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!(%trigger, "cycle already running, request dropped");
            self.stats.write().rejected_runs += 1;
            return Ok(None);
        };

        let started = Instant::now();
        info!(%trigger, "sync cycle started");
        match self.cycle(trigger, started).await {
            Ok(report) => Ok(Some(report)),
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    fn record_failure(&self, err: &SyncError) {
        *self.state.write() = SyncState::Error;
        let mut stats = self.stats.write();
        stats.last_error = Some(err.to_string());
        stats.last_error_retryable = err.is_retryable();
    }

    async fn cycle(&self, trigger: SyncTrigger, started: Instant) -> SyncResult<SyncCycleReport> {
        *self.state.write() = SyncState::Pushing;
        let push = self.push.run(self.config.push_batch_size).await?;

        let pull = if self.config.pull_enabled {
            *self.state.write() = SyncState::Pulling;
            let since = self.store.cursor()?.unwrap_or_else(SyncCursor::epoch);
            Some(self.pull.run(Some(&since.to_string())).await?)
        } else {
            None
        };

        let pull_ok = pull.as_ref().map_or(true, |pull| pull.ok);
        let success = !push.blocking_failure && pull_ok;
        let report = SyncCycleReport {
            trigger,
            push,
            pull,
            success,
            duration: started.elapsed(),
        };

        *self.state.write() = if success {
            SyncState::Synced
        } else {
            SyncState::Error
        };
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.changes_pushed += report.push.succeeded as u64;
            stats.dead_lettered += report.push.dead_letter as u64;
            stats.records_pulled += report.pulled();
            stats.last_error_retryable = false;
            if success {
                stats.last_success = Some(self.clock.now());
                stats.last_error = None;
            } else {
                stats.last_error = report
                    .pull
                    .as_ref()
                    .and_then(|pull| pull.last_error.clone())
                    .or_else(|| report.push.last_error.clone());
            }
        }

        info!(
            %trigger,
            success,
            pushed = report.push.succeeded,
            pulled = report.pulled(),
            elapsed_ms = report.duration.as_millis() as u64,
            "sync cycle finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RemoteError;
    use crate::memory_store::MemoryStore;
    use crate::remote::{MockRemote, PullCall};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tasksync_protocol::{NewTodo, RemoteTime, TodoDelta};

    fn coordinator(config: SyncConfig) -> (SyncCoordinator, Arc<MemoryStore>, Arc<MockRemote>) {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let coordinator = SyncCoordinator::new(store.clone(), remote.clone(), clock, config);
        (coordinator, store, remote)
    }

    fn pulls(remote: &MockRemote) -> usize {
        remote
            .calls()
            .iter()
            .filter(|call| *call == "listCategories")
            .count()
    }

    #[tokio::test]
    async fn cycle_pushes_then_pulls_from_epoch() {
        let (coordinator, store, remote) = coordinator(SyncConfig::default());
        coordinator
            .outbox()
            .record(Mutation::CreateTodo(NewTodo::new("t1", "x")))
            .unwrap();
        remote.set_todo_delta(TodoDelta::empty(Some(RemoteTime::Text(
            "2024-05-01T11:00:00.000Z".into(),
        ))));

        let report = coordinator
            .run_now(SyncTrigger::Manual)
            .await
            .unwrap()
            .unwrap();
        assert!(report.success);
        assert_eq!(report.push.succeeded, 1);
        assert_eq!(
            remote.calls(),
            vec!["createTodo:t1", "listCategories", "todoDelta", "completionDelta"]
        );
        assert_eq!(remote.delta_cursors()[0], SyncCursor::epoch());
        assert_eq!(
            store.cursor().unwrap().map(|c| c.to_string()).as_deref(),
            Some("2024-05-01T11:00:00.000Z")
        );
        assert_eq!(coordinator.state(), SyncState::Synced);
        assert_eq!(coordinator.stats().changes_pushed, 1);
    }

    #[tokio::test]
    async fn failed_pull_reports_error_state() {
        let (coordinator, _, remote) = coordinator(SyncConfig::default());
        remote.fail_pull(PullCall::Categories, RemoteError::http(503, "busy"));

        let report = coordinator
            .run_now(SyncTrigger::Manual)
            .await
            .unwrap()
            .unwrap();
        assert!(!report.success);
        assert_eq!(coordinator.state(), SyncState::Error);
        assert!(coordinator.stats().last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn aborted_cycle_records_whether_it_is_retryable() {
        let (coordinator, _, _) = coordinator(SyncConfig::default());
        coordinator
            .inner
            .record_failure(&SyncError::Journal(tasksync_journal::JournalError::Locked));
        assert_eq!(coordinator.state(), SyncState::Error);
        assert!(coordinator.stats().last_error_retryable);

        coordinator
            .inner
            .record_failure(&SyncError::Codec("truncated record".into()));
        let stats = coordinator.stats();
        assert!(!stats.last_error_retryable);
        assert_eq!(stats.last_error.as_deref(), Some("codec error: truncated record"));

        let report = coordinator.run_now(SyncTrigger::Manual).await.unwrap().unwrap();
        assert!(report.success);
        assert!(!coordinator.stats().last_error_retryable);
        assert_eq!(coordinator.stats().last_error, None);
    }

    #[tokio::test]
    async fn offline_cycles_are_skipped() {
        let (coordinator, _, remote) =
            coordinator(SyncConfig::default().with_pull_enabled(false));
        coordinator.set_online(false);
        assert!(coordinator
            .run_now(SyncTrigger::Manual)
            .await
            .unwrap()
            .is_none());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_are_debounced_into_one_cycle() {
        let (coordinator, _, remote) = coordinator(SyncConfig::default());
        coordinator.trigger(SyncTrigger::Foreground);
        tokio::time::sleep(Duration::from_millis(100)).await;
        coordinator.trigger(SyncTrigger::Login);
        tokio::time::sleep(Duration::from_millis(100)).await;
        coordinator.trigger(SyncTrigger::Reconnect);

        coordinator.settle().await;
        assert_eq!(pulls(&remote), 1);
        assert_eq!(coordinator.stats().cycles_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_triggers_a_cycle() {
        let (coordinator, _, remote) = coordinator(SyncConfig::default());
        coordinator.set_online(false);
        coordinator.trigger(SyncTrigger::Foreground);
        coordinator.settle().await;
        assert_eq!(pulls(&remote), 0);

        coordinator.set_online(true);
        coordinator.settle().await;
        assert_eq!(pulls(&remote), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_run_is_dropped() {
        let (coordinator, _, remote) = coordinator(SyncConfig::default());
        remote.set_latency(Duration::from_secs(1));

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_now(SyncTrigger::Manual).await })
        };
        while !coordinator.is_running() {
            tokio::task::yield_now().await;
        }

        assert!(coordinator
            .run_now(SyncTrigger::Manual)
            .await
            .unwrap()
            .is_none());
        assert_eq!(coordinator.stats().rejected_runs, 1);

        let report = first.await.unwrap().unwrap();
        assert!(report.is_some());
        assert!(!coordinator.is_running());
        assert_eq!(pulls(&remote), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn record_schedules_a_cycle() {
        let (coordinator, store, remote) = coordinator(SyncConfig::default());
        coordinator
            .record(Mutation::CreateTodo(NewTodo::new("t1", "x")))
            .unwrap();
        assert!(store.todo("t1").unwrap().is_some());

        coordinator.settle().await;
        assert!(remote.calls().contains(&"createTodo:t1".to_string()));
        assert!(store.all_pending().unwrap().is_empty());
    }
}
