//! Coordinator state, triggers and per-cycle reports.

use crate::pull::PullRunResult;
use crate::push::PushRunResult;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// The current state of the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle has run yet.
    Idle,
    /// Draining the outbox.
    Pushing,
    /// Pulling remote changes.
    Pulling,
    /// The last cycle pushed everything it could and pulled successfully.
    Synced,
    /// The last cycle stopped on a failure.
    Error,
}

impl SyncState {
    /// Returns true while a cycle is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pushing | SyncState::Pulling)
    }
}

/// Why a sync cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    /// The app came to the foreground.
    Foreground,
    /// Connectivity came back.
    Reconnect,
    /// A user signed in.
    Login,
    /// A local mutation was recorded.
    LocalChange,
    /// Explicit request from the host.
    Manual,
}

impl SyncTrigger {
    /// Returns the trigger name.
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncTrigger::Foreground => "foreground",
            SyncTrigger::Reconnect => "reconnect",
            SyncTrigger::Login => "login",
            SyncTrigger::LocalChange => "local_change",
            SyncTrigger::Manual => "manual",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running totals across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to the end, successful or not.
    pub cycles_completed: u64,
    /// Changes the remote accepted.
    pub changes_pushed: u64,
    /// Changes parked as dead letters.
    pub dead_lettered: u64,
    /// Records upserted or removed by pulls.
    pub records_pulled: u64,
    /// Triggers dropped because a cycle was already running.
    pub rejected_runs: u64,
    /// Wall-clock time of the last successful cycle.
    pub last_success: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Whether the last cycle aborted on a transient error, such as a
    /// locked journal, that a later trigger may clear.
    pub last_error_retryable: bool,
}

/// Result of one push-then-pull cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleReport {
    /// What started the cycle. Coalesced triggers report the latest one.
    pub trigger: SyncTrigger,
    /// Push outcome.
    pub push: PushRunResult,
    /// Pull outcome, or `None` when pulling is disabled.
    pub pull: Option<PullRunResult>,
    /// Whether the push hit no blocking failure and the pull succeeded.
    pub success: bool,
    /// Duration of the cycle.
    pub duration: Duration,
}

impl SyncCycleReport {
    /// Records upserted or removed by the pull.
    pub fn pulled(&self) -> u64 {
        self.pull.as_ref().map_or(0, |pull| {
            (pull.categories.pulled
                + pull.categories.soft_deleted
                + pull.todos.updated
                + pull.todos.deleted
                + pull.completions.updated
                + pull.completions.deleted) as u64
        })
    }
}
