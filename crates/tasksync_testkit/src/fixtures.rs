//! Test fixtures: mutation builders and simulated devices.
//!
//! A [`Device`] is one client: a local store, a manual clock and a
//! coordinator, talking to a shared [`FakeServer`]. Several devices on one
//! server simulate multi-device scenarios.

use crate::fake_server::FakeServer;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasksync_engine::{
    JournalOptions, JournalStore, LocalStore, ManualClock, MemoryStore, SyncConfig,
    SyncCoordinator, SyncCycleReport, SyncResult, SyncTrigger,
};
use tasksync_journal::FileBackend;
use tasksync_protocol::{
    CategoryRef, CompletionKey, Mutation, NewCategory, NewCompletion, NewTodo, PendingChange,
    TodoPatch, TodoRef,
};
use tempfile::TempDir;

/// Wall-clock start of every fixture: 2024-05-01T12:00:00Z.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid fixture time")
}

/// Returns a day in May 2024.
pub fn may(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).expect("valid fixture day")
}

/// `createTodo`.
pub fn create_todo(id: &str, title: &str) -> Mutation {
    Mutation::CreateTodo(NewTodo::new(id, title))
}

/// `updateTodo` that changes the title.
pub fn rename_todo(id: &str, title: &str) -> Mutation {
    Mutation::UpdateTodo(TodoPatch {
        id: id.to_string(),
        title: Some(title.to_string()),
        ..TodoPatch::default()
    })
}

/// `deleteTodo`.
pub fn delete_todo(id: &str) -> Mutation {
    Mutation::DeleteTodo(TodoRef { id: id.to_string() })
}

/// `createCategory`.
pub fn create_category(id: &str, name: &str) -> Mutation {
    Mutation::CreateCategory(NewCategory {
        id: id.to_string(),
        name: name.to_string(),
        color: None,
        sort_order: 0,
    })
}

/// `deleteCategory`.
pub fn delete_category(id: &str) -> Mutation {
    Mutation::DeleteCategory(CategoryRef { id: id.to_string() })
}

/// `createCompletion`.
pub fn complete(todo_id: &str, date: NaiveDate) -> Mutation {
    Mutation::CreateCompletion(NewCompletion {
        todo_id: todo_id.to_string(),
        date,
        completed_at: None,
    })
}

/// `deleteCompletion`.
pub fn uncomplete(todo_id: &str, date: NaiveDate) -> Mutation {
    Mutation::DeleteCompletion(CompletionKey::new(todo_id, date))
}

/// A temporary directory holding one journal file.
pub struct TempJournal {
    dir: TempDir,
}

impl TempJournal {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp directory"),
        }
    }

    /// Returns the journal path.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("outbox.journal")
    }
}

impl Default for TempJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// One simulated client.
pub struct Device<S: LocalStore + 'static> {
    /// Local store.
    pub store: Arc<S>,
    /// Client clock.
    pub clock: Arc<ManualClock>,
    /// Shared server.
    pub server: Arc<FakeServer>,
    /// The coordinator under test.
    pub coordinator: SyncCoordinator,
}

impl Device<MemoryStore> {
    /// Creates a device with an in-memory store.
    pub fn memory(server: Arc<FakeServer>) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), server, SyncConfig::default())
    }
}

impl Device<JournalStore<FileBackend>> {
    /// Opens a device whose store is the journal at `path`.
    pub fn journal(server: Arc<FakeServer>, path: &Path) -> SyncResult<Self> {
        let store = JournalStore::open_path(path, JournalOptions::default())?;
        Ok(Self::with_store(
            Arc::new(store),
            server,
            SyncConfig::default(),
        ))
    }
}

impl<S: LocalStore + 'static> Device<S> {
    /// Creates a device over `store`.
    pub fn with_store(store: Arc<S>, server: Arc<FakeServer>, config: SyncConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let coordinator =
            SyncCoordinator::new(store.clone(), server.clone(), clock.clone(), config);
        Self {
            store,
            clock,
            server,
            coordinator,
        }
    }

    /// Records a local mutation without scheduling a cycle.
    pub fn record(&self, mutation: Mutation) -> PendingChange {
        self.coordinator
            .outbox()
            .record(mutation)
            .expect("local record failed")
    }

    /// Runs one cycle now.
    pub async fn sync(&self) -> SyncCycleReport {
        self.coordinator
            .run_now(SyncTrigger::Manual)
            .await
            .expect("local store failed")
            .expect("cycle was not started")
    }

    /// Advances the client clock.
    pub fn advance(&self, by: std::time::Duration) {
        self.clock.advance(by);
    }

    /// Number of queued changes, dead letters included.
    pub fn pending_len(&self) -> usize {
        self.store.all_pending().expect("store read failed").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn device_syncs_against_the_server() {
        let server = Arc::new(FakeServer::new());
        let device = Device::memory(server.clone());
        device.record(create_todo("t1", "milk"));
        assert_eq!(device.pending_len(), 1);

        let report = device.sync().await;
        assert!(report.success);
        assert_eq!(device.pending_len(), 0);
        assert_eq!(server.todo("t1").unwrap().title, "milk");
    }

    #[test]
    fn journal_device_opens() {
        let journal = TempJournal::new();
        let device = Device::journal(Arc::new(FakeServer::new()), &journal.path()).unwrap();
        device.record(complete("t1", may(3)));
        assert_eq!(device.store.completions().unwrap().len(), 1);
    }
}
