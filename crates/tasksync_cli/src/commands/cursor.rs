//! Cursor command implementation.

use super::{emit, CliError, OutputFormat, Store};
use serde::Serialize;
use tasksync_engine::LocalStore;
use tasksync_protocol::SyncCursor;
use tracing::info;

/// Cursor state before and after the command.
#[derive(Debug, Serialize)]
pub struct CursorReport {
    /// Cursor as stored, if any.
    pub cursor: Option<String>,
    /// Whether the cursor was cleared.
    pub reset: bool,
}

/// Runs the cursor command.
pub fn run(store: &Store, reset: bool, format: OutputFormat) -> Result<(), CliError> {
    let report = inspect(store, reset)?;
    emit(format, &report, |report| match (&report.cursor, report.reset) {
        (Some(cursor), true) => println!("Cursor {cursor} cleared; next pull is a full pull"),
        (None, true) => println!("No cursor to clear"),
        (Some(cursor), false) => println!("{cursor}"),
        (None, false) => println!("No cursor; next pull is a full pull"),
    })
}

/// Reads the cursor and clears it when `reset` is set.
pub fn inspect(store: &Store, reset: bool) -> Result<CursorReport, CliError> {
    let cursor = store.cursor()?;
    if reset && cursor.is_some() {
        store.set_cursor(None)?;
        info!(cursor = %self::display(cursor), "cursor cleared");
    }
    Ok(CursorReport {
        cursor: cursor.map(|c| c.to_string()),
        reset,
    })
}

fn display(cursor: Option<SyncCursor>) -> String {
    cursor.map_or_else(|| "none".to_string(), |c| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tasksync_engine::{JournalOptions, JournalStore};
    use tempfile::TempDir;

    #[test]
    fn reset_clears_a_stored_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outbox.journal");
        {
            let store = JournalStore::open_path(&path, JournalOptions::default()).unwrap();
            let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
            store.set_cursor(Some(SyncCursor::new(at))).unwrap();
        }

        let store = JournalStore::open_path(&path, JournalOptions::default()).unwrap();
        let report = inspect(&store, false).unwrap();
        assert_eq!(report.cursor.as_deref(), Some("2024-05-01T10:00:00.000Z"));

        let report = inspect(&store, true).unwrap();
        assert!(report.cursor.is_some());
        assert_eq!(store.cursor().unwrap(), None);
        assert!(inspect(&store, false).unwrap().cursor.is_none());
    }
}
