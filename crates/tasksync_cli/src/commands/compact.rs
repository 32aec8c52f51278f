//! Compact command implementation.

use super::{emit, CliError, OutputFormat, Store};
use serde::Serialize;
use tasksync_engine::LocalStore;

/// Compaction statistics.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactStats {
    /// Pending changes carried into the snapshot.
    pub pending: usize,
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction; equal to `bytes_before` on a dry run.
    pub bytes_after: u64,
    /// Whether the journal was left untouched.
    pub dry_run: bool,
}

impl CompactStats {
    fn saved_percent(&self) -> f64 {
        if self.bytes_before == 0 {
            return 0.0;
        }
        self.bytes_before.saturating_sub(self.bytes_after) as f64 / self.bytes_before as f64
            * 100.0
    }
}

/// Runs the compact command.
pub fn run(store: &Store, dry_run: bool, format: OutputFormat) -> Result<(), CliError> {
    let stats = compact(store, dry_run)?;
    emit(format, &stats, |stats| {
        if stats.dry_run {
            println!("(dry run - no changes will be made)");
        }
        println!("Pending changes: {}", stats.pending);
        println!("Size before:     {} bytes", stats.bytes_before);
        println!("Size after:      {} bytes", stats.bytes_after);
        println!(
            "Space saved:     {} bytes ({:.1}%)",
            stats.bytes_before.saturating_sub(stats.bytes_after),
            stats.saved_percent()
        );
    })
}

/// Rewrites the journal unless `dry_run` is set.
pub fn compact(store: &Store, dry_run: bool) -> Result<CompactStats, CliError> {
    let bytes_before = store.journal_size()?;
    if !dry_run {
        store.compact()?;
    }
    Ok(CompactStats {
        pending: store.all_pending()?.len(),
        bytes_before,
        bytes_after: store.journal_size()?,
        dry_run,
    })
}
