//! CLI command implementations.

pub mod compact;
pub mod cursor;
pub mod outbox;

use clap::ValueEnum;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tasksync_engine::{JournalOptions, JournalStore, SyncError};
use tasksync_journal::{FileBackend, JournalError};
use thiserror::Error;

/// The store every command operates on.
pub type Store = JournalStore<FileBackend>;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The journal file does not exist.
    #[error("no journal found at {0}")]
    NotFound(PathBuf),

    /// A running client holds the journal lock.
    #[error("journal {0} is in use by another process")]
    Locked(PathBuf),

    /// A store operation failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Output could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opens an existing journal. Commands never create one.
pub fn open_store(path: &Path) -> Result<Store, CliError> {
    if !path.exists() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    JournalStore::open_path(path, JournalOptions::default()).map_err(|err| match err {
        SyncError::Journal(JournalError::Locked) => CliError::Locked(path.to_path_buf()),
        other => CliError::Sync(other),
    })
}

/// Prints `value` as JSON, or runs `text` for the text format.
pub(crate) fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T),
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}
