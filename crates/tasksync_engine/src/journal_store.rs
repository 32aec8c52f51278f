//! Journal-backed durable store.

use crate::config::JournalOptions;
use crate::error::{SyncError, SyncResult};
use crate::memory_store::{RecordLog, StateStore, StoreRecord, StoreState};
use std::path::Path;
use tasksync_journal::{FileBackend, Journal, JournalBackend, JournalRecord};
use tracing::{debug, info};

/// Journal record kind carrying one JSON-encoded [`StoreRecord`].
pub const STORE_RECORD_KIND: u8 = 1;

/// A [`RecordLog`] that appends to a [`Journal`].
pub struct JournalLog<B: JournalBackend> {
    journal: Journal<B>,
}

impl<B: JournalBackend> JournalLog<B> {
    /// Returns the underlying journal.
    pub fn journal(&self) -> &Journal<B> {
        &self.journal
    }
}

impl<B: JournalBackend> RecordLog for JournalLog<B> {
    fn append(&self, record: &StoreRecord) -> SyncResult<()> {
        let payload = serde_json::to_vec(record)?;
        self.journal.append(STORE_RECORD_KIND, &payload)?;
        Ok(())
    }
}

/// A durable store: in-memory state mirrored by an append-only journal.
///
/// Every mutating call appends one record and flushes it before returning.
/// Opening replays the journal; a record torn by a crash mid-append is
/// dropped, which loses at most the call that was interrupted.
pub type JournalStore<B> = StateStore<JournalLog<B>>;

impl<B: JournalBackend> StateStore<JournalLog<B>> {
    /// Opens a store over `backend`, replaying its contents.
    pub fn open(backend: B, options: JournalOptions) -> SyncResult<Self> {
        let journal = Journal::open(backend, options.sync_on_write)?;
        let replay = journal.replay()?;

        let mut state = StoreState::default();
        for record in &replay.records {
            state.apply(decode_record(record)?);
        }

        info!(
            records = replay.records.len(),
            truncated_bytes = replay.truncated_bytes,
            "store replayed"
        );
        Ok(Self::from_parts(state, JournalLog { journal }))
    }

    /// Rewrites the journal as a single snapshot record.
    pub fn compact(&self) -> SyncResult<()> {
        self.with_state(|state| -> SyncResult<()> {
            let before = self.log().journal.size()?;
            let snapshot = StoreRecord::Snapshot(state.snapshot());
            let payload = serde_json::to_vec(&snapshot)?;
            self.log()
                .journal
                .rewrite(&[JournalRecord::new(STORE_RECORD_KIND, payload)])?;
            debug!(
                before_bytes = before,
                after_bytes = self.log().journal.size()?,
                "store compacted"
            );
            Ok(())
        })
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> SyncResult<u64> {
        Ok(self.log().journal.size()?)
    }
}

impl StateStore<JournalLog<FileBackend>> {
    /// Opens (or creates) a store file, taking an exclusive lock on it.
    pub fn open_path(path: impl AsRef<Path>, options: JournalOptions) -> SyncResult<Self> {
        let backend = FileBackend::open(path.as_ref())?;
        Self::open(backend, options)
    }
}

fn decode_record(record: &JournalRecord) -> SyncResult<StoreRecord> {
    if record.kind != STORE_RECORD_KIND {
        return Err(SyncError::Codec(format!(
            "unexpected journal record kind {}",
            record.kind
        )));
    }
    Ok(serde_json::from_slice(&record.payload)?)
}
