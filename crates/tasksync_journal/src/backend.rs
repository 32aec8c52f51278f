//! Journal backend trait definition.

use crate::error::JournalResult;

/// A byte store underneath a [`crate::Journal`].
///
/// Backends are **opaque byte stores**: they append, read back and truncate
/// bytes. Framing, checksums and replay belong to the journal.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, every appended byte survives process termination
/// - `replace` swaps the whole content atomically: readers observe either
///   the old bytes or the new bytes, never a mix
pub trait JournalBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::JournalError::ReadPastEnd`] if the range extends
    /// beyond the current size.
    fn read_at(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>>;

    /// Appends data to the end of the journal, returning its offset.
    fn append(&mut self, data: &[u8]) -> JournalResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&mut self) -> JournalResult<()>;

    /// Syncs data and metadata to durable storage.
    fn sync(&mut self) -> JournalResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> JournalResult<u64>;

    /// Truncates the journal to `new_size` bytes.
    ///
    /// Used on open to drop a torn trailing record.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> JournalResult<()>;

    /// Atomically replaces the entire content with `data`.
    ///
    /// Used by compaction to swap the journal for a single snapshot record.
    fn replace(&mut self, data: &[u8]) -> JournalResult<()>;
}
