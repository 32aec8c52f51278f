//! The journal: framed append, replay and compaction over a backend.

use crate::backend::JournalBackend;
use crate::error::{JournalError, JournalResult};
use crate::record::{decode_frame, Decoded, JournalRecord};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Records recovered from a journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    /// Valid records in append order.
    pub records: Vec<JournalRecord>,
    /// Bytes of torn tail dropped while opening.
    pub truncated_bytes: u64,
}

/// Append-only journal of framed records.
///
/// # Recovery
///
/// A crash in the middle of an append leaves a torn frame at the end of the
/// journal. [`Journal::open`] detects it (short frame, or a complete frame
/// whose checksum fails and which ends exactly at the end of the file) and
/// truncates it away. An invalid frame followed by more bytes is real
/// corruption and is reported as [`JournalError::Corrupted`].
pub struct Journal<B: JournalBackend> {
    backend: Mutex<B>,
    sync_on_write: bool,
    truncated_on_open: u64,
}

impl<B: JournalBackend> Journal<B> {
    /// Opens a journal over `backend`, dropping any torn tail.
    ///
    /// With `sync_on_write`, every append is synced before returning.
    pub fn open(mut backend: B, sync_on_write: bool) -> JournalResult<Self> {
        let size = backend.size()?;
        let bytes = backend.read_at(0, size as usize)?;
        let (records, valid_len) = scan(&bytes)?;

        let truncated = size - valid_len;
        if truncated > 0 {
            warn!(
                truncated_bytes = truncated,
                valid_records = records.len(),
                "dropping torn journal tail"
            );
            backend.truncate(valid_len)?;
        }

        Ok(Self {
            backend: Mutex::new(backend),
            sync_on_write,
            truncated_on_open: truncated,
        })
    }

    /// Appends a record and returns its offset.
    pub fn append(&self, kind: u8, payload: &[u8]) -> JournalResult<u64> {
        let record = JournalRecord::new(kind, payload.to_vec());
        let framed = record
            .encode()
            .ok_or(JournalError::PayloadTooLarge(payload.len()))?;

        let mut backend = self.backend.lock();
        let offset = backend.append(&framed)?;
        backend.flush()?;
        if self.sync_on_write {
            backend.sync()?;
        }
        Ok(offset)
    }

    /// Reads every record in append order.
    pub fn replay(&self) -> JournalResult<Replay> {
        let backend = self.backend.lock();
        let size = backend.size()?;
        let bytes = backend.read_at(0, size as usize)?;
        let (records, valid_len) = scan(&bytes)?;

        if valid_len != size {
            // Only reachable if something else wrote to the backend after open.
            return Err(JournalError::corrupted(valid_len, "trailing partial record"));
        }

        Ok(Replay {
            records,
            truncated_bytes: self.truncated_on_open,
        })
    }

    /// Replaces the whole journal with `records`.
    pub fn rewrite(&self, records: &[JournalRecord]) -> JournalResult<()> {
        let mut data = Vec::new();
        for record in records {
            let framed = record
                .encode()
                .ok_or(JournalError::PayloadTooLarge(record.payload.len()))?;
            data.extend_from_slice(&framed);
        }

        let mut backend = self.backend.lock();
        backend.replace(&data)?;
        debug!(records = records.len(), bytes = data.len(), "journal rewritten");
        Ok(())
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> JournalResult<u64> {
        self.backend.lock().size()
    }

    /// Bytes of torn tail dropped when the journal was opened.
    pub fn truncated_on_open(&self) -> u64 {
        self.truncated_on_open
    }
}

/// Scans `bytes` and returns the valid records and the length they cover.
fn scan(bytes: &[u8]) -> JournalResult<(Vec<JournalRecord>, u64)> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match decode_frame(&bytes[offset..]) {
            Decoded::Record(record, len) => {
                records.push(record);
                offset += len;
            }
            Decoded::Incomplete => break,
            Decoded::Invalid { message, frame_len } => {
                let is_tail = frame_len.is_some_and(|len| offset + len == bytes.len());
                if is_tail {
                    break;
                }
                return Err(JournalError::corrupted(offset as u64, message));
            }
        }
    }

    Ok((records, offset as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn framed(kind: u8, payload: &[u8]) -> Vec<u8> {
        JournalRecord::new(kind, payload.to_vec()).encode().unwrap()
    }

    #[test]
    fn append_then_replay() {
        let journal = Journal::open(MemoryBackend::new(), true).unwrap();
        journal.append(1, b"first").unwrap();
        journal.append(2, b"second").unwrap();

        let replay = journal.replay().unwrap();
        assert_eq!(
            replay.records,
            vec![
                JournalRecord::new(1, b"first".to_vec()),
                JournalRecord::new(2, b"second".to_vec()),
            ]
        );
        assert_eq!(replay.truncated_bytes, 0);
    }

    #[test]
    fn reopen_sees_previous_records() {
        let backend = MemoryBackend::new();
        {
            let journal = Journal::open(backend.clone(), false).unwrap();
            journal.append(9, b"kept").unwrap();
        }

        let journal = Journal::open(backend, false).unwrap();
        assert_eq!(journal.replay().unwrap().records.len(), 1);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let mut bytes = framed(1, b"complete");
        let whole = bytes.len() as u64;
        let torn = framed(2, b"torn by a crash");
        bytes.extend_from_slice(&torn[..torn.len() - 6]);

        let backend = MemoryBackend::with_data(bytes);
        let journal = Journal::open(backend.clone(), false).unwrap();

        assert_eq!(journal.truncated_on_open(), (torn.len() - 6) as u64);
        assert_eq!(backend.data().len() as u64, whole);
        assert_eq!(journal.replay().unwrap().records.len(), 1);

        // Appending after recovery produces a clean journal.
        journal.append(3, b"after").unwrap();
        assert_eq!(journal.replay().unwrap().records.len(), 2);
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn() {
        let mut bytes = framed(1, b"ok");
        let mut last = framed(2, b"garbled");
        let n = last.len();
        last[n - 1] ^= 0xFF;
        bytes.extend_from_slice(&last);

        let journal = Journal::open(MemoryBackend::with_data(bytes), false).unwrap();
        assert_eq!(journal.replay().unwrap().records.len(), 1);
    }

    #[test]
    fn corruption_in_the_middle_is_an_error() {
        let mut first = framed(1, b"garbled");
        let n = first.len();
        first[n - 1] ^= 0xFF;
        first.extend_from_slice(&framed(2, b"after"));

        let result = Journal::open(MemoryBackend::with_data(first), false);
        assert!(matches!(result, Err(JournalError::Corrupted { offset: 0, .. })));
    }

    #[test]
    fn rewrite_compacts() {
        let journal = Journal::open(MemoryBackend::new(), true).unwrap();
        for i in 0..10u8 {
            journal.append(1, &[i; 32]).unwrap();
        }
        let before = journal.size().unwrap();

        journal
            .rewrite(&[JournalRecord::new(5, b"snapshot".to_vec())])
            .unwrap();

        assert!(journal.size().unwrap() < before);
        let replay = journal.replay().unwrap();
        assert_eq!(replay.records, vec![JournalRecord::new(5, b"snapshot".to_vec())]);
    }
}
