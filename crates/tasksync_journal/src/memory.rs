//! In-memory journal backend.

use crate::backend::JournalBackend;
use crate::error::{JournalError, JournalResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory journal backend.
///
/// Clones share the same buffer, so a test can keep a handle, drop the
/// store that owns the other clone, and reopen a fresh store over the
/// surviving bytes to simulate a process restart.
///
/// # Example
///
/// ```rust
/// use tasksync_journal::{JournalBackend, MemoryBackend};
///
/// let mut backend = MemoryBackend::new();
/// let offset = backend.append(b"record").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 6);
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over pre-existing bytes.
    ///
    /// Useful for recovery tests that start from a hand-crafted journal.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl JournalBackend for MemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(JournalError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> JournalResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> JournalResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> JournalResult<()> {
        Ok(())
    }

    fn size(&self) -> JournalResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> JournalResult<()> {
        let mut data = self.data.write();
        let current = data.len() as u64;

        if new_size > current {
            return Err(JournalError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size} bytes, journal holds {current}"),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, bytes: &[u8]) -> JournalResult<()> {
        *self.data.write() = bytes.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = MemoryBackend::new();
        assert_eq!(backend.append(b"abc").unwrap(), 0);
        assert_eq!(backend.append(b"de").unwrap(), 3);
        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.read_at(1, 3).unwrap(), b"bcd");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = MemoryBackend::new();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.read_at(2, 5),
            Err(JournalError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn clones_share_bytes() {
        let mut backend = MemoryBackend::new();
        let observer = backend.clone();
        backend.append(b"shared").unwrap();
        assert_eq!(observer.data(), b"shared");
    }

    #[test]
    fn truncate_and_replace() {
        let mut backend = MemoryBackend::with_data(b"hello world".to_vec());
        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");
        assert!(backend.truncate(50).is_err());

        backend.replace(b"snapshot").unwrap();
        assert_eq!(backend.data(), b"snapshot");
    }
}
