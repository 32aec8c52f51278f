//! Error types for journal operations.

use std::io;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur while reading or writing the journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the journal.
    #[error("read beyond end of journal: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current journal size.
        size: u64,
    },

    /// A record in the middle of the journal failed validation.
    #[error("journal corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A record payload is too large to frame.
    #[error("record payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Another process holds the journal lock.
    #[error("journal locked: another process has exclusive access")]
    Locked,
}

impl JournalError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }
}
