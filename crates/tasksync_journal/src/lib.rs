//! # tasksync journal
//!
//! Append-only durable journal used by the tasksync local store.
//!
//! The journal is the lowest layer of the sync stack. It knows nothing about
//! pending changes, entities or cursors: it stores opaque payloads tagged with
//! a one-byte record kind, framed with a magic, a version, a length and a
//! CRC32 so that a record torn by a crash mid-append is detected on replay.
//!
//! ## Backends
//!
//! - [`MemoryBackend`] - For tests and ephemeral stores
//! - [`FileBackend`] - For persistent storage, guarded by an exclusive lock
//!
//! ## Example
//!
//! ```rust
//! use tasksync_journal::{Journal, MemoryBackend};
//!
//! let journal = Journal::open(MemoryBackend::new(), true).unwrap();
//! journal.append(7, b"hello").unwrap();
//!
//! let replay = journal.replay().unwrap();
//! assert_eq!(replay.records.len(), 1);
//! assert_eq!(replay.records[0].kind, 7);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod journal;
mod memory;
mod record;

pub use backend::JournalBackend;
pub use error::{JournalError, JournalResult};
pub use file::FileBackend;
pub use journal::{Journal, Replay};
pub use memory::MemoryBackend;
pub use record::{compute_crc32, JournalRecord, JOURNAL_MAGIC, JOURNAL_VERSION};
