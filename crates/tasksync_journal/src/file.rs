//! File-based journal backend.

use crate::backend::JournalBackend;
use crate::error::{JournalError, JournalResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based journal backend.
///
/// The journal file is accompanied by a `<name>.lock` file on which an
/// exclusive advisory lock is held for the lifetime of the backend, so only
/// one process at a time can write to a given journal.
///
/// # Durability
///
/// - `flush()` pushes buffered data to the OS
/// - `sync()` calls `File::sync_all()`
/// - `replace()` writes a sibling temp file, syncs it and renames it over
///   the journal
///
/// # Example
///
/// ```no_run
/// use tasksync_journal::{FileBackend, JournalBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("outbox.journal")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates the journal at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Locked`] if another process holds the lock,
    /// or an I/O error if the file cannot be opened.
    pub fn open(path: &Path) -> JournalResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(JournalError::Locked);
        }

        let file = open_journal_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            _lock_file: lock_file,
        })
    }

    /// Returns the path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn open_journal_file(path: &Path) -> JournalResult<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

impl JournalBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(JournalError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        // Seeking mutates the cursor, so reads take the write lock.
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> JournalResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> JournalResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> JournalResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn size(&self) -> JournalResult<u64> {
        Ok(*self.size.read())
    }

    fn truncate(&mut self, new_size: u64) -> JournalResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(JournalError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size} bytes, journal holds {}", *size),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> JournalResult<()> {
        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let mut file = self.file.write();
        let mut size = self.size.write();
        *file = open_journal_file(&self.path)?;
        *size = data.len() as u64;
        Ok(())
    }
}
