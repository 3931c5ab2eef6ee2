//! Backing file and advisory lock of the log backend.
//!
//! ```text
//! <path>            # header + append-only record log
//! <path>.lock       # advisory lock for single-writer access
//! <path>.compact    # temporary file, only present during compaction
//! ```

use crate::error::{StoreError, StoreResult};
use crate::log::record::{check_file_header, encode_file_header, FILE_HEADER_SIZE};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Appends `suffix` to the file name of `path`.
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Exclusive advisory lock on `<path>.lock`.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub(crate) struct LockFile {
    _file: File,
}

impl LockFile {
    /// Acquires the lock without blocking.
    pub(crate) fn acquire(data_path: &Path) -> StoreResult<Self> {
        let lock_path = sibling_path(data_path, ".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(format!("cannot open {}", lock_path.display()), e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::unavailable(format!(
                "{} is locked by another store instance",
                data_path.display()
            )));
        }
        Ok(Self { _file: file })
    }
}

/// The append-only backing file.
///
/// Reads and appends share one handle; callers serialize access.
#[derive(Debug)]
pub(crate) struct LogFile {
    file: File,
    len: u64,
}

impl LogFile {
    /// Opens the file at `path`, writing a header if it is new or empty.
    pub(crate) fn open(path: &Path, create: bool) -> StoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io(format!("cannot open {}", path.display()), e))?;
        let len = file.metadata()?.len();

        if len == 0 {
            file.write_all(&encode_file_header())?;
            file.sync_all()?;
            return Ok(Self {
                file,
                len: FILE_HEADER_SIZE as u64,
            });
        }

        let mut header = [0u8; FILE_HEADER_SIZE];
        if len < FILE_HEADER_SIZE as u64 {
            return Err(StoreError::corrupted(format!(
                "{} is shorter than the file header",
                path.display()
            )));
        }
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        check_file_header(&header)?;
        Ok(Self { file, len })
    }

    /// Opens an existing file read-only for inspection. Never writes.
    pub(crate) fn open_read_only(path: &Path) -> StoreResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| StoreError::io(format!("cannot open {}", path.display()), e))?;
        let len = file.metadata()?.len();
        let mut header = [0u8; FILE_HEADER_SIZE];
        if len < FILE_HEADER_SIZE as u64 {
            return Err(StoreError::corrupted("file is shorter than the file header"));
        }
        file.read_exact(&mut header)?;
        check_file_header(&header)?;
        Ok(Self { file, len })
    }

    /// Creates a fresh file at `path`, replacing any previous one.
    pub(crate) fn create_new(path: &Path) -> StoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| StoreError::io(format!("cannot create {}", path.display()), e))?;
        file.write_all(&encode_file_header())?;
        Ok(Self {
            file,
            len: FILE_HEADER_SIZE as u64,
        })
    }

    /// Current file length, header included.
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Reads `len` bytes at `offset`.
    pub(crate) fn read_at(&mut self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.len {
            return Err(StoreError::corrupted(format!(
                "read past end of file: offset {offset}, len {len}, size {}",
                self.len
            )));
        }
        let mut buffer = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Appends `data` and returns the offset it was written at.
    ///
    /// A failed append is rolled back to the previous length so a partial
    /// write never stays in the file.
    pub(crate) fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let offset = self.len;
        let written = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(data))
            .and_then(|()| self.file.flush());
        if let Err(e) = written {
            // Best effort; replay drops an unfinished tail anyway.
            let _ = self.file.set_len(offset);
            return Err(StoreError::io("append failed", e));
        }
        self.len += data.len() as u64;
        Ok(offset)
    }

    /// Flushes file data and metadata to disk.
    pub(crate) fn sync(&mut self) -> StoreResult<()> {
        self.file
            .sync_all()
            .map_err(|e| StoreError::io("fsync failed", e))
    }

    /// Shrinks the file to `new_len`.
    pub(crate) fn truncate(&mut self, new_len: u64) -> StoreResult<()> {
        if new_len > self.len {
            return Err(StoreError::unavailable(format!(
                "cannot truncate to {new_len}, file is {} bytes",
                self.len
            )));
        }
        self.file.set_len(new_len)?;
        self.file.sync_all()?;
        self.len = new_len;
        Ok(())
    }

    /// Returns a reader positioned right after the header.
    pub(crate) fn reader(&mut self) -> StoreResult<&mut File> {
        self.file.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64))?;
        Ok(&mut self.file)
    }
}

/// Makes a rename inside the parent directory of `path` durable.
#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) -> StoreResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) -> StoreResult<()> {
    // Directory fsync is not supported on Windows; NTFS journals the rename.
    Ok(())
}

/// Removes a leftover file if present.
pub(crate) fn remove_if_exists(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(format!("cannot remove {}", path.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_file_gets_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let file = LogFile::open(&path, true).unwrap();
        assert_eq!(file.len(), FILE_HEADER_SIZE as u64);
        assert_eq!(fs::metadata(&path).unwrap().len(), FILE_HEADER_SIZE as u64);
    }

    #[test]
    fn missing_file_without_create_fails() {
        let dir = tempdir().unwrap();
        let err = LogFile::open(&dir.path().join("absent"), false).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BackendUnavailable);
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        fs::write(&path, b"definitely not a store file").unwrap();
        assert!(LogFile::open(&path, true).is_err());
        assert!(LogFile::open_read_only(&path).is_err());
    }

    #[test]
    fn append_read_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let mut file = LogFile::open(&path, true).unwrap();

        let first = file.append(b"hello").unwrap();
        let second = file.append(b" world").unwrap();
        assert_eq!(first, FILE_HEADER_SIZE as u64);
        assert_eq!(second, first + 5);
        assert_eq!(file.read_at(first, 11).unwrap(), b"hello world");
        assert!(file.read_at(second, 100).is_err());

        file.truncate(second).unwrap();
        assert_eq!(file.len(), second);
        assert!(file.truncate(second + 1).is_err());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let mut file = LogFile::open(&path, true).unwrap();
            file.append(b"persistent").unwrap();
            file.sync().unwrap();
        }
        let mut file = LogFile::open(&path, false).unwrap();
        assert_eq!(file.read_at(FILE_HEADER_SIZE as u64, 10).unwrap(), b"persistent");
    }

    #[test]
    fn lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let lock = LockFile::acquire(&path).unwrap();
        let err = LockFile::acquire(&path).unwrap_err();
        assert!(err.to_string().contains("locked"));
        drop(lock);
        assert!(LockFile::acquire(&path).is_ok());
    }

    #[test]
    fn sibling_paths() {
        let path = Path::new("/tmp/cache/store.db");
        assert_eq!(
            sibling_path(path, ".lock"),
            PathBuf::from("/tmp/cache/store.db.lock")
        );
    }
}
