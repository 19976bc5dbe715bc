//! File-backed storage device.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A device backed by one file.
///
/// The file handle and the cached length sit behind a single mutex so a
/// reader never observes a length that disagrees with the file position.
///
/// ```no_run
/// use unitas_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut device = FileBackend::open(Path::new("entities.journal")).unwrap();
/// device.append(b"frame").unwrap();
/// device.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    len: u64,
}

impl FileBackend {
    /// Opens `path`, creating an empty file when it does not exist.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or its metadata read.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, len }),
        })
    }

    /// Opens an existing file without creating it.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the file is missing.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, len }),
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Fails when a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.inner.lock();
        let size = state.len;
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > size) {
            return Err(StorageError::OutOfBounds { offset, len, size });
        }
        let mut buf = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = self.inner.get_mut();
        let offset = state.len;
        if data.is_empty() {
            return Ok(offset);
        }
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let state = self.inner.get_mut();
        if new_size > state.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: state.len,
            });
        }
        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.journal");
        let device = FileBackend::open(&path).unwrap();
        assert_eq!(device.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(device.path(), path);
    }

    #[test]
    fn open_existing_requires_file() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open_existing(&dir.path().join("missing.journal"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.journal");
        {
            let mut device = FileBackend::open(&path).unwrap();
            device.append(b"first").unwrap();
            device.append(b"second").unwrap();
            device.sync().unwrap();
        }
        let device = FileBackend::open(&path).unwrap();
        assert_eq!(device.size().unwrap(), 11);
        assert_eq!(device.read_at(5, 6).unwrap(), b"second");
        assert_eq!(device.read_all().unwrap(), b"firstsecond");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut device = FileBackend::open(&dir.path().join("j")).unwrap();
        device.append(b"abc").unwrap();
        assert!(matches!(
            device.read_at(2, 2),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn truncate_then_append_overwrites_tail() {
        let dir = tempdir().unwrap();
        let mut device = FileBackend::open(&dir.path().join("j")).unwrap();
        device.append(b"good").unwrap();
        device.append(b"torn").unwrap();
        device.truncate(4).unwrap();
        assert_eq!(device.append(b"next").unwrap(), 4);
        assert_eq!(device.read_all().unwrap(), b"goodnext");
    }

    #[test]
    fn nested_directories_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("entities.journal");
        FileBackend::open_with_create_dirs(&path).unwrap();
        assert!(path.exists());
    }
}
