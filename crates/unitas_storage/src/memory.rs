//! In-process storage device.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A device that keeps its bytes in memory.
///
/// Clones share the same buffer, so a store can be dropped and reopened over
/// a clone to simulate a process restart.
///
/// ```rust
/// use unitas_storage::{InMemoryBackend, StorageBackend};
///
/// let mut device = InMemoryBackend::new();
/// let reopened = device.clone();
/// device.append(b"abc").unwrap();
/// assert_eq!(reopened.size().unwrap(), 3);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device pre-filled with `bytes`.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Copies out the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        match start.checked_add(len) {
            Some(end) if end <= bytes.len() => Ok(bytes[start..end].to_vec()),
            _ => Err(StorageError::OutOfBounds { offset, len, size }),
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        bytes.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_running_offset() {
        let mut device = InMemoryBackend::new();
        assert_eq!(device.append(b"head").unwrap(), 0);
        assert_eq!(device.append(b"tail").unwrap(), 4);
        assert_eq!(device.size().unwrap(), 8);
    }

    #[test]
    fn read_at_returns_appended_range() {
        let mut device = InMemoryBackend::new();
        device.append(b"head").unwrap();
        device.append(b"tail").unwrap();
        assert_eq!(device.read_at(4, 4).unwrap(), b"tail");
        assert!(device.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let mut device = InMemoryBackend::new();
        device.append(b"abc").unwrap();
        assert!(matches!(
            device.read_at(1, 5),
            Err(StorageError::OutOfBounds { size: 3, .. })
        ));
        assert!(matches!(
            device.read_at(u64::MAX, 1),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn clones_share_bytes() {
        let mut device = InMemoryBackend::new();
        let other = device.clone();
        device.append(b"shared").unwrap();
        assert_eq!(other.read_all().unwrap(), b"shared");
    }

    #[test]
    fn truncate_drops_tail() {
        let mut device = InMemoryBackend::with_data(b"keep-drop".to_vec());
        device.truncate(4).unwrap();
        assert_eq!(device.snapshot(), b"keep");
        assert!(matches!(
            device.truncate(10),
            Err(StorageError::TruncateBeyondEnd { requested: 10, size: 4 })
        ));
    }
}
