//! The device contract.

use crate::error::StorageResult;

/// An append-only byte device.
///
/// The journal store is the only consumer in this workspace. It relies on the
/// following guarantees:
///
/// - `append` writes the whole slice contiguously and returns its start offset
/// - bytes returned by `read_at` are exactly the bytes appended at that range
/// - after `flush` returns, appended bytes are handed to the OS
/// - after `sync` returns, appended bytes and the device length are durable
/// - `truncate` discards a tail, which is how a failed batch is rolled back
///
/// Devices are `Send + Sync`; callers still serialize writers themselves.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::OutOfBounds`] when the range extends
    /// past the end of the device, or with an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it starts at.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors. A failed append may leave a partial tail, which
    /// the caller removes with [`StorageBackend::truncate`].
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn flush(&mut self) -> StorageResult<()>;

    /// Makes data and metadata durable.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current length in bytes; the offset of the next append.
    ///
    /// # Errors
    ///
    /// Fails if the length cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the device down to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::TruncateBeyondEnd`] when `new_size`
    /// exceeds the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole device.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`StorageBackend::size`] and
    /// [`StorageBackend::read_at`].
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| crate::StorageError::OutOfBounds {
            offset: 0,
            len: usize::MAX,
            size,
        })?;
        self.read_at(0, len)
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        (**self).append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        (**self).flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        (**self).truncate(new_size)
    }
}
