//! Storage error types.

use std::io;
use thiserror::Error;

/// Result type for device operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a storage device.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read touched bytes past the end of the device.
    #[error("read out of bounds: offset {offset}, len {len}, device size {size}")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Device size at the time of the read.
        size: u64,
    },

    /// Truncation target lies beyond the current end.
    #[error("cannot truncate to {requested}: device holds only {size} bytes")]
    TruncateBeyondEnd {
        /// Requested new size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// A fault injected by [`crate::FaultInjectingBackend`].
    #[error("injected fault: {0}")]
    Injected(String),
}

impl StorageError {
    /// Returns true if this error was produced by fault injection.
    #[must_use]
    pub fn is_injected(&self) -> bool {
        matches!(self, Self::Injected(_))
    }
}
