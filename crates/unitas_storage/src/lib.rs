//! # Unitas Storage
//!
//! Byte-level devices that durable entity stores write their journals to.
//!
//! A device is an append-only sequence of bytes. It never interprets what it
//! holds; framing, checksums and record layout belong to the store that owns
//! the device.
//!
//! ## Devices
//!
//! - [`InMemoryBackend`] - shared in-process buffer, used by tests and by
//!   stores that only need to survive a "reopen" inside one process
//! - [`FileBackend`] - a single file opened for read + append
//! - [`FaultInjectingBackend`] - wraps another device and fails on demand,
//!   for exercising rollback paths
//!
//! ## Example
//!
//! ```rust
//! use unitas_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut device = InMemoryBackend::new();
//! let offset = device.append(b"frame").unwrap();
//! assert_eq!(device.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod fault;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use fault::{FaultInjectingBackend, FaultPlan};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
