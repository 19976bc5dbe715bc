//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use std::path::{Path, PathBuf};
use thiserror::Error;
use unitas_core::{Config, CoreError, JournalEntityStore};
use unitas_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No journal at the given path.
    #[error("no journal found at {0:?}")]
    NotFound(PathBuf),

    /// The journal failed verification.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Device error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Output encoding error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Opens the journal file at `path` without creating it.
pub(crate) fn open_device(path: &Path) -> Result<FileBackend, CliError> {
    if !path.is_file() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    Ok(FileBackend::open_existing(path)?)
}

/// Replays a copy of the journal in memory, leaving the file untouched even
/// if it has a torn tail.
pub(crate) fn open_snapshot(path: &Path) -> Result<JournalEntityStore, CliError> {
    let bytes = open_device(path)?.read_all()?;
    let store = JournalEntityStore::open(
        InMemoryBackend::with_data(bytes),
        Config::new().create_if_missing(false),
    )?;
    Ok(store)
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
