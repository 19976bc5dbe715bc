//! Compact command implementation.

use super::{format_size, open_device, CliError};
use std::path::Path;
use unitas_core::{Config, JournalEntityStore, JournalReport};
use unitas_storage::{FileBackend, StorageBackend};

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Journal before compaction.
    pub before: JournalReport,
    /// Bytes after compaction; equal to the input size on a dry run.
    pub bytes_after: u64,
}

/// Rewrites the journal at `path` so it holds one batch with the live
/// entities. The new journal is written next to the old one and renamed
/// over it once synced.
pub fn compact(path: &Path, dry_run: bool) -> Result<CompactStats, CliError> {
    let before = JournalEntityStore::verify(&open_device(path)?)?;
    if dry_run {
        return Ok(CompactStats {
            bytes_after: before.size,
            before,
        });
    }

    let store = JournalEntityStore::open_path(path, Config::new().create_if_missing(false))?;
    let temp_path = path.with_extension("compact");
    if temp_path.exists() {
        std::fs::remove_file(&temp_path)?;
    }
    let compacted = store.compact_into(FileBackend::open(&temp_path)?)?;
    let bytes_after = compacted.report()?.size;
    drop(compacted);
    drop(store);
    std::fs::rename(&temp_path, path)?;
    tracing::info!(path = %path.display(), bytes_before = before.size, bytes_after, "compacted journal");

    Ok(CompactStats { before, bytes_after })
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), CliError> {
    println!("Compacting journal at {path:?}");
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, dry_run)?;
    println!("  Batches:     {}", stats.before.batches);
    println!("  Entities:    {}", stats.before.entities);
    println!("  Size before: {}", format_size(stats.before.size));
    if !dry_run {
        println!("  Size after:  {}", format_size(stats.bytes_after));
        println!();
        println!("✓ Compaction complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::dump::collect;
    use crate::commands::testing::write_journal;
    use tempfile::tempdir;

    #[test]
    fn compaction_keeps_live_entities_and_versions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");
        write_journal(&path, 5);
        let live_before = collect(&path, None, None).unwrap();

        let stats = compact(&path, false).unwrap();
        assert!(stats.bytes_after < stats.before.size);
        assert!(!path.with_extension("compact").exists());

        let report = JournalEntityStore::verify(&FileBackend::open_existing(&path).unwrap()).unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(collect(&path, None, None).unwrap(), live_before);
    }

    #[test]
    fn dry_run_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");
        write_journal(&path, 2);
        let bytes = std::fs::read(&path).unwrap();

        let stats = compact(&path, true).unwrap();
        assert_eq!(stats.bytes_after, stats.before.size);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert!(FileBackend::open_existing(&path).unwrap().size().unwrap() > 0);
    }
}
