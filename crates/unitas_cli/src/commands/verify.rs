//! Verify command implementation.

use super::{open_device, CliError};
use std::path::Path;
use unitas_core::{JournalEntityStore, JournalReport};

/// Scans the journal at `path`.
///
/// A torn tail is reported but tolerated, since opening the store discards
/// it. Corrupt frames fail verification.
pub fn verify(path: &Path) -> Result<JournalReport, CliError> {
    let device = open_device(path)?;
    JournalEntityStore::verify(&device).map_err(|err| match err {
        err @ unitas_core::CoreError::Corruption { .. } => {
            CliError::VerificationFailed(err.to_string())
        }
        other => other.into(),
    })
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), CliError> {
    println!("Verifying journal at {path:?}");
    println!();
    match verify(path) {
        Ok(report) => {
            println!(
                "  batches: {}, entities: {}, committed: {} of {} bytes",
                report.batches, report.entities, report.committed_size, report.size
            );
            if !report.is_clean() {
                println!(
                    "  WARNING: {} torn bytes, {} incomplete batches (discarded on next open)",
                    report.torn_bytes(),
                    report.incomplete_batches
                );
            }
            println!();
            println!("✓ Journal verification passed");
            Ok(())
        }
        Err(err) => {
            println!("  ERROR: {err}");
            println!();
            println!("✗ Journal verification failed");
            Err(err)
        }
    }
}
