//! Inspect command implementation.

use super::{format_size, open_device, open_snapshot, CliError, OutputFormat};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use unitas_core::{EntityStore, JournalEntityStore, JournalReport};

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Frame-level statistics.
    pub journal: JournalReport,
    /// Live entities per type.
    pub types: BTreeMap<String, usize>,
}

/// Collects statistics for the journal at `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, CliError> {
    let journal = JournalEntityStore::verify(&open_device(path)?)?;
    let store = open_snapshot(path)?;
    let mut types = BTreeMap::new();
    for state in store.entity_states()? {
        *types.entry(state?.entity_type().to_string()).or_insert(0) += 1;
    }
    Ok(InspectResult {
        path: path.display().to_string(),
        journal,
        types,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let result = inspect(path)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let report = &result.journal;
    println!("Unitas Journal Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:               {}", format_size(report.size));
    println!("  Committed batches:  {}", report.batches);
    println!("  Incomplete batches: {}", report.incomplete_batches);
    println!("  Torn bytes:         {}", report.torn_bytes());
    println!();
    println!("Entities: {}", report.entities);
    for (entity_type, count) in &result.types {
        println!("  {entity_type}: {count}");
    }
}
