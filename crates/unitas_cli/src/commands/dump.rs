//! Dump command implementation.

use super::{open_snapshot, CliError, OutputFormat};
use std::path::Path;
use unitas_core::{EntityRecord, EntityStore};

/// Collects the live entities, optionally only those of `entity_type`.
pub fn collect(
    path: &Path,
    entity_type: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<EntityRecord>, CliError> {
    let store = open_snapshot(path)?;
    let mut records = Vec::new();
    for state in store.entity_states()? {
        let state = state?;
        if entity_type.is_some_and(|t| t != state.entity_type()) {
            continue;
        }
        records.push(state.to_record(state.version().clone(), state.last_modified()));
    }
    records.sort_by(|a, b| a.reference.cmp(&b.reference));
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    Ok(records)
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    entity_type: Option<&str>,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let records = collect(path, entity_type, limit)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => {
            for record in &records {
                println!(
                    "{} [{}] version={} modified={}",
                    record.reference,
                    record.entity_type,
                    record.version,
                    record.last_modified.to_rfc3339()
                );
                for (name, value) in &record.properties {
                    println!("  {name} = {}", serde_json::to_string(value)?);
                }
                for (name, target) in &record.associations {
                    println!("  {name} -> {target}");
                }
                for (name, targets) in &record.many_associations {
                    println!("  {name} -> {} references", targets.len());
                }
                for (name, entries) in &record.named_associations {
                    println!("  {name} -> {} entries", entries.len());
                }
            }
            println!("{} entities", records.len());
        }
    }
    Ok(())
}
