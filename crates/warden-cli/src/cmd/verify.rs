use std::path::Path;

use anyhow::{anyhow, Result};

use crate::output::{print_json, print_table};

/// Verify the hash chain of one partition, or of every partition.
pub fn run(root: &Path, partition: Option<&str>, json: bool) -> Result<()> {
    let state = super::open_state(root)?;
    let partitions = match partition {
        Some(p) => vec![p.to_string()],
        None => state.ledger.partitions()?,
    };

    let mut rows = Vec::new();
    let mut invalid = Vec::new();
    for partition in &partitions {
        let valid = state.ledger.verify_chain(partition)?;
        let entries = state.ledger.entries(partition)?.len();
        if !valid {
            invalid.push(partition.clone());
        }
        rows.push((partition.clone(), entries, valid));
    }

    if json {
        let report: Vec<_> = rows
            .iter()
            .map(|(partition, entries, valid)| {
                serde_json::json!({
                    "partition": partition,
                    "entries": entries,
                    "valid": valid,
                })
            })
            .collect();
        print_json(&report)?;
    } else {
        print_table(
            &["PARTITION", "ENTRIES", "VALID"],
            rows.iter()
                .map(|(partition, entries, valid)| {
                    vec![partition.clone(), entries.to_string(), valid.to_string()]
                })
                .collect(),
        );
    }

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "chain verification failed for: {}",
            invalid.join(", ")
        ))
    }
}
