use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use warden_core::retention::RetentionSweep;

use crate::output::print_json;

pub fn run(root: &Path, dry_run: bool, json: bool) -> Result<()> {
    let state = super::open_state(root)?;
    let sweep = RetentionSweep::new(
        state.service.decisions().clone(),
        state.service.adapter().executions().clone(),
        state.ledger.clone(),
        state.config.retention.clone(),
    );
    let report = sweep.sweep(Utc::now(), dry_run)?;

    if json {
        return print_json(&report);
    }
    let verb = if dry_run { "would archive" } else { "archived" };
    println!("{verb} {} decisions, {} executions", report.decisions_archived, report.executions_archived);
    let verb = if dry_run { "would delete" } else { "deleted" };
    println!(
        "{verb} {} evidence partitions ({} entries)",
        report.evidence_partitions_deleted, report.evidence_entries_deleted
    );
    Ok(())
}
