use std::path::{Path, PathBuf};

use anyhow::Result;
use warden_core::export::{export_partition, ExportFormat, Redactor};

pub fn run(root: &Path, partition: &str, format: &str, out: Option<&PathBuf>) -> Result<()> {
    let state = super::open_state(root)?;
    let format: ExportFormat = format.parse()?;
    let redactor = Redactor::new(&state.config.redact_keys)?;
    let exported = export_partition(&state.ledger, partition, format, &redactor)?;

    match out {
        Some(path) => {
            std::fs::write(path, &exported)?;
            eprintln!("wrote {} bytes to {}", exported.len(), path.display());
        }
        None => print!("{exported}"),
    }
    Ok(())
}
