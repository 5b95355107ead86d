use std::path::Path;

use anyhow::{anyhow, Result};
use warden_core::config::{WardenConfig, WarnLevel};
use warden_core::policy::PolicySet;

use crate::output::print_json;

/// Validate the configuration and policy rules without starting anything.
pub fn run(root: &Path, json: bool) -> Result<()> {
    let config = WardenConfig::load(root)?;
    let warnings = config.validate();

    let rules = match &config.policy_rules {
        Some(path) => PolicySet::load(&root.join(path))?.rules().len(),
        None => 0,
    };

    if json {
        print_json(&serde_json::json!({
            "warnings": warnings,
            "policy_rules": rules,
        }))?;
    } else {
        for warning in &warnings {
            let tag = match warning.level {
                WarnLevel::Error => "error",
                WarnLevel::Warning => "warning",
            };
            println!("{tag}: {}", warning.message);
        }
        println!("{rules} policy rules loaded");
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        Err(anyhow!("configuration has errors"))
    } else {
        Ok(())
    }
}
