//! Evidence export with PII redaction.
//!
//! Exports are for auditors outside the trust boundary, so entry content is
//! scrubbed on the way out: values under configured sensitive keys are
//! dropped wholesale, and email addresses / phone numbers are masked wherever
//! they appear in strings. The stored ledger is never touched — redaction
//! happens on the exported copy only, which is why exported hashes are not
//! expected to re-verify against redacted content.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::ledger::{EvidenceEntry, EvidenceLedger};

pub const REDACTED: &str = "[redacted]";

// ---------------------------------------------------------------------------
// ExportFormat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = WardenError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(WardenError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Redactor
// ---------------------------------------------------------------------------

pub struct Redactor {
    email: Regex,
    phone: Regex,
    /// Lowercased key names whose values are dropped entirely.
    keys: Vec<String>,
}

impl Redactor {
    /// Built-in email/phone patterns plus the configured sensitive keys.
    pub fn new(extra_keys: &[String]) -> Result<Self> {
        let email = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .map_err(|e| WardenError::Config(e.to_string()))?;
        // At least 8 digits with common separators, optionally +-prefixed.
        let phone = Regex::new(r"\+?\d[\d\s().-]{6,}\d")
            .map_err(|e| WardenError::Config(e.to_string()))?;
        Ok(Self {
            email,
            phone,
            keys: extra_keys.iter().map(|k| k.to_lowercase()).collect(),
        })
    }

    fn redact_str(&self, s: &str) -> String {
        let s = self.email.replace_all(s, REDACTED);
        self.phone.replace_all(&s, REDACTED).into_owned()
    }

    /// Scrub a JSON value in place.
    pub fn redact(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(s) => {
                let scrubbed = self.redact_str(s);
                if scrubbed != *s {
                    *s = scrubbed;
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.redact(item);
                }
            }
            serde_json::Value::Object(map) => {
                for (key, item) in map.iter_mut() {
                    if self.keys.contains(&key.to_lowercase()) {
                        *item = serde_json::Value::String(REDACTED.to_string());
                    } else {
                        self.redact(item);
                    }
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Export one partition's evidence, scrubbed, as a JSON array or CSV text.
///
/// The stored chain must verify first: handing an auditor evidence from a
/// tampered partition would defeat the point of the export.
pub fn export_partition(
    ledger: &EvidenceLedger,
    partition: &str,
    format: ExportFormat,
    redactor: &Redactor,
) -> Result<String> {
    ledger.require_valid(partition)?;
    let mut entries = ledger.entries(partition)?;
    for entry in &mut entries {
        redactor.redact(&mut entry.content);
    }
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&entries)?),
        ExportFormat::Csv => Ok(to_csv(&entries)?),
    }
}

fn to_csv(entries: &[EvidenceEntry]) -> Result<String> {
    let mut out = String::from("seq,created_at,subject_type,subject_id,entry_hash,content\n");
    for entry in entries {
        let content = serde_json::to_string(&entry.content)?;
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            entry.seq,
            entry.created_at.to_rfc3339(),
            csv_field(&entry.subject_type),
            csv_field(&entry.subject_id),
            entry.entry_hash,
            csv_field(&content),
        ));
    }
    Ok(out)
}

/// Quote a field if it contains a comma, quote, or newline.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_db;
    use tempfile::TempDir;

    fn ledger_with_entry(content: serde_json::Value) -> (TempDir, EvidenceLedger) {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir.path().join("test.db")).unwrap();
        let ledger = EvidenceLedger::new(db).unwrap();
        ledger.append("org-1", "decision", "d1", content).unwrap();
        (dir, ledger)
    }

    #[test]
    fn emails_and_phones_are_masked() {
        let redactor = Redactor::new(&[]).unwrap();
        let mut value = serde_json::json!({
            "note": "contact jane.doe@example.com or +1 (555) 123-4567 today",
            "nested": {"cc": ["ops@example.org"]},
        });
        redactor.redact(&mut value);

        let text = value.to_string();
        assert!(!text.contains("jane.doe@example.com"), "{text}");
        assert!(!text.contains("555"), "{text}");
        assert!(!text.contains("ops@example.org"), "{text}");
        assert!(text.contains(REDACTED));
    }

    #[test]
    fn configured_keys_are_dropped_wholesale() {
        let redactor = Redactor::new(&["ssn".into(), "Salary".into()]).unwrap();
        let mut value = serde_json::json!({
            "ssn": "123-45-6789",
            "salary": 90000,
            "title": "keep me",
        });
        redactor.redact(&mut value);

        assert_eq!(value["ssn"], serde_json::json!(REDACTED));
        assert_eq!(value["salary"], serde_json::json!(REDACTED), "key match is case-insensitive");
        assert_eq!(value["title"], serde_json::json!("keep me"));
    }

    #[test]
    fn json_export_is_scrubbed_but_ledger_is_not() {
        let (_dir, ledger) =
            ledger_with_entry(serde_json::json!({"to": "jane@example.com", "event": "sent"}));
        let redactor = Redactor::new(&[]).unwrap();

        let exported = export_partition(&ledger, "org-1", ExportFormat::Json, &redactor).unwrap();
        assert!(!exported.contains("jane@example.com"));
        assert!(exported.contains("\"event\""));

        // The stored chain is untouched and still verifies.
        let stored = &ledger.entries("org-1").unwrap()[0];
        assert_eq!(stored.content["to"], serde_json::json!("jane@example.com"));
        assert!(ledger.verify_chain("org-1").unwrap());
    }

    #[test]
    fn csv_export_has_header_and_quoted_content() {
        let (_dir, ledger) = ledger_with_entry(serde_json::json!({"k": "v, with comma"}));
        let redactor = Redactor::new(&[]).unwrap();

        let csv = export_partition(&ledger, "org-1", ExportFormat::Csv, &redactor).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "seq,created_at,subject_type,subject_id,entry_hash,content"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("0,"));
        assert!(row.contains("\"{\"\"k\"\""), "JSON content is CSV-quoted: {row}");
    }

    #[test]
    fn tampered_partition_refuses_to_export() {
        let (_dir, ledger) = ledger_with_entry(serde_json::json!({"event": "sent"}));
        ledger.tamper("org-1", 0, serde_json::json!({"event": "edited"}));
        let redactor = Redactor::new(&[]).unwrap();

        let err = export_partition(&ledger, "org-1", ExportFormat::Json, &redactor).unwrap_err();
        assert!(matches!(
            err,
            WardenError::ChainVerificationFailed { seq: 0, .. }
        ));
    }

    #[test]
    fn format_parses_from_str() {
        use std::str::FromStr;
        assert_eq!(ExportFormat::from_str("json").unwrap(), ExportFormat::Json);
        assert_eq!(ExportFormat::from_str("csv").unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::from_str("xml").is_err());
    }

    #[test]
    fn empty_partition_exports_cleanly() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir.path().join("test.db")).unwrap();
        let ledger = EvidenceLedger::new(db).unwrap();
        let redactor = Redactor::new(&[]).unwrap();

        let json = export_partition(&ledger, "nothing", ExportFormat::Json, &redactor).unwrap();
        assert_eq!(json.trim(), "[]");
    }
}
