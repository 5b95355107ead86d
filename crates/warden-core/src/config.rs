//! Runtime configuration, loaded from `warden.yaml`.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// JobConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Total attempts before a retryable job is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    /// How long a claim is honored before `recover_stale` re-queues the job.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    30
}

fn default_backoff_cap() -> u64 {
    3600
}

fn default_lease() -> u64 {
    300
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            lease_secs: default_lease(),
        }
    }
}

impl JobConfig {
    /// Exponential backoff for the given attempt count (1-indexed), capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let secs = self
            .backoff_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_secs);
        Duration::seconds(secs as i64)
    }
}

// ---------------------------------------------------------------------------
// RetentionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal decisions/executions older than this are archived.
    #[serde(default = "default_decision_days")]
    pub decision_days: i64,
    /// Evidence partitions wholly older than this are hard-deleted.
    #[serde(default = "default_evidence_days")]
    pub evidence_days: i64,
}

fn default_decision_days() -> i64 {
    730
}

fn default_evidence_days() -> i64 {
    1095
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            decision_days: default_decision_days(),
            evidence_days: default_evidence_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// WardenConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WardenConfig {
    #[serde(default)]
    pub jobs: JobConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Extra payload keys redacted on evidence export, on top of the
    /// built-in patterns.
    #[serde(default)]
    pub redact_keys: Vec<String>,
    /// Path to the policy rules YAML, relative to the config file.
    #[serde(default)]
    pub policy_rules: Option<String>,
}

impl WardenConfig {
    pub const FILENAME: &'static str = "warden.yaml";

    /// Load from `<root>/warden.yaml`, falling back to defaults when the
    /// file doesn't exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(Self::FILENAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(root.join(Self::FILENAME), yaml)?;
        Ok(())
    }

    /// Sanity checks that don't block startup but should be surfaced.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.jobs.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "jobs.max_attempts is 0: every retryable failure is terminal".into(),
            });
        }
        if self.jobs.backoff_base_secs > self.jobs.backoff_cap_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "jobs.backoff_base_secs exceeds backoff_cap_secs".into(),
            });
        }
        if self.retention.decision_days < 1 || self.retention.evidence_days < 1 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "retention horizons must be at least one day".into(),
            });
        }
        if self.retention.evidence_days < self.retention.decision_days {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "evidence is deleted before decisions are archived; \
                          explanations for archived decisions will be incomplete"
                    .into(),
            });
        }
        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = WardenConfig::load(dir.path()).unwrap();
        assert_eq!(config.jobs.max_attempts, 5);
        assert_eq!(config.retention.decision_days, 730);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = WardenConfig::default();
        config.jobs.max_attempts = 2;
        config.redact_keys.push("ssn".into());
        config.save(dir.path()).unwrap();

        let loaded = WardenConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let jobs = JobConfig {
            max_attempts: 10,
            backoff_base_secs: 30,
            backoff_cap_secs: 120,
            lease_secs: 300,
        };
        assert_eq!(jobs.backoff(1).num_seconds(), 30);
        assert_eq!(jobs.backoff(2).num_seconds(), 60);
        assert_eq!(jobs.backoff(3).num_seconds(), 120);
        assert_eq!(jobs.backoff(4).num_seconds(), 120, "capped");
        assert_eq!(jobs.backoff(40).num_seconds(), 120, "shift saturates");
    }

    #[test]
    fn validate_flags_zero_attempts() {
        let mut config = WardenConfig::default();
        config.jobs.max_attempts = 0;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.level == WarnLevel::Error));
    }

    #[test]
    fn default_config_is_clean() {
        assert!(WardenConfig::default().validate().is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "jobs:\n  max_attempts: 3\nretenshun:\n  decision_days: 10\n";
        assert!(serde_yaml::from_str::<WardenConfig>(yaml).is_err());
    }
}
