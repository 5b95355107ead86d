use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// DecisionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an `ActionDecision`.
///
/// Transitions: `Pending → {Approved | Rejected}`, `Approved → {Executed | Failed}`.
/// `Rejected`, `Executed`, and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl DecisionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Executed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Approved => "approved",
            DecisionStatus::Rejected => "rejected",
            DecisionStatus::Executed => "executed",
            DecisionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PolicyEffect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    AutoApprove,
    RequireApproval,
    Deny,
}

impl fmt::Display for PolicyEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyEffect::AutoApprove => "auto_approve",
            PolicyEffect::RequireApproval => "require_approval",
            PolicyEffect::Deny => "deny",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

/// Ordered risk classification. `High` disables auto-approval regardless of
/// any matched rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = crate::error::WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            _ => Err(crate::error::WardenError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorKind
// ---------------------------------------------------------------------------

/// Closed set of executor capabilities. Dispatch is a tagged match through
/// `ExecutorRegistry`, never string reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Task,
    Meeting,
    PlaybookStep,
}

impl ExecutorKind {
    pub fn all() -> &'static [ExecutorKind] {
        &[
            ExecutorKind::Task,
            ExecutorKind::Meeting,
            ExecutorKind::PlaybookStep,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::Task => "task",
            ExecutorKind::Meeting => "meeting",
            ExecutorKind::PlaybookStep => "playbook_step",
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutorKind {
    type Err = crate::error::WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(ExecutorKind::Task),
            "meeting" => Ok(ExecutorKind::Meeting),
            "playbook_step" | "playbook-step" => Ok(ExecutorKind::PlaybookStep),
            _ => Err(crate::error::WardenError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a `PlaybookRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Waiting,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Waiting => "waiting",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ConfidenceLevel
// ---------------------------------------------------------------------------

/// Explanation confidence, scored from decision-context completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_status_terminal() {
        assert!(!DecisionStatus::Pending.is_terminal());
        assert!(!DecisionStatus::Approved.is_terminal());
        assert!(DecisionStatus::Rejected.is_terminal());
        assert!(DecisionStatus::Executed.is_terminal());
        assert!(DecisionStatus::Failed.is_terminal());
    }

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn risk_level_roundtrip() {
        use std::str::FromStr;
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            assert_eq!(RiskLevel::from_str(level.as_str()).unwrap(), level);
        }
    }

    #[test]
    fn executor_kind_roundtrip() {
        use std::str::FromStr;
        for kind in ExecutorKind::all() {
            assert_eq!(ExecutorKind::from_str(kind.as_str()).unwrap(), *kind);
        }
        assert!(ExecutorKind::from_str("webhook").is_err());
    }

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Waiting.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn snake_case_serialization() {
        assert_eq!(
            serde_json::to_string(&ExecutorKind::PlaybookStep).unwrap(),
            "\"playbook_step\""
        );
        assert_eq!(
            serde_json::to_string(&PolicyEffect::AutoApprove).unwrap(),
            "\"auto_approve\""
        );
    }
}
