//! Action proposals surfaced by the external reasoning collaborator.
//!
//! A proposal is an immutable snapshot: once created it is never mutated, and
//! decisions embed a copy rather than a live reference, so a later change to
//! the reasoning side can never rewrite what was decided on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ExecutorKind, RiskLevel};

// ---------------------------------------------------------------------------
// RiskHints
// ---------------------------------------------------------------------------

/// Risk metadata attached by the proposing side. Inputs to — not the output
/// of — policy evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskHints {
    #[serde(default)]
    pub level: RiskLevel,
    /// Set when the action cannot be undone (e.g. sends an email, deletes data).
    #[serde(default)]
    pub irreversible: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// SourceContext
// ---------------------------------------------------------------------------

/// Where a proposal came from. `org_id` doubles as the evidence-ledger
/// partition and the RBAC approval scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceContext {
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Identifier of the reasoning session that emitted the proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ---------------------------------------------------------------------------
// ActionProposal
// ---------------------------------------------------------------------------

/// An immutable candidate action. `kind` selects the executor; `payload` is
/// opaque to the governance core and only interpreted by that executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub id: Uuid,
    pub kind: ExecutorKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub risk_hints: RiskHints,
    pub proposed_at: DateTime<Utc>,
    #[serde(default)]
    pub source_context: SourceContext,
}

impl ActionProposal {
    pub fn new(kind: ExecutorKind, payload: serde_json::Value, org_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            risk_hints: RiskHints::default(),
            proposed_at: Utc::now(),
            source_context: SourceContext {
                org_id: org_id.into(),
                project_id: None,
                session_id: None,
            },
        }
    }

    pub fn with_risk(mut self, level: RiskLevel) -> Self {
        self.risk_hints.level = level;
        self
    }

    pub fn with_irreversible(mut self) -> Self {
        self.risk_hints.irreversible = true;
        self
    }
}
