//! Deterministic policy evaluation.
//!
//! A `PolicySet` is a priority-ordered list of declarative rules; evaluation
//! walks them in order and the first matching rule wins. No match falls back
//! to `RequireApproval`. Evaluation is a pure function of
//! `(proposal, rules, role)` — no I/O, no clock reads — so the evidence
//! ledger's reasoning summary is reproducible from stored inputs.
//!
//! Two hard constraints sit above the rule list:
//! - an explicit `Deny` match always stands;
//! - a `High` derived risk downgrades an `AutoApprove` match to
//!   `RequireApproval`. Rule authors cannot auto-approve high-risk actions.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::proposal::ActionProposal;
use crate::rbac::Role;
use crate::types::{PolicyEffect, RiskLevel};

// ---------------------------------------------------------------------------
// PolicyPredicate
// ---------------------------------------------------------------------------

/// Declarative match condition. All present clauses must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyPredicate {
    /// Executor kinds the rule applies to. Empty matches every kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,
    /// Matches only when the derived risk is at most this level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_risk: Option<RiskLevel>,
    /// Matches only when the derived risk is at least this level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_risk: Option<RiskLevel>,
    /// Payload keys that must be present at the top level.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_has: Vec<String>,
    /// Risk-hint tags, any of which matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_any: Vec<String>,
}

impl PolicyPredicate {
    fn matches(&self, proposal: &ActionProposal, risk: RiskLevel) -> bool {
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k == proposal.kind.as_str()) {
            return false;
        }
        if let Some(max) = self.max_risk {
            if risk > max {
                return false;
            }
        }
        if let Some(min) = self.min_risk {
            if risk < min {
                return false;
            }
        }
        if !self.payload_has.is_empty() {
            let obj = match proposal.payload.as_object() {
                Some(o) => o,
                None => return false,
            };
            if !self.payload_has.iter().all(|k| obj.contains_key(k)) {
                return false;
            }
        }
        if !self.tags_any.is_empty()
            && !self
                .tags_any
                .iter()
                .any(|t| proposal.risk_hints.tags.contains(t))
        {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// PolicyRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRule {
    pub id: String,
    /// Lower number = evaluated earlier.
    pub priority: u32,
    #[serde(default)]
    pub predicate: PolicyPredicate,
    pub effect: PolicyEffect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// PolicyResult
// ---------------------------------------------------------------------------

/// The outcome of one evaluation, persisted verbatim on the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub effect: PolicyEffect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule_id: Option<String>,
    pub risk_level: RiskLevel,
    /// Set when the high-risk override rewrote an `AutoApprove` match.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub risk_override: bool,
}

// ---------------------------------------------------------------------------
// PolicySet
// ---------------------------------------------------------------------------

/// A validated, priority-sorted rule set for one organization.
#[derive(Debug, Clone)]
pub struct PolicySet {
    rules: Vec<PolicyRule>,
}

impl PolicySet {
    /// Validate and sort a rule set. Malformed sets (blank or duplicate rule
    /// ids) are a configuration error, fatal to policy loading, never a
    /// per-request failure. An empty set is fine: everything then requires
    /// approval.
    pub fn from_rules(mut rules: Vec<PolicyRule>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(WardenError::Config("policy rule with empty id".into()));
            }
            if !seen.insert(rule.id.clone()) {
                return Err(WardenError::Config(format!(
                    "duplicate policy rule id: {}",
                    rule.id
                )));
            }
        }
        // Stable tiebreak on id keeps evaluation deterministic when two rules
        // share a priority.
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(Self { rules })
    }

    /// Load a rule set from a YAML file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let rules: Vec<PolicyRule> = serde_yaml::from_str(&content)
            .map_err(|e| WardenError::Config(format!("malformed policy rules: {e}")))?;
        Self::from_rules(rules)
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Evaluate a proposal. Pure and deterministic for identical inputs.
    pub fn evaluate(&self, proposal: &ActionProposal, caller_role: Role) -> PolicyResult {
        let risk = derive_risk(proposal, caller_role);

        for rule in &self.rules {
            if rule.predicate.matches(proposal, risk) {
                // Deny always stands; the risk override only guards auto-approval.
                let (effect, overridden) = match rule.effect {
                    PolicyEffect::AutoApprove if risk == RiskLevel::High => {
                        (PolicyEffect::RequireApproval, true)
                    }
                    other => (other, false),
                };
                return PolicyResult {
                    effect,
                    matched_rule_id: Some(rule.id.clone()),
                    risk_level: risk,
                    risk_override: overridden,
                };
            }
        }

        PolicyResult {
            effect: PolicyEffect::RequireApproval,
            matched_rule_id: None,
            risk_level: risk,
            risk_override: false,
        }
    }
}

/// Derive the effective risk from proposal hints and the caller's role.
///
/// Irreversible actions are always `High`. Proposals arriving through a
/// viewer-credentialed channel are raised one notch, since the channel itself
/// carries no execution trust.
fn derive_risk(proposal: &ActionProposal, caller_role: Role) -> RiskLevel {
    if proposal.risk_hints.irreversible {
        return RiskLevel::High;
    }
    let base = proposal.risk_hints.level;
    match (caller_role, base) {
        (Role::Viewer, RiskLevel::Low) => RiskLevel::Medium,
        (Role::Viewer, RiskLevel::Medium) => RiskLevel::High,
        _ => base,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
