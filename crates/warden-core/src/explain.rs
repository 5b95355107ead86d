//! Decision explanations: why the governance core decided what it decided.
//!
//! Explanations are derived, never stored — they are recomputed from the
//! decision record and whatever context facets the caller can supply, so the
//! same inputs always produce the same explanation.

use serde::{Deserialize, Serialize};

use crate::decision::ActionDecision;
use crate::types::{ConfidenceLevel, DecisionStatus, PolicyEffect};

// ---------------------------------------------------------------------------
// DecisionContext
// ---------------------------------------------------------------------------

/// Context facets gathered around a decision. Each facet is an opaque blob;
/// only presence or absence feeds the confidence score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<serde_json::Value>,
    /// Known gaps in the context (stale data, unreachable systems). Any
    /// blocker demotes confidence one level.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockers: Vec<String>,
}

impl DecisionContext {
    /// Names of the facets that are populated, in declaration order.
    pub fn facets_present(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        for (name, facet) in [
            ("project", &self.project),
            ("org", &self.org),
            ("platform", &self.platform),
            ("execution", &self.execution),
            ("knowledge", &self.knowledge),
        ] {
            if facet.is_some() {
                present.push(name);
            }
        }
        present
    }
}

// ---------------------------------------------------------------------------
// Explanation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub confidence: ConfidenceLevel,
    pub reasoning_summary: String,
    /// Policy constraints that shaped the outcome, human-readable.
    pub constraints_applied: Vec<String>,
    /// Context facets the explanation is based on.
    pub data_used: Vec<String>,
}

/// Completeness-based confidence: 0–1 facets is Low, 2–3 Medium, 4–5 High,
/// demoted one level when any blocker is present.
fn score_confidence(context: &DecisionContext) -> ConfidenceLevel {
    let base = match context.facets_present().len() {
        0 | 1 => ConfidenceLevel::Low,
        2 | 3 => ConfidenceLevel::Medium,
        _ => ConfidenceLevel::High,
    };
    if context.blockers.is_empty() {
        return base;
    }
    match base {
        ConfidenceLevel::High => ConfidenceLevel::Medium,
        _ => ConfidenceLevel::Low,
    }
}

pub fn explain(decision: &ActionDecision, context: &DecisionContext) -> Explanation {
    let policy = &decision.policy_result;

    let mut constraints = Vec::new();
    match &policy.matched_rule_id {
        Some(rule) => constraints.push(format!(
            "policy rule '{rule}' matched with effect {}",
            policy.effect
        )),
        None => constraints.push(format!(
            "no policy rule matched; default effect {} applied",
            policy.effect
        )),
    }
    constraints.push(format!("derived risk level: {}", policy.risk_level));
    if policy.risk_override {
        constraints.push("auto-approval withheld: high-risk actions require a human".to_string());
    }
    for blocker in &context.blockers {
        constraints.push(format!("context gap: {blocker}"));
    }

    let outcome = match decision.status {
        DecisionStatus::Pending => "is awaiting a human decision".to_string(),
        DecisionStatus::Approved => decided_phrase("was approved", decision),
        DecisionStatus::Rejected
            if policy.effect == PolicyEffect::Deny
                && decision
                    .decided_by
                    .as_deref()
                    .is_some_and(|by| by.starts_with("policy:")) =>
        {
            "was rejected by policy".to_string()
        }
        DecisionStatus::Rejected => decided_phrase("was rejected", decision),
        DecisionStatus::Executed => decided_phrase("was approved and executed", decision),
        DecisionStatus::Failed => decided_phrase("was approved but its execution failed", decision),
    };
    let reasoning_summary = format!(
        "The proposed {} action {} at {} risk.",
        decision.proposal.kind, outcome, policy.risk_level
    );

    Explanation {
        confidence: score_confidence(context),
        reasoning_summary,
        constraints_applied: constraints,
        data_used: context
            .facets_present()
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}

fn decided_phrase(verb: &str, decision: &ActionDecision) -> String {
    match decision.decided_by.as_deref() {
        Some(by) => format!("{verb} by {by}"),
        None => verb.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicySet;
    use crate::proposal::ActionProposal;
    use crate::rbac::Role;
    use crate::types::ExecutorKind;

    fn decision() -> ActionDecision {
        let proposal =
            ActionProposal::new(ExecutorKind::Task, serde_json::json!({"title": "t"}), "org-1");
        let result = PolicySet::empty().evaluate(&proposal, Role::Operator);
        ActionDecision::new(proposal, result)
    }

    fn facet() -> Option<serde_json::Value> {
        Some(serde_json::json!({"populated": true}))
    }

    #[test]
    fn confidence_scales_with_facet_count() {
        let d = decision();
        let mut ctx = DecisionContext::default();
        assert_eq!(explain(&d, &ctx).confidence, ConfidenceLevel::Low);

        ctx.project = facet();
        assert_eq!(explain(&d, &ctx).confidence, ConfidenceLevel::Low);

        ctx.org = facet();
        assert_eq!(explain(&d, &ctx).confidence, ConfidenceLevel::Medium);

        ctx.platform = facet();
        assert_eq!(explain(&d, &ctx).confidence, ConfidenceLevel::Medium);

        ctx.execution = facet();
        assert_eq!(explain(&d, &ctx).confidence, ConfidenceLevel::High);

        ctx.knowledge = facet();
        assert_eq!(explain(&d, &ctx).confidence, ConfidenceLevel::High);
    }

    #[test]
    fn blockers_demote_confidence() {
        let d = decision();
        let mut ctx = DecisionContext {
            project: facet(),
            org: facet(),
            platform: facet(),
            execution: facet(),
            knowledge: facet(),
            blockers: vec![],
        };
        assert_eq!(explain(&d, &ctx).confidence, ConfidenceLevel::High);

        ctx.blockers.push("calendar service unreachable".into());
        let e = explain(&d, &ctx);
        assert_eq!(e.confidence, ConfidenceLevel::Medium);
        assert!(e
            .constraints_applied
            .iter()
            .any(|c| c.contains("calendar service unreachable")));
    }

    #[test]
    fn same_inputs_same_explanation() {
        let d = decision();
        let ctx = DecisionContext {
            project: facet(),
            org: facet(),
            ..Default::default()
        };
        let a = explain(&d, &ctx);
        let b = explain(&d, &ctx);
        assert_eq!(a.reasoning_summary, b.reasoning_summary);
        assert_eq!(a.constraints_applied, b.constraints_applied);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn data_used_names_present_facets() {
        let d = decision();
        let ctx = DecisionContext {
            org: facet(),
            knowledge: facet(),
            ..Default::default()
        };
        assert_eq!(explain(&d, &ctx).data_used, vec!["org", "knowledge"]);
    }

    #[test]
    fn summary_reflects_the_lifecycle() {
        let mut d = decision();
        assert!(explain(&d, &DecisionContext::default())
            .reasoning_summary
            .contains("awaiting a human decision"));

        d.approve("alice", None).unwrap();
        d.mark_executed().unwrap();
        let e = explain(&d, &DecisionContext::default());
        assert!(e.reasoning_summary.contains("approved and executed by alice"));
    }
}
