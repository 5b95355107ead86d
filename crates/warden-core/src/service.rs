//! The action decision service: owns the proposal → decision → execution
//! state machine and the RBAC check on human decisions.
//!
//! Every transition appends one evidence entry *before* the decision record
//! is written (write-ahead): if the ledger append fails, the operation fails
//! with `LedgerWriteFailed` and the decision is treated as not committed.

use std::sync::Arc;

use crate::decision::{ActionDecision, DecisionStore};
use crate::error::{Result, WardenError};
use crate::execution::ActionExecution;
use crate::executor::ExecutionAdapter;
use crate::ledger::EvidenceLedger;
use crate::policy::PolicySet;
use crate::proposal::ActionProposal;
use crate::rbac::{Caller, Role};
use crate::types::{DecisionStatus, PolicyEffect};

#[derive(Clone)]
pub struct DecisionService {
    decisions: DecisionStore,
    adapter: ExecutionAdapter,
    policy: Arc<PolicySet>,
    ledger: EvidenceLedger,
}

impl DecisionService {
    pub fn new(
        decisions: DecisionStore,
        adapter: ExecutionAdapter,
        policy: Arc<PolicySet>,
        ledger: EvidenceLedger,
    ) -> Self {
        Self {
            decisions,
            adapter,
            policy,
            ledger,
        }
    }

    pub fn decisions(&self) -> &DecisionStore {
        &self.decisions
    }

    pub fn adapter(&self) -> &ExecutionAdapter {
        &self.adapter
    }

    /// Register a proposal and run policy over it.
    ///
    /// `AutoApprove` transitions straight through Approved and executes;
    /// `Deny` rejects with the matched rule as the deciding principal;
    /// `RequireApproval` leaves the decision Pending for a human `decide`.
    pub fn propose(&self, proposal: ActionProposal, proposer_role: Role) -> Result<ActionDecision> {
        let policy_result = self.policy.evaluate(&proposal, proposer_role);
        let mut decision = ActionDecision::new(proposal, policy_result.clone());

        self.append_decision_evidence(
            &decision,
            serde_json::json!({
                "event": "decision.proposed",
                "kind": decision.proposal.kind,
                "payload": decision.proposal.payload,
                "effect": policy_result.effect,
                "matched_rule_id": policy_result.matched_rule_id,
                "risk_level": policy_result.risk_level,
                "risk_override": policy_result.risk_override,
            }),
        )?;
        self.decisions.put(&decision)?;

        match policy_result.effect {
            PolicyEffect::AutoApprove => {
                let rule = policy_result.matched_rule_id.as_deref().unwrap_or("default");
                decision.approve(format!("policy:{rule}"), None)?;
                self.append_decision_evidence(
                    &decision,
                    serde_json::json!({
                        "event": "decision.approved",
                        "decided_by": decision.decided_by,
                        "auto": true,
                    }),
                )?;
                self.decisions.put(&decision)?;
                self.execute(decision.id)?;
                self.decisions.get(decision.id)
            }
            PolicyEffect::Deny => {
                let rule = policy_result.matched_rule_id.as_deref().unwrap_or("default");
                decision.reject(
                    format!("policy:{rule}"),
                    Some(format!("denied by policy rule '{rule}'")),
                )?;
                self.append_decision_evidence(
                    &decision,
                    serde_json::json!({
                        "event": "decision.rejected",
                        "decided_by": decision.decided_by,
                        "auto": true,
                    }),
                )?;
                self.decisions.put(&decision)?;
                Ok(decision)
            }
            PolicyEffect::RequireApproval => Ok(decision),
        }
    }

    /// Record a human approval or rejection.
    ///
    /// Fails with `AlreadyDecided` unless the decision is Pending, and with
    /// `RbacDenied` unless the caller holds the approval capability for the
    /// proposal's org. Approval triggers execution.
    pub fn decide(
        &self,
        decision_id: uuid::Uuid,
        caller: &Caller,
        approve: bool,
        justification: Option<String>,
    ) -> Result<ActionDecision> {
        let mut decision = self.decisions.get(decision_id)?;
        caller.require_approval_capability(decision.org_id())?;

        if approve {
            decision.approve(caller.id.clone(), justification)?;
        } else {
            decision.reject(caller.id.clone(), justification)?;
        }
        self.append_decision_evidence(
            &decision,
            serde_json::json!({
                "event": if approve { "decision.approved" } else { "decision.rejected" },
                "decided_by": caller.id,
                "justification": decision.justification,
                "auto": false,
            }),
        )?;
        self.decisions.put(&decision)?;

        if approve {
            self.execute(decision.id)?;
            self.decisions.get(decision.id)
        } else {
            Ok(decision)
        }
    }

    /// Execute an approved decision through the adapter.
    ///
    /// Calling again after the decision reached Executed/Failed returns the
    /// stored execution — the prior result stands, duplicates are harmless.
    pub fn execute(&self, decision_id: uuid::Uuid) -> Result<ActionExecution> {
        self.execute_opts(decision_id, false)
    }

    pub fn execute_opts(&self, decision_id: uuid::Uuid, dry_run: bool) -> Result<ActionExecution> {
        let mut decision = self.decisions.get(decision_id)?;

        if dry_run {
            // Previews are allowed on any undecided-or-approved decision and
            // never mutate anything.
            if decision.status == DecisionStatus::Rejected {
                return Err(policy_denial(&decision).unwrap_or_else(|| {
                    WardenError::InvalidTransition {
                        from: decision.status.to_string(),
                        to: "executed".to_string(),
                        reason: "rejected decisions cannot be previewed".to_string(),
                    }
                }));
            }
            return self.adapter.dispatch(&decision, true);
        }

        match decision.status {
            DecisionStatus::Executed | DecisionStatus::Failed => {
                // Duplicate call: surface the existing result.
                return self
                    .adapter
                    .executions()
                    .get(decision.id)?
                    .ok_or_else(|| WardenError::AlreadyExecuted(decision.id.to_string()));
            }
            DecisionStatus::Approved => {}
            DecisionStatus::Rejected => {
                return Err(policy_denial(&decision).unwrap_or_else(|| {
                    WardenError::InvalidTransition {
                        from: decision.status.to_string(),
                        to: "executed".to_string(),
                        reason: "only approved decisions can be executed".to_string(),
                    }
                }));
            }
            DecisionStatus::Pending => {
                return Err(WardenError::InvalidTransition {
                    from: decision.status.to_string(),
                    to: "executed".to_string(),
                    reason: "only approved decisions can be executed".to_string(),
                });
            }
        }

        let execution = self.adapter.dispatch(&decision, false)?;

        if execution.result.success {
            decision.mark_executed()?;
        } else {
            decision.mark_failed()?;
        }
        self.append_decision_evidence(
            &decision,
            serde_json::json!({
                "event": if execution.result.success { "decision.executed" } else { "decision.failed" },
                "execution_id": execution.id,
                "error": execution.result.error,
            }),
        )?;
        self.decisions.put(&decision)?;

        Ok(execution)
    }

    fn append_decision_evidence(
        &self,
        decision: &ActionDecision,
        content: serde_json::Value,
    ) -> Result<()> {
        self.ledger
            .append(decision.org_id(), "decision", &decision.id.to_string(), content)?;
        Ok(())
    }
}

/// When the policy engine was the rejecting principal, executing the
/// decision surfaces the matched rule as `PolicyDenied` instead of a generic
/// transition error.
fn policy_denial(decision: &ActionDecision) -> Option<WardenError> {
    let rule_id = decision.decided_by.as_deref()?.strip_prefix("policy:")?;
    Some(WardenError::PolicyDenied {
        rule_id: rule_id.to_string(),
        reason: decision
            .justification
            .clone()
            .unwrap_or_else(|| "denied by policy".to_string()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
