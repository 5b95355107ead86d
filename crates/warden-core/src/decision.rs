//! Action decisions: the governance record tracking approval of a proposal.
//!
//! A decision embeds a copy of its proposal (not a live reference) and is
//! mutated only through the transition methods below. Invalid moves fail with
//! `AlreadyDecided` / `InvalidTransition` rather than silently overwriting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::policy::PolicyResult;
use crate::proposal::ActionProposal;
use crate::store::store_err;
use crate::types::DecisionStatus;

/// Key: decision uuid (16 bytes). Value: JSON-encoded ActionDecision.
const DECISIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("decisions");

// ---------------------------------------------------------------------------
// ActionDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecision {
    pub id: Uuid,
    /// Immutable snapshot of the proposal as it was decided on.
    pub proposal: ActionProposal,
    pub status: DecisionStatus,
    pub policy_result: PolicyResult,
    /// Human id, or `policy:<rule_id>` for auto-approvals/denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// Set by the retention sweep; archived decisions are excluded from
    /// future sweeps and from default listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl ActionDecision {
    pub fn new(proposal: ActionProposal, policy_result: PolicyResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposal,
            status: DecisionStatus::Pending,
            policy_result,
            decided_by: None,
            justification: None,
            created_at: Utc::now(),
            decided_at: None,
            archived_at: None,
        }
    }

    pub fn org_id(&self) -> &str {
        &self.proposal.source_context.org_id
    }

    /// Pending → Approved.
    pub fn approve(&mut self, by: impl Into<String>, justification: Option<String>) -> Result<()> {
        self.require_pending()?;
        self.status = DecisionStatus::Approved;
        self.decided_by = Some(by.into());
        self.justification = justification;
        self.decided_at = Some(Utc::now());
        Ok(())
    }

    /// Pending → Rejected.
    pub fn reject(&mut self, by: impl Into<String>, justification: Option<String>) -> Result<()> {
        self.require_pending()?;
        self.status = DecisionStatus::Rejected;
        self.decided_by = Some(by.into());
        self.justification = justification;
        self.decided_at = Some(Utc::now());
        Ok(())
    }

    /// Approved → Executed.
    pub fn mark_executed(&mut self) -> Result<()> {
        self.require_approved("executed")?;
        self.status = DecisionStatus::Executed;
        Ok(())
    }

    /// Approved → Failed.
    pub fn mark_failed(&mut self) -> Result<()> {
        self.require_approved("failed")?;
        self.status = DecisionStatus::Failed;
        Ok(())
    }

    fn require_pending(&self) -> Result<()> {
        if self.status == DecisionStatus::Pending {
            Ok(())
        } else {
            Err(WardenError::AlreadyDecided(self.id.to_string()))
        }
    }

    fn require_approved(&self, to: &str) -> Result<()> {
        if self.status == DecisionStatus::Approved {
            Ok(())
        } else {
            Err(WardenError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
                reason: "only approved decisions can be executed".to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// DecisionStore
// ---------------------------------------------------------------------------

/// Persistent store for `ActionDecision` records.
#[derive(Clone)]
pub struct DecisionStore {
    db: Arc<Database>,
}

impl DecisionStore {
    /// Attach to the shared database, creating the table if needed.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(DECISIONS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    /// Insert or overwrite a decision record.
    pub fn put(&self, decision: &ActionDecision) -> Result<()> {
        let value = serde_json::to_vec(decision)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(DECISIONS).map_err(store_err)?;
            table
                .insert(decision.id.as_bytes().as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<ActionDecision> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(DECISIONS).map_err(store_err)?;
        let guard = table
            .get(id.as_bytes().as_slice())
            .map_err(store_err)?
            .ok_or_else(|| WardenError::DecisionNotFound(id.to_string()))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    /// List all decisions, newest first. Archived records are included;
    /// callers filter on `archived_at` where it matters.
    pub fn list(&self) -> Result<Vec<ActionDecision>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(DECISIONS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice::<ActionDecision>(v.value())?);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
