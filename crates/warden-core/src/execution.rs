//! Execution records and the uniqueness constraint behind exactly-once
//! effective execution.
//!
//! Executions are keyed by their idempotency key (the decision id for direct
//! executes, a derived key for playbook steps). `insert_if_absent` performs
//! the check-and-insert inside one write transaction, so two racing callers
//! agree on a single surviving row and both observe the same result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::store::store_err;
use crate::types::ExecutorKind;

/// Key: idempotency key uuid (16 bytes). Value: JSON-encoded ActionExecution.
const EXECUTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("executions");

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Terminal result of one executor invocation. Executor-level failures are
/// stored here, not raised — the caller always gets a definite result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Outcome label used by playbook transition selection.
    pub fn outcome_label(&self) -> &'static str {
        if self.success {
            "success"
        } else {
            "failure"
        }
    }
}

// ---------------------------------------------------------------------------
// ActionExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: Uuid,
    /// Present for decision-driven executions; `None` for playbook-step
    /// dispatches, which are keyed by a derived idempotency key instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<Uuid>,
    pub executor_kind: ExecutorKind,
    pub idempotency_key: Uuid,
    pub result: ExecutionResult,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ExecutionStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ExecutionStore {
    db: Arc<Database>,
}

impl ExecutionStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(EXECUTIONS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    /// Insert unless a row with the same idempotency key already exists.
    ///
    /// Returns the surviving record and whether this call created it. The
    /// read and the insert share one write transaction, which makes this the
    /// atomic compare-and-set the exactly-once property rests on.
    pub fn insert_if_absent(&self, execution: &ActionExecution) -> Result<(ActionExecution, bool)> {
        let key = execution.idempotency_key;
        let wt = self.db.begin_write().map_err(store_err)?;
        let outcome = {
            let mut table = wt.open_table(EXECUTIONS).map_err(store_err)?;
            let existing = table
                .get(key.as_bytes().as_slice())
                .map_err(store_err)?
                .map(|g| serde_json::from_slice::<ActionExecution>(g.value()))
                .transpose()?;
            match existing {
                Some(prior) => (prior, false),
                None => {
                    let value = serde_json::to_vec(execution)?;
                    table
                        .insert(key.as_bytes().as_slice(), value.as_slice())
                        .map_err(store_err)?;
                    (execution.clone(), true)
                }
            }
        };
        wt.commit().map_err(store_err)?;
        Ok(outcome)
    }

    pub fn get(&self, idempotency_key: Uuid) -> Result<Option<ActionExecution>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(EXECUTIONS).map_err(store_err)?;
        let found = table
            .get(idempotency_key.as_bytes().as_slice())
            .map_err(store_err)?
            .map(|g| serde_json::from_slice::<ActionExecution>(g.value()))
            .transpose()?;
        Ok(found)
    }

    /// Overwrite an existing record (used by the retention sweep to set
    /// `archived_at`; the result itself is never rewritten).
    pub fn put(&self, execution: &ActionExecution) -> Result<()> {
        let value = serde_json::to_vec(execution)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(EXECUTIONS).map_err(store_err)?;
            table
                .insert(execution.idempotency_key.as_bytes().as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ActionExecution>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(EXECUTIONS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice::<ActionExecution>(v.value())?);
        }
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
