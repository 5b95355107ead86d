//! Pluggable executors and the idempotent execution adapter.
//!
//! Executors are injected trait objects; the core never knows their
//! internals. Selection is a closed tagged dispatch on `ExecutorKind` through
//! `ExecutorRegistry` — adding a capability means adding a variant and a
//! registry slot, both compile-checked.
//!
//! `ExecutionAdapter::dispatch` is where exactly-once effective execution
//! lives: an existing row for the idempotency key short-circuits before the
//! executor is ever invoked, and a lost insert race returns the winning row.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::decision::ActionDecision;
use crate::error::{Result, WardenError};
use crate::execution::{ActionExecution, ExecutionResult, ExecutionStore};
use crate::ledger::EvidenceLedger;
use crate::proposal::ActionProposal;
use crate::types::ExecutorKind;

// ---------------------------------------------------------------------------
// Executor contract
// ---------------------------------------------------------------------------

/// Executor-level failure. Caught and stored as a `Failed` execution, never
/// re-thrown to the caller.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ExecutorError(pub String);

pub trait Executor: Send + Sync {
    /// Perform the real-world effect. Must be safe to call at most once per
    /// idempotency key; the adapter guarantees it is.
    fn execute(
        &self,
        proposal: &ActionProposal,
    ) -> std::result::Result<serde_json::Value, ExecutorError>;

    /// Describe what `execute` would do, without side effects. Used by
    /// dry-run previews.
    fn preview(
        &self,
        proposal: &ActionProposal,
    ) -> std::result::Result<serde_json::Value, ExecutorError> {
        Ok(serde_json::json!({
            "kind": proposal.kind.as_str(),
            "payload": proposal.payload,
        }))
    }
}

/// Demo executor that records the payload it was handed. Stands in for the
/// product's task/meeting executors in the CLI and in tests.
pub struct EchoExecutor;

impl Executor for EchoExecutor {
    fn execute(
        &self,
        proposal: &ActionProposal,
    ) -> std::result::Result<serde_json::Value, ExecutorError> {
        Ok(serde_json::json!({
            "executed": proposal.kind.as_str(),
            "payload": proposal.payload,
        }))
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

/// One slot per `ExecutorKind`. Constructor-injected; no global registry.
pub struct ExecutorRegistry {
    task: Box<dyn Executor>,
    meeting: Box<dyn Executor>,
    playbook_step: Box<dyn Executor>,
}

impl ExecutorRegistry {
    pub fn new(
        task: Box<dyn Executor>,
        meeting: Box<dyn Executor>,
        playbook_step: Box<dyn Executor>,
    ) -> Self {
        Self {
            task,
            meeting,
            playbook_step,
        }
    }

    /// All three slots backed by `EchoExecutor`.
    pub fn echo() -> Self {
        Self::new(Box::new(EchoExecutor), Box::new(EchoExecutor), Box::new(EchoExecutor))
    }

    pub fn resolve(&self, kind: ExecutorKind) -> &dyn Executor {
        match kind {
            ExecutorKind::Task => self.task.as_ref(),
            ExecutorKind::Meeting => self.meeting.as_ref(),
            ExecutorKind::PlaybookStep => self.playbook_step.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionAdapter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ExecutionAdapter {
    executions: ExecutionStore,
    registry: Arc<ExecutorRegistry>,
    ledger: EvidenceLedger,
    /// Per-key dispatch locks. Concurrent callers for the same key serialize
    /// here so the executor runs once; callers for different keys don't
    /// contend.
    key_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl ExecutionAdapter {
    pub fn new(
        executions: ExecutionStore,
        registry: Arc<ExecutorRegistry>,
        ledger: EvidenceLedger,
    ) -> Self {
        Self {
            executions,
            registry,
            ledger,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, key: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(key).or_default().clone()
    }

    pub fn executions(&self) -> &ExecutionStore {
        &self.executions
    }

    /// Dispatch a decision's proposal. Idempotency key = decision id.
    pub fn dispatch(&self, decision: &ActionDecision, dry_run: bool) -> Result<ActionExecution> {
        self.dispatch_keyed(decision.id, Some(decision.id), &decision.proposal, dry_run)
    }

    /// Dispatch with an explicit idempotency key. The playbook routing engine
    /// derives keys from `(run, step, iteration)` so job replays after a
    /// crash collapse onto the stored result.
    pub fn dispatch_keyed(
        &self,
        idempotency_key: Uuid,
        decision_id: Option<Uuid>,
        proposal: &ActionProposal,
        dry_run: bool,
    ) -> Result<ActionExecution> {
        let executor = self.registry.resolve(proposal.kind);

        if dry_run {
            let started_at = Utc::now();
            // Previews persist nothing — no execution row, no evidence — so
            // a failed preview has no stored result to carry it and
            // propagates as an error instead.
            let output = executor
                .preview(proposal)
                .map_err(|e| WardenError::ExecutionFailed(format!("preview failed: {e}")))?;
            return Ok(ActionExecution {
                id: Uuid::new_v4(),
                decision_id,
                executor_kind: proposal.kind,
                idempotency_key,
                result: ExecutionResult::ok(output),
                started_at,
                completed_at: Utc::now(),
                archived_at: None,
            });
        }

        // Serialize per key: a prior call (or a duplicate async delivery)
        // already produced the result, and concurrent callers wait for the
        // first invocation instead of racing the executor.
        let lock = self.lock_for(idempotency_key);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(existing) = self.executions.get(idempotency_key)? {
            return Ok(existing);
        }

        let started_at = Utc::now();
        let result = match executor.execute(proposal) {
            Ok(output) => ExecutionResult::ok(output),
            Err(e) => {
                tracing::warn!(kind = %proposal.kind, error = %e, "executor failed");
                ExecutionResult::failed(e.to_string())
            }
        };
        let execution = ActionExecution {
            id: Uuid::new_v4(),
            decision_id,
            executor_kind: proposal.kind,
            idempotency_key,
            result,
            started_at,
            completed_at: Utc::now(),
            archived_at: None,
        };

        // Write-ahead: the evidence entry lands before the execution row is
        // committed. A ledger failure aborts the whole dispatch.
        self.ledger.append(
            &proposal.source_context.org_id,
            "execution",
            &execution.id.to_string(),
            serde_json::json!({
                "event": "execution.recorded",
                "idempotency_key": idempotency_key,
                "decision_id": decision_id,
                "executor_kind": proposal.kind,
                "success": execution.result.success,
                "error": execution.result.error,
            }),
        )?;

        let (winner, _created) = self.executions.insert_if_absent(&execution)?;
        Ok(winner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::ActionDecision;
    use crate::policy::PolicySet;
    use crate::rbac::Role;
    use crate::store::open_db;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct CountingExecutor(Arc<AtomicU32>);

    impl Executor for CountingExecutor {
        fn execute(
            &self,
            _proposal: &ActionProposal,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(serde_json::json!({"invocation": n}))
        }
    }

    struct FailingExecutor;

    impl Executor for FailingExecutor {
        fn execute(
            &self,
            _proposal: &ActionProposal,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            Err(ExecutorError("calendar unavailable".into()))
        }
    }

    struct NoPreviewExecutor;

    impl Executor for NoPreviewExecutor {
        fn execute(
            &self,
            _proposal: &ActionProposal,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            Ok(serde_json::json!({}))
        }

        fn preview(
            &self,
            _proposal: &ActionProposal,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            Err(ExecutorError("target does not support previews".into()))
        }
    }

    fn adapter_with(registry: ExecutorRegistry) -> (TempDir, ExecutionAdapter) {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir.path().join("test.db")).unwrap();
        let adapter = ExecutionAdapter::new(
            ExecutionStore::new(db.clone()).unwrap(),
            Arc::new(registry),
            EvidenceLedger::new(db).unwrap(),
        );
        (dir, adapter)
    }

    fn approved_decision(kind: ExecutorKind) -> ActionDecision {
        let proposal = ActionProposal::new(kind, serde_json::json!({"title": "t"}), "org-1");
        let result = PolicySet::empty().evaluate(&proposal, Role::Operator);
        let mut d = ActionDecision::new(proposal, result);
        d.approve("alice", None).unwrap();
        d
    }

    #[test]
    fn dispatch_twice_invokes_executor_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ExecutorRegistry::new(
            Box::new(CountingExecutor(calls.clone())),
            Box::new(EchoExecutor),
            Box::new(EchoExecutor),
        );
        let (_dir, adapter) = adapter_with(registry);
        let decision = approved_decision(ExecutorKind::Task);

        let first = adapter.dispatch(&decision, false).unwrap();
        let second = adapter.dispatch(&decision, false).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second, "both callers receive the identical result");
        assert_eq!(adapter.executions().list().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_dispatch_is_exactly_once_effective() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ExecutorRegistry::new(
            Box::new(CountingExecutor(calls.clone())),
            Box::new(EchoExecutor),
            Box::new(EchoExecutor),
        );
        let (_dir, adapter) = adapter_with(registry);
        let decision = approved_decision(ExecutorKind::Task);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let adapter = adapter.clone();
            let decision = decision.clone();
            handles.push(std::thread::spawn(move || {
                adapter.dispatch(&decision, false).unwrap()
            }));
        }
        let results: Vec<ActionExecution> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "one executor invocation");
        assert_eq!(adapter.executions().list().unwrap().len(), 1);
        for r in &results[1..] {
            assert_eq!(r, &results[0], "every caller sees the same execution");
        }
    }

    #[test]
    fn executor_failure_is_a_stored_terminal_result() {
        let registry = ExecutorRegistry::new(
            Box::new(EchoExecutor),
            Box::new(FailingExecutor),
            Box::new(EchoExecutor),
        );
        let (_dir, adapter) = adapter_with(registry);
        let decision = approved_decision(ExecutorKind::Meeting);

        let execution = adapter.dispatch(&decision, false).unwrap();
        assert!(!execution.result.success);
        assert_eq!(execution.result.error.as_deref(), Some("calendar unavailable"));
        // The failure is stored, so a retry returns the same terminal result.
        let again = adapter.dispatch(&decision, false).unwrap();
        assert_eq!(again, execution);
    }

    #[test]
    fn failed_preview_propagates_and_persists_nothing() {
        let registry = ExecutorRegistry::new(
            Box::new(NoPreviewExecutor),
            Box::new(EchoExecutor),
            Box::new(EchoExecutor),
        );
        let (_dir, adapter) = adapter_with(registry);
        let decision = approved_decision(ExecutorKind::Task);

        let err = adapter.dispatch(&decision, true).unwrap_err();
        assert!(matches!(err, WardenError::ExecutionFailed(_)));
        assert!(adapter.executions().list().unwrap().is_empty());
    }

    #[test]
    fn dry_run_persists_nothing() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ExecutorRegistry::new(
            Box::new(CountingExecutor(calls.clone())),
            Box::new(EchoExecutor),
            Box::new(EchoExecutor),
        );
        let (_dir, adapter) = adapter_with(registry);
        let decision = approved_decision(ExecutorKind::Task);

        let preview = adapter.dispatch(&decision, true).unwrap();
        assert!(preview.result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "execute() never runs");
        assert!(adapter.executions().list().unwrap().is_empty());
        assert!(
            adapter.executions().get(decision.id).unwrap().is_none(),
            "no row persisted for the idempotency key"
        );
    }

    #[test]
    fn dispatch_writes_evidence_before_committing() {
        let (_dir, adapter) = adapter_with(ExecutorRegistry::echo());
        let decision = approved_decision(ExecutorKind::Task);
        adapter.dispatch(&decision, false).unwrap();

        let entries = adapter.ledger.entries("org-1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject_type, "execution");
        assert_eq!(entries[0].content["event"], "execution.recorded");
    }
}
