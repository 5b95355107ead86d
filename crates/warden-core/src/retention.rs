//! Retention sweep: archives stale governance records and hard-deletes stale
//! evidence partitions.
//!
//! Decisions and executions are archived in place (`archived_at` set, the
//! record kept) so past decisions stay auditable. Evidence is different:
//! removing a prefix of a partition would break its hash chain, so evidence
//! is deleted a whole partition at a time, and only once every entry in the
//! partition is past the horizon.
//!
//! The sweep is idempotent — already-archived records are skipped, so running
//! it twice archives nothing new.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetentionConfig;
use crate::decision::DecisionStore;
use crate::error::Result;
use crate::execution::ExecutionStore;
use crate::ledger::EvidenceLedger;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub decisions_archived: u64,
    pub executions_archived: u64,
    pub evidence_partitions_deleted: u64,
    pub evidence_entries_deleted: u64,
    pub dry_run: bool,
}

pub struct RetentionSweep {
    decisions: DecisionStore,
    executions: ExecutionStore,
    ledger: EvidenceLedger,
    config: RetentionConfig,
}

impl RetentionSweep {
    pub fn new(
        decisions: DecisionStore,
        executions: ExecutionStore,
        ledger: EvidenceLedger,
        config: RetentionConfig,
    ) -> Self {
        Self {
            decisions,
            executions,
            ledger,
            config,
        }
    }

    /// Run one sweep as of `now`. With `dry_run` the report counts what
    /// would happen and nothing is written.
    pub fn sweep(&self, now: DateTime<Utc>, dry_run: bool) -> Result<RetentionReport> {
        let decision_cutoff = now - Duration::days(self.config.decision_days);
        let evidence_cutoff = now - Duration::days(self.config.evidence_days);
        let mut report = RetentionReport {
            dry_run,
            ..Default::default()
        };

        for mut decision in self.decisions.list()? {
            if decision.archived_at.is_some() || !decision.status.is_terminal() {
                continue;
            }
            let settled = decision.decided_at.unwrap_or(decision.created_at);
            if settled >= decision_cutoff {
                continue;
            }
            report.decisions_archived += 1;
            if !dry_run {
                decision.archived_at = Some(now);
                self.decisions.put(&decision)?;
            }
        }

        for mut execution in self.executions.list()? {
            if execution.archived_at.is_some() || execution.completed_at >= decision_cutoff {
                continue;
            }
            report.executions_archived += 1;
            if !dry_run {
                execution.archived_at = Some(now);
                self.executions.put(&execution)?;
            }
        }

        for partition in self.ledger.partitions()? {
            // The newest entry gates the whole partition.
            let Some(last) = self.ledger.last_entry_at(&partition)? else {
                continue;
            };
            if last >= evidence_cutoff {
                continue;
            }
            report.evidence_partitions_deleted += 1;
            if dry_run {
                report.evidence_entries_deleted += self.ledger.entries(&partition)?.len() as u64;
            } else {
                report.evidence_entries_deleted += self.ledger.delete_partition(&partition)?;
                tracing::info!(partition, "deleted stale evidence partition");
            }
        }

        tracing::info!(
            dry_run,
            decisions = report.decisions_archived,
            executions = report.executions_archived,
            partitions = report.evidence_partitions_deleted,
            "retention sweep finished"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::ActionDecision;
    use crate::execution::{ActionExecution, ExecutionResult};
    use crate::policy::PolicySet;
    use crate::proposal::ActionProposal;
    use crate::rbac::Role;
    use crate::store::open_db;
    use crate::types::ExecutorKind;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn setup() -> (TempDir, RetentionSweep, DecisionStore, ExecutionStore, EvidenceLedger) {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir.path().join("test.db")).unwrap();
        let decisions = DecisionStore::new(db.clone()).unwrap();
        let executions = ExecutionStore::new(db.clone()).unwrap();
        let ledger = EvidenceLedger::new(db).unwrap();
        let sweep = RetentionSweep::new(
            decisions.clone(),
            executions.clone(),
            ledger.clone(),
            RetentionConfig {
                decision_days: 730,
                evidence_days: 1095,
            },
        );
        (dir, sweep, decisions, executions, ledger)
    }

    fn decision_aged(days_ago: i64, terminal: bool) -> ActionDecision {
        let proposal =
            ActionProposal::new(ExecutorKind::Task, serde_json::json!({"title": "t"}), "org-1");
        let result = PolicySet::empty().evaluate(&proposal, Role::Operator);
        let mut d = ActionDecision::new(proposal, result);
        d.created_at = Utc::now() - Duration::days(days_ago);
        if terminal {
            d.approve("alice", None).unwrap();
            d.mark_executed().unwrap();
            d.decided_at = Some(d.created_at);
        }
        d
    }

    fn execution_aged(days_ago: i64) -> ActionExecution {
        let ts = Utc::now() - Duration::days(days_ago);
        ActionExecution {
            id: Uuid::new_v4(),
            decision_id: None,
            executor_kind: ExecutorKind::Task,
            idempotency_key: Uuid::new_v4(),
            result: ExecutionResult::ok(serde_json::json!({})),
            started_at: ts,
            completed_at: ts,
            archived_at: None,
        }
    }

    #[test]
    fn archives_only_stale_terminal_decisions() {
        let (_dir, sweep, decisions, _, _) = setup();
        let stale_terminal = decision_aged(800, true);
        let stale_pending = decision_aged(800, false);
        let fresh_terminal = decision_aged(10, true);
        for d in [&stale_terminal, &stale_pending, &fresh_terminal] {
            decisions.put(d).unwrap();
        }

        let report = sweep.sweep(Utc::now(), false).unwrap();
        assert_eq!(report.decisions_archived, 1);
        assert!(decisions.get(stale_terminal.id).unwrap().archived_at.is_some());
        assert!(decisions.get(stale_pending.id).unwrap().archived_at.is_none());
        assert!(decisions.get(fresh_terminal.id).unwrap().archived_at.is_none());
    }

    #[test]
    fn archives_stale_executions() {
        let (_dir, sweep, _, executions, _) = setup();
        let stale = execution_aged(800);
        let fresh = execution_aged(10);
        executions.insert_if_absent(&stale).unwrap();
        executions.insert_if_absent(&fresh).unwrap();

        let report = sweep.sweep(Utc::now(), false).unwrap();
        assert_eq!(report.executions_archived, 1);
        assert!(executions.get(stale.idempotency_key).unwrap().unwrap().archived_at.is_some());
        assert!(executions.get(fresh.idempotency_key).unwrap().unwrap().archived_at.is_none());
    }

    #[test]
    fn sweep_is_idempotent() {
        let (_dir, sweep, decisions, _, _) = setup();
        decisions.put(&decision_aged(800, true)).unwrap();

        let first = sweep.sweep(Utc::now(), false).unwrap();
        assert_eq!(first.decisions_archived, 1);
        let second = sweep.sweep(Utc::now(), false).unwrap();
        assert_eq!(second.decisions_archived, 0, "already archived");
    }

    #[test]
    fn dry_run_counts_without_mutating() {
        let (_dir, sweep, decisions, _, ledger) = setup();
        let stale = decision_aged(800, true);
        decisions.put(&stale).unwrap();
        ledger
            .append("org-old", "decision", "d", serde_json::json!({"n": 1}))
            .unwrap();

        let later = Utc::now() + Duration::days(2000);
        let report = sweep.sweep(later, true).unwrap();
        assert_eq!(report.decisions_archived, 1);
        assert_eq!(report.evidence_partitions_deleted, 1);
        assert_eq!(report.evidence_entries_deleted, 1);

        assert!(decisions.get(stale.id).unwrap().archived_at.is_none());
        assert_eq!(ledger.entries("org-old").unwrap().len(), 1);

        // The real sweep afterwards performs exactly what the dry run counted.
        let real = sweep.sweep(later, false).unwrap();
        assert_eq!(real.decisions_archived, report.decisions_archived);
        assert_eq!(real.evidence_entries_deleted, report.evidence_entries_deleted);
        assert!(ledger.entries("org-old").unwrap().is_empty());
    }

    #[test]
    fn partition_with_any_fresh_entry_survives() {
        let (_dir, sweep, _, _, ledger) = setup();
        ledger
            .append("org-1", "decision", "d", serde_json::json!({"n": 1}))
            .unwrap();

        // Newest entry is recent, so even a sweep far in the future of the
        // first entry keeps the partition intact.
        let report = sweep.sweep(Utc::now(), false).unwrap();
        assert_eq!(report.evidence_partitions_deleted, 0);
        assert!(ledger.verify_chain("org-1").unwrap());
    }
}
