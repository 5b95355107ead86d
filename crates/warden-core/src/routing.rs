//! Playbook runs and the routing engine that advances them.
//!
//! The engine never walks a playbook synchronously: every hop is an
//! `AdvancePlaybook` job, so a run survives process restarts and a crashed
//! worker just means the job is re-queued. One job advances exactly one step;
//! the successful advance persists the run and enqueues the next hop in a
//! single write transaction, so a Running run always has its current hop in
//! the queue.
//!
//! Replay safety: job payloads carry the step and visit number they were
//! enqueued for. A replayed job whose run has already moved past that step is
//! a no-op, and Action steps dispatch with an idempotency key derived from
//! `(run, step, visit)` so a replay that does reach the executor collapses
//! onto the stored result.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::executor::ExecutionAdapter;
use crate::jobs::{JobKind, JobQueue, JobStatus};
use crate::ledger::EvidenceLedger;
use crate::playbook::{StepKind, StepTarget, TemplateStore};
use crate::proposal::ActionProposal;
use crate::store::store_err;
use crate::types::RunStatus;

/// Key: run uuid (16 bytes). Value: JSON-encoded PlaybookRun.
const RUNS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("runs");

/// Idempotency key for an Action step dispatch. Stable across job replays:
/// the same `(run, step, visit)` always derives the same key.
fn step_dispatch_key(run_id: Uuid, step_id: &str, visit: u32) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(step_id.as_bytes());
    hasher.update(visit.to_be_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// The visit number the run's current step is about to be entered with.
fn next_visit(run: &PlaybookRun) -> u32 {
    run.step_visits.get(&run.current_step).copied().unwrap_or(0) + 1
}

// ---------------------------------------------------------------------------
// PlaybookRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookRun {
    pub id: Uuid,
    pub template_id: Uuid,
    pub org_id: String,
    pub status: RunStatus,
    pub current_step: String,
    /// Scratch state visible to Check and Branch predicates. Action steps
    /// record their outcome here under the step id.
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Times each step has been entered, for loop budgets.
    pub step_visits: BTreeMap<String, u32>,
    /// Set by `resume`, consumed by the next advance of a Wait step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlaybookRun {
    fn new(
        template_id: Uuid,
        org_id: impl Into<String>,
        entry: impl Into<String>,
        variables: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            template_id,
            org_id: org_id.into(),
            status: RunStatus::Running,
            current_step: entry.into(),
            variables,
            step_visits: BTreeMap::new(),
            resume_event: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RunStore {
    db: Arc<Database>,
}

impl RunStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(RUNS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    pub fn put(&self, run: &PlaybookRun) -> Result<()> {
        let value = serde_json::to_vec(run)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(RUNS).map_err(store_err)?;
            table
                .insert(run.id.as_bytes().as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<PlaybookRun> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(RUNS).map_err(store_err)?;
        let guard = table
            .get(id.as_bytes().as_slice())
            .map_err(store_err)?
            .ok_or_else(|| WardenError::RunNotFound(id.to_string()))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    /// All runs, newest first.
    pub fn list(&self) -> Result<Vec<PlaybookRun>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(RUNS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice::<PlaybookRun>(v.value())?);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// RoutingEngine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RoutingEngine {
    templates: TemplateStore,
    runs: RunStore,
    adapter: ExecutionAdapter,
    queue: JobQueue,
    ledger: EvidenceLedger,
}

impl RoutingEngine {
    pub fn new(
        templates: TemplateStore,
        runs: RunStore,
        adapter: ExecutionAdapter,
        queue: JobQueue,
        ledger: EvidenceLedger,
    ) -> Self {
        Self {
            templates,
            runs,
            adapter,
            queue,
            ledger,
        }
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Start a run at the template's entry step and enqueue its first hop.
    pub fn start(
        &self,
        template_id: Uuid,
        org_id: &str,
        variables: serde_json::Map<String, serde_json::Value>,
    ) -> Result<PlaybookRun> {
        let template = self.templates.get(template_id)?;
        let run = PlaybookRun::new(template_id, org_id, template.entry.clone(), variables);
        self.record(&run, "run.started", serde_json::json!({
            "template_id": template_id,
            "template_name": template.name,
            "entry": template.entry,
        }))?;
        self.commit_hop(&run)?;
        tracing::info!(run = %run.id, template = %template.name, "playbook run started");
        Ok(run)
    }

    /// Deliver an external event to a `Waiting` run and re-queue it.
    pub fn resume(&self, run_id: Uuid, event: &str) -> Result<PlaybookRun> {
        let mut run = self.runs.get(run_id)?;
        if run.status != RunStatus::Waiting {
            return Err(WardenError::InvalidTransition {
                from: run.status.to_string(),
                to: RunStatus::Running.to_string(),
                reason: "only a waiting run can be resumed".into(),
            });
        }
        run.status = RunStatus::Running;
        run.resume_event = Some(event.to_string());
        run.updated_at = Utc::now();
        self.record(&run, "run.resumed", serde_json::json!({
            "step": run.current_step,
            "event": event,
        }))?;
        self.commit_hop(&run)?;
        Ok(run)
    }

    /// Advance the run by one step. This is the `AdvancePlaybook` job
    /// handler; `expected_step`/`expected_visit` come from the job payload
    /// and make replays of already-consumed hops no-ops.
    pub fn advance(
        &self,
        run_id: Uuid,
        expected_step: &str,
        expected_visit: u32,
    ) -> Result<PlaybookRun> {
        let mut run = self.runs.get(run_id)?;
        if run.status.is_terminal() || run.status == RunStatus::Waiting {
            return Ok(run);
        }
        let visit = next_visit(&run);
        if run.current_step != expected_step || visit != expected_visit {
            // Stale replay: this hop was already consumed. A Running run
            // must always have its current hop in the queue; restore it if
            // the queue lost it.
            if !self.hop_queued(&run)? {
                self.enqueue_hop(&run)?;
            }
            return Ok(run);
        }

        let template = self.templates.get(run.template_id)?;
        let step = template.step(&run.current_step)?.clone();

        if let Some(max) = step.max_iterations {
            if visit > max {
                return self.fail_run(run, format!(
                    "step '{}' exceeded its iteration budget of {max}",
                    step.id
                ));
            }
        }

        let label = match &step.kind {
            StepKind::Action { kind, payload } => {
                let key = step_dispatch_key(run.id, &step.id, visit);
                let proposal = ActionProposal::new(*kind, payload.clone(), run.org_id.clone());
                let execution = self.adapter.dispatch_keyed(key, None, &proposal, false)?;
                run.variables.insert(
                    step.id.clone(),
                    serde_json::json!({
                        "success": execution.result.success,
                        "output": execution.result.output,
                        "error": execution.result.error,
                    }),
                );
                execution.result.outcome_label().to_string()
            }
            StepKind::Check { condition } => {
                if condition.eval(&run.variables) {
                    "true".to_string()
                } else {
                    "false".to_string()
                }
            }
            StepKind::Branch { cases } => cases
                .iter()
                .find(|c| c.condition.eval(&run.variables))
                .map(|c| c.label.clone())
                .unwrap_or_else(|| "default".to_string()),
            StepKind::Wait => match run.resume_event.take() {
                Some(event) => {
                    run.variables
                        .insert("last_event".into(), serde_json::Value::String(event));
                    "resumed".to_string()
                }
                None => {
                    // Suspend. The visit is not consumed; the resume replays it.
                    run.status = RunStatus::Waiting;
                    run.updated_at = Utc::now();
                    self.record(&run, "run.waiting", serde_json::json!({
                        "step": step.id,
                    }))?;
                    self.runs.put(&run)?;
                    return Ok(run);
                }
            },
        };

        run.step_visits.insert(step.id.clone(), visit);
        let Some(target) = step.transitions.get(&label) else {
            // Save-time validation makes this unreachable for stored
            // templates; fail the run rather than loop forever.
            return self.fail_run(run, format!(
                "step '{}' produced label '{label}' with no transition",
                step.id
            ));
        };

        match target {
            StepTarget::Terminal => {
                run.status = RunStatus::Completed;
                run.updated_at = Utc::now();
                self.record(&run, "run.completed", serde_json::json!({
                    "final_step": step.id,
                    "label": label,
                }))?;
                self.runs.put(&run)?;
                tracing::info!(run = %run.id, "playbook run completed");
            }
            StepTarget::Step { id: next } => {
                run.current_step = next.clone();
                run.updated_at = Utc::now();
                self.record(&run, "run.advanced", serde_json::json!({
                    "from": step.id,
                    "to": next,
                    "label": label,
                }))?;
                self.commit_hop(&run)?;
            }
        }
        Ok(run)
    }

    fn hop_payload(run: &PlaybookRun) -> serde_json::Value {
        serde_json::json!({
            "run_id": run.id,
            "step": run.current_step,
            "visit": next_visit(run),
        })
    }

    /// Persist the run and enqueue its current hop in one write transaction,
    /// so a crash can never separate the state from its job.
    fn commit_hop(&self, run: &PlaybookRun) -> Result<Uuid> {
        let value = serde_json::to_vec(run)?;
        let wt = self.runs.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(RUNS).map_err(store_err)?;
            table
                .insert(run.id.as_bytes().as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        let job_id = self
            .queue
            .enqueue_in(&wt, JobKind::AdvancePlaybook, Self::hop_payload(run))?;
        wt.commit().map_err(store_err)?;
        Ok(job_id)
    }

    /// Enqueue the job for the run's current hop. Recovery path only;
    /// normal advancement goes through `commit_hop`.
    fn enqueue_hop(&self, run: &PlaybookRun) -> Result<Uuid> {
        self.queue
            .enqueue(JobKind::AdvancePlaybook, Self::hop_payload(run))
    }

    /// Whether a live job for the run's current hop is in the queue.
    fn hop_queued(&self, run: &PlaybookRun) -> Result<bool> {
        let visit = next_visit(run);
        for job in self.queue.list()? {
            if job.kind != JobKind::AdvancePlaybook {
                continue;
            }
            if !matches!(job.status, JobStatus::Pending | JobStatus::Claimed { .. }) {
                continue;
            }
            let Ok(payload) = serde_json::from_value::<AdvancePayload>(job.payload.clone()) else {
                continue;
            };
            if payload.run_id == run.id
                && payload.step == run.current_step
                && payload.visit == visit
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn fail_run(&self, mut run: PlaybookRun, reason: String) -> Result<PlaybookRun> {
        tracing::error!(run = %run.id, step = %run.current_step, %reason, "playbook run failed");
        run.status = RunStatus::Failed;
        run.last_error = Some(reason.clone());
        run.updated_at = Utc::now();
        self.record(&run, "run.failed", serde_json::json!({
            "step": run.current_step,
            "reason": reason,
        }))?;
        self.runs.put(&run)?;
        Ok(run)
    }

    fn record(&self, run: &PlaybookRun, event: &str, detail: serde_json::Value) -> Result<()> {
        let mut content = serde_json::json!({
            "event": event,
            "status": run.status.to_string(),
        });
        if let (Some(map), Some(extra)) = (content.as_object_mut(), detail.as_object()) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }
        self.ledger
            .append(&run.org_id, "run", &run.id.to_string(), content)?;
        Ok(())
    }
}

/// Payload of an `AdvancePlaybook` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancePayload {
    pub run_id: Uuid,
    pub step: String,
    pub visit: u32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
