//! Job worker: claims due jobs and drives the routing engine.
//!
//! Handlers are idempotent (see `routing`), so the worker can crash at any
//! point between claim and complete and the job just runs again after its
//! lease expires.

use chrono::Utc;

use crate::error::{Result, WardenError};
use crate::jobs::{AsyncJob, JobKind, JobQueue};
use crate::routing::{AdvancePayload, RoutingEngine};

pub struct Worker {
    id: String,
    queue: JobQueue,
    engine: RoutingEngine,
}

impl Worker {
    pub fn new(id: impl Into<String>, queue: JobQueue, engine: RoutingEngine) -> Self {
        Self {
            id: id.into(),
            queue,
            engine,
        }
    }

    /// Claim and process at most one due job. Returns whether one was found.
    pub fn tick(&self) -> Result<bool> {
        let Some(job) = self.queue.claim_next(&self.id, Utc::now())? else {
            return Ok(false);
        };
        match self.handle(&job) {
            Ok(()) => self.queue.complete(job.id)?,
            Err(e) => {
                self.queue.fail(job.id, &e.to_string(), is_retryable(&e))?;
            }
        }
        Ok(true)
    }

    /// Re-queue claimed jobs whose worker died mid-flight.
    pub fn recover_stale(&self) -> Result<u32> {
        self.queue.recover_stale(Utc::now())
    }

    fn handle(&self, job: &AsyncJob) -> Result<()> {
        match job.kind {
            JobKind::AdvancePlaybook => {
                let payload: AdvancePayload = serde_json::from_value(job.payload.clone())?;
                tracing::debug!(
                    worker = %self.id,
                    job = %job.id,
                    run = %payload.run_id,
                    step = %payload.step,
                    "advancing playbook run"
                );
                self.engine
                    .advance(payload.run_id, &payload.step, payload.visit)?;
                Ok(())
            }
        }
    }
}

/// Store-level trouble is worth retrying; a malformed payload or a missing
/// run never fixes itself.
fn is_retryable(e: &WardenError) -> bool {
    matches!(
        e,
        WardenError::Store(_) | WardenError::LedgerWriteFailed(_) | WardenError::Io(_)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::execution::ExecutionStore;
    use crate::executor::{ExecutionAdapter, ExecutorRegistry};
    use crate::jobs::JobStatus;
    use crate::ledger::EvidenceLedger;
    use crate::playbook::{PlaybookStep, PlaybookTemplate, StepKind, StepTarget, TemplateStore};
    use crate::routing::RunStore;
    use crate::store::open_db;
    use crate::types::{ExecutorKind, RunStatus};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Worker, RoutingEngine, JobQueue) {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir.path().join("test.db")).unwrap();
        let ledger = EvidenceLedger::new(db.clone()).unwrap();
        let adapter = ExecutionAdapter::new(
            ExecutionStore::new(db.clone()).unwrap(),
            Arc::new(ExecutorRegistry::echo()),
            ledger.clone(),
        );
        let queue = JobQueue::new(db.clone(), JobConfig::default()).unwrap();
        let engine = RoutingEngine::new(
            TemplateStore::new(db.clone()).unwrap(),
            RunStore::new(db).unwrap(),
            adapter,
            queue.clone(),
            ledger,
        );
        let worker = Worker::new("worker-1", queue.clone(), engine.clone());
        (dir, worker, engine, queue)
    }

    fn two_step_template() -> PlaybookTemplate {
        let step = |id: &str, next: Option<&str>| PlaybookStep {
            id: id.to_string(),
            kind: StepKind::Action {
                kind: ExecutorKind::Task,
                payload: serde_json::json!({"title": id}),
            },
            transitions: [
                (
                    "success".to_string(),
                    match next {
                        Some(n) => StepTarget::Step { id: n.to_string() },
                        None => StepTarget::Terminal,
                    },
                ),
                ("failure".to_string(), StepTarget::Terminal),
            ]
            .into_iter()
            .collect(),
            max_iterations: None,
        };
        PlaybookTemplate::new(
            "two-step",
            "a",
            vec![step("a", Some("b")), step("b", None)],
        )
    }

    #[test]
    fn tick_processes_one_job() {
        let (_dir, worker, engine, queue) = setup();
        let t = two_step_template();
        engine.templates().save(&t).unwrap();
        engine.start(t.id, "org-1", serde_json::Map::new()).unwrap();

        assert!(worker.tick().unwrap());
        let jobs = queue.list().unwrap();
        assert_eq!(jobs.iter().filter(|j| j.status == JobStatus::Done).count(), 1);
    }

    #[test]
    fn ticking_to_idle_completes_the_run() {
        let (_dir, worker, engine, _queue) = setup();
        let t = two_step_template();
        engine.templates().save(&t).unwrap();
        let run = engine.start(t.id, "org-1", serde_json::Map::new()).unwrap();

        while worker.tick().unwrap() {}

        let run = engine.runs().get(run.id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn idle_queue_returns_false() {
        let (_dir, worker, _engine, _queue) = setup();
        assert!(!worker.tick().unwrap());
    }

    #[test]
    fn missing_run_fails_the_job_without_retry() {
        let (_dir, worker, _engine, queue) = setup();
        queue
            .enqueue(
                JobKind::AdvancePlaybook,
                serde_json::json!({"run_id": uuid::Uuid::new_v4(), "step": "a", "visit": 1}),
            )
            .unwrap();

        assert!(worker.tick().unwrap());
        let job = &queue.list().unwrap()[0];
        assert!(
            matches!(job.status, JobStatus::Failed { .. }),
            "a vanished run is not retryable: {:?}",
            job.status
        );
        assert_eq!(job.attempts, 1);
    }
}
