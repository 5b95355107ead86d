//! Durable async job queue driving long-running playbook advancement.
//!
//! # Table design
//!
//! A single `JOBS` table uses a 24-byte composite key:
//! ```text
//! [ next_attempt_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Because the timestamp occupies the high bytes in big-endian encoding,
//! byte ordering equals due-time ordering: one range scan up to `now`
//! returns every due job, and only `Pending` status filtering happens in
//! application code.
//!
//! `claim_next` reads and flips `Pending → Claimed` inside one write
//! transaction — the mutual-exclusion primitive that prevents two workers
//! from processing the same job. Handlers must be idempotent: a worker crash
//! leaves the job `Claimed` until `recover_stale` re-queues it past the
//! lease timeout, and the job then runs again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::error::{Result, WardenError};
use crate::store::store_err;

/// Key: 24-byte composite (next_attempt_ms big-endian ++ uuid bytes).
/// Value: JSON-encoded AsyncJob.
const JOBS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("jobs");

fn job_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Upper bound for a range scan returning all jobs due by `now`.
fn due_upper_bound(now: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = now.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].fill(0xff);
    key
}

// ---------------------------------------------------------------------------
// JobKind / JobStatus / AsyncJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    AdvancePlaybook,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::AdvancePlaybook => "advance_playbook",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle: `Pending → Claimed → Done`, or back to `Pending` on a
/// retryable failure, or `Failed` once attempts are exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Claimed {
        claimed_by: String,
        claimed_at: DateTime<Utc>,
    },
    Done,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Attempts consumed so far. The first claim makes it 1.
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AsyncJob {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct JobQueue {
    db: Arc<Database>,
    config: JobConfig,
}

impl JobQueue {
    pub fn new(db: Arc<Database>, config: JobConfig) -> Result<Self> {
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(JOBS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db, config })
    }

    /// Enqueue a job due immediately.
    pub fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Uuid> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let id = self.enqueue_in(&wt, kind, payload)?;
        wt.commit().map_err(store_err)?;
        Ok(id)
    }

    /// Insert a job due immediately into an open write transaction. The
    /// caller commits; this couples the job with the state change that
    /// requires it, so a crash can never leave one without the other.
    pub(crate) fn enqueue_in(
        &self,
        wt: &WriteTransaction,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        let job = AsyncJob::new(kind, payload);
        let key = job_key(job.next_attempt_at, job.id);
        let value = serde_json::to_vec(&job)?;
        let mut table = wt.open_table(JOBS).map_err(store_err)?;
        table
            .insert(key.as_slice(), value.as_slice())
            .map_err(store_err)?;
        Ok(job.id)
    }

    /// Atomically claim the oldest due `Pending` job for `worker_id`.
    ///
    /// The scan and the `Pending → Claimed` flip share one write transaction,
    /// so at most one worker wins a given job.
    pub fn claim_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<AsyncJob>> {
        let upper = due_upper_bound(now);
        let wt = self.db.begin_write().map_err(store_err)?;
        let claimed = {
            let mut table = wt.open_table(JOBS).map_err(store_err)?;
            let found = {
                let mut found = None;
                for entry in table.range(..=upper.as_slice()).map_err(store_err)? {
                    let (k, v) = entry.map_err(store_err)?;
                    let job: AsyncJob = serde_json::from_slice(v.value())?;
                    if matches!(job.status, JobStatus::Pending) {
                        found = Some((k.value().to_vec(), job));
                        break;
                    }
                }
                found
            };
            match found {
                Some((key, mut job)) => {
                    job.status = JobStatus::Claimed {
                        claimed_by: worker_id.to_string(),
                        claimed_at: now,
                    };
                    job.attempts += 1;
                    job.updated_at = now;
                    let value = serde_json::to_vec(&job)?;
                    table
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(store_err)?;
                    Some(job)
                }
                None => None,
            }
        };
        wt.commit().map_err(store_err)?;
        Ok(claimed)
    }

    /// Mark a claimed job `Done`. Called only after the handler's effects
    /// are durably written, so a crash before this point re-runs the job.
    pub fn complete(&self, job_id: Uuid) -> Result<()> {
        self.update(job_id, |job, _now| {
            job.status = JobStatus::Done;
            None
        })
    }

    /// Record a failure. Retryable failures go back to `Pending` with
    /// exponential backoff until attempts are exhausted; everything else is
    /// terminal `Failed` and raises an operator-visible alert.
    pub fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let config = self.config.clone();
        self.update(job_id, move |job, now| {
            job.last_error = Some(error.to_string());
            if retryable && job.attempts < config.max_attempts {
                let backoff = config.backoff(job.attempts);
                job.status = JobStatus::Pending;
                job.next_attempt_at = now + backoff;
                tracing::warn!(
                    job = %job.id,
                    kind = %job.kind,
                    attempts = job.attempts,
                    retry_in_secs = backoff.num_seconds(),
                    error,
                    "job failed, will retry"
                );
                // Re-key so the due scan picks it up at the right time.
                Some(job.next_attempt_at)
            } else {
                job.status = JobStatus::Failed {
                    reason: error.to_string(),
                };
                tracing::error!(
                    job = %job.id,
                    kind = %job.kind,
                    attempts = job.attempts,
                    error,
                    "job failed permanently"
                );
                None
            }
        })
    }

    /// Re-queue `Claimed` jobs whose lease expired (worker crashed between
    /// claim and complete). Returns the number of jobs recovered.
    pub fn recover_stale(&self, now: DateTime<Utc>) -> Result<u32> {
        let lease = Duration::seconds(self.config.lease_secs as i64);
        let mut recovered = 0u32;
        for job in self.list()? {
            if let JobStatus::Claimed { claimed_at, .. } = &job.status {
                if *claimed_at + lease < now {
                    self.update(job.id, |job, now| {
                        job.status = JobStatus::Pending;
                        job.next_attempt_at = now;
                        Some(now)
                    })?;
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "re-queued stale claimed jobs");
        }
        Ok(recovered)
    }

    pub fn get(&self, job_id: Uuid) -> Result<AsyncJob> {
        self.list()?
            .into_iter()
            .find(|j| j.id == job_id)
            .ok_or_else(|| WardenError::JobNotFound(job_id.to_string()))
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Result<Vec<AsyncJob>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(JOBS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice::<AsyncJob>(v.value())?);
        }
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    /// Find a job by id, apply `f`, and reinsert. When `f` returns a new
    /// timestamp the record is re-keyed to it.
    fn update(
        &self,
        job_id: Uuid,
        f: impl FnOnce(&mut AsyncJob, DateTime<Utc>) -> Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = Utc::now();
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(JOBS).map_err(store_err)?;
            let found = {
                let mut found = None;
                for entry in table.iter().map_err(store_err)? {
                    let (k, v) = entry.map_err(store_err)?;
                    let job: AsyncJob = serde_json::from_slice(v.value())?;
                    if job.id == job_id {
                        found = Some((k.value().to_vec(), job));
                        break;
                    }
                }
                found
            };
            let (old_key, mut job) =
                found.ok_or_else(|| WardenError::JobNotFound(job_id.to_string()))?;
            let rekey_to = f(&mut job, now);
            job.updated_at = now;
            let value = serde_json::to_vec(&job)?;
            let new_key = match rekey_to {
                Some(ts) => {
                    table.remove(old_key.as_slice()).map_err(store_err)?;
                    job_key(ts, job.id).to_vec()
                }
                None => old_key,
            };
            table
                .insert(new_key.as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue() -> (TempDir, JobQueue) {
        let dir = TempDir::new().unwrap();
        let db = crate::store::open_db(&dir.path().join("test.db")).unwrap();
        let config = JobConfig {
            max_attempts: 3,
            backoff_base_secs: 30,
            backoff_cap_secs: 3600,
            lease_secs: 300,
        };
        (dir, JobQueue::new(db, config).unwrap())
    }

    fn payload(run: &str) -> serde_json::Value {
        serde_json::json!({"run_id": run})
    }

    #[test]
    fn claim_is_exclusive() {
        let (_dir, queue) = queue();
        queue.enqueue(JobKind::AdvancePlaybook, payload("r1")).unwrap();
        let now = Utc::now();

        let first = queue.claim_next("worker-a", now).unwrap();
        assert!(first.is_some());
        let second = queue.claim_next("worker-b", now).unwrap();
        assert!(second.is_none(), "a claimed job cannot be claimed again");
    }

    #[test]
    fn concurrent_claims_hand_out_distinct_jobs() {
        let (_dir, queue) = queue();
        for i in 0..4 {
            queue
                .enqueue(JobKind::AdvancePlaybook, payload(&format!("r{i}")))
                .unwrap();
        }
        let now = Utc::now();

        let mut handles = Vec::new();
        for n in 0..4 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                queue.claim_next(&format!("worker-{n}"), now).unwrap()
            }));
        }
        let claimed: Vec<AsyncJob> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(claimed.len(), 4);
        let mut ids: Vec<Uuid> = claimed.iter().map(|j| j.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4, "no job handed to two workers");
    }

    #[test]
    fn jobs_come_out_oldest_due_first() {
        let (_dir, queue) = queue();
        let a = queue.enqueue(JobKind::AdvancePlaybook, payload("a")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = queue.enqueue(JobKind::AdvancePlaybook, payload("b")).unwrap();

        let now = Utc::now();
        assert_eq!(queue.claim_next("w", now).unwrap().unwrap().id, a);
        assert_eq!(queue.claim_next("w", now).unwrap().unwrap().id, b);
    }

    #[test]
    fn retryable_failure_backs_off_and_requeues() {
        let (_dir, queue) = queue();
        let id = queue.enqueue(JobKind::AdvancePlaybook, payload("r1")).unwrap();
        let now = Utc::now();
        queue.claim_next("w", now).unwrap().unwrap();
        queue.fail(id, "transient store hiccup", true).unwrap();

        let job = queue.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.next_attempt_at > now, "backoff pushed the due time out");
        assert_eq!(job.last_error.as_deref(), Some("transient store hiccup"));

        // Not due yet.
        assert!(queue.claim_next("w", Utc::now()).unwrap().is_none());
        // Due once the backoff elapses.
        let later = job.next_attempt_at + Duration::seconds(1);
        assert_eq!(queue.claim_next("w", later).unwrap().unwrap().id, id);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let (_dir, queue) = queue();
        let id = queue.enqueue(JobKind::AdvancePlaybook, payload("r1")).unwrap();

        let mut claim_at = Utc::now();
        let mut delays = Vec::new();
        for _ in 0..2 {
            let job = queue.claim_next("w", claim_at).unwrap().unwrap();
            queue.fail(id, "still broken", true).unwrap();
            let updated = queue.get(id).unwrap();
            delays.push(updated.next_attempt_at - job.updated_at);
            claim_at = updated.next_attempt_at + Duration::seconds(1);
        }
        assert!(
            delays[1] > delays[0],
            "second retry waits longer than the first: {delays:?}"
        );
    }

    #[test]
    fn exhausting_attempts_marks_failed() {
        let (_dir, queue) = queue();
        let id = queue.enqueue(JobKind::AdvancePlaybook, payload("r1")).unwrap();

        let mut claim_at = Utc::now();
        for _ in 0..3 {
            queue.claim_next("w", claim_at).unwrap().unwrap();
            queue.fail(id, "broken", true).unwrap();
            claim_at = queue.get(id).unwrap().next_attempt_at + Duration::seconds(1);
        }

        let job = queue.get(id).unwrap();
        assert!(matches!(job.status, JobStatus::Failed { .. }));
        assert_eq!(job.attempts, 3);
        assert!(queue.claim_next("w", claim_at).unwrap().is_none());
    }

    #[test]
    fn non_retryable_failure_is_immediately_terminal() {
        let (_dir, queue) = queue();
        let id = queue.enqueue(JobKind::AdvancePlaybook, payload("r1")).unwrap();
        queue.claim_next("w", Utc::now()).unwrap().unwrap();
        queue.fail(id, "run was cancelled", false).unwrap();

        let job = queue.get(id).unwrap();
        assert!(matches!(job.status, JobStatus::Failed { .. }));
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn complete_finishes_the_job() {
        let (_dir, queue) = queue();
        let id = queue.enqueue(JobKind::AdvancePlaybook, payload("r1")).unwrap();
        queue.claim_next("w", Utc::now()).unwrap().unwrap();
        queue.complete(id).unwrap();

        assert_eq!(queue.get(id).unwrap().status, JobStatus::Done);
        assert!(queue.claim_next("w", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn recover_stale_requeues_expired_leases() {
        let (_dir, queue) = queue();
        let id = queue.enqueue(JobKind::AdvancePlaybook, payload("r1")).unwrap();
        let claim_time = Utc::now() - Duration::seconds(600);
        queue.claim_next("w", claim_time).unwrap().unwrap();

        // Lease is 300s; claim is 600s old.
        let recovered = queue.recover_stale(Utc::now()).unwrap();
        assert_eq!(recovered, 1);
        let job = queue.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(queue.claim_next("w2", Utc::now()).unwrap().is_some());
    }

    #[test]
    fn recover_stale_leaves_fresh_claims_alone() {
        let (_dir, queue) = queue();
        queue.enqueue(JobKind::AdvancePlaybook, payload("r1")).unwrap();
        queue.claim_next("w", Utc::now()).unwrap().unwrap();

        assert_eq!(queue.recover_stale(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn empty_queue_claims_nothing() {
        let (_dir, queue) = queue();
        assert!(queue.claim_next("w", Utc::now()).unwrap().is_none());
    }
}
