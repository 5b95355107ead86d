//! Append-only, hash-chained evidence ledger.
//!
//! # Chain design
//!
//! Entries are keyed `(partition, seq)` where `partition` is the organization
//! id and `seq` is a dense counter starting at 0. Each entry's hash covers
//! the previous entry's hash, the canonical JSON of its content, and its
//! timestamp:
//!
//! ```text
//! entry_hash = SHA-256(prev_hash ‖ canonical(content) ‖ rfc3339(created_at))
//! ```
//!
//! Appends read the partition tail and insert the new entry inside a single
//! write transaction, so causal order per partition holds without any outer
//! lock. Verification recomputes the whole chain and fails closed: the ledger
//! detects tampering, it does not prevent it.
//!
//! Write failures surface as `LedgerWriteFailed` — callers treat the
//! triggering operation as not committed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::store::store_err;

/// Key: (partition, seq). Value: JSON-encoded EvidenceEntry.
const EVIDENCE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("evidence");

// ---------------------------------------------------------------------------
// EvidenceEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub id: Uuid,
    pub partition: String,
    pub seq: u64,
    /// Hex SHA-256 of the previous entry; empty string for the first entry.
    pub prev_hash: String,
    pub entry_hash: String,
    pub subject_type: String,
    pub subject_id: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Canonical content bytes: serde_json's map is ordered (BTreeMap), so the
/// same value always serializes to the same bytes.
fn compute_hash(prev_hash: &str, content: &serde_json::Value, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(content.to_string().as_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    hex(&hasher.finalize())
}

// ---------------------------------------------------------------------------
// EvidenceLedger
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct EvidenceLedger {
    db: Arc<Database>,
}

impl EvidenceLedger {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(EVIDENCE).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    /// Append one entry to `partition`'s chain.
    pub fn append(
        &self,
        partition: &str,
        subject_type: &str,
        subject_id: &str,
        content: serde_json::Value,
    ) -> Result<EvidenceEntry> {
        let wt = self.db.begin_write().map_err(ledger_err)?;
        let entry = {
            let mut table = wt.open_table(EVIDENCE).map_err(ledger_err)?;
            let tail = {
                let mut range = table
                    .range((partition, 0u64)..=(partition, u64::MAX))
                    .map_err(ledger_err)?;
                match range.next_back() {
                    Some(item) => {
                        let (_, v) = item.map_err(ledger_err)?;
                        Some(serde_json::from_slice::<EvidenceEntry>(v.value())?)
                    }
                    None => None,
                }
            };
            let (seq, prev_hash) = match &tail {
                Some(last) => (last.seq + 1, last.entry_hash.clone()),
                None => (0, String::new()),
            };

            let created_at = Utc::now();
            let entry = EvidenceEntry {
                id: Uuid::new_v4(),
                partition: partition.to_string(),
                seq,
                entry_hash: compute_hash(&prev_hash, &content, created_at),
                prev_hash,
                subject_type: subject_type.to_string(),
                subject_id: subject_id.to_string(),
                content,
                created_at,
            };
            let value = serde_json::to_vec(&entry)?;
            table
                .insert((partition, seq), value.as_slice())
                .map_err(ledger_err)?;
            entry
        };
        wt.commit().map_err(ledger_err)?;
        Ok(entry)
    }

    /// Recompute the chain for `partition`. Any mismatch — hash, link, or
    /// sequence gap — makes the whole partition invalid.
    pub fn verify_chain(&self, partition: &str) -> Result<bool> {
        let mut expected_prev = String::new();
        let mut expected_seq = 0u64;
        for entry in self.entries(partition)? {
            if entry.seq != expected_seq || entry.prev_hash != expected_prev {
                return Ok(false);
            }
            let recomputed = compute_hash(&entry.prev_hash, &entry.content, entry.created_at);
            if recomputed != entry.entry_hash {
                return Ok(false);
            }
            expected_prev = entry.entry_hash;
            expected_seq += 1;
        }
        Ok(true)
    }

    /// Like `verify_chain` but raises `ChainVerificationFailed` on the first
    /// bad entry. Used where an invalid chain must alert, not just report.
    pub fn require_valid(&self, partition: &str) -> Result<()> {
        let mut expected_prev = String::new();
        for entry in self.entries(partition)? {
            let recomputed = compute_hash(&entry.prev_hash, &entry.content, entry.created_at);
            if entry.prev_hash != expected_prev || recomputed != entry.entry_hash {
                tracing::error!(
                    partition,
                    seq = entry.seq,
                    "evidence chain verification failed"
                );
                return Err(WardenError::ChainVerificationFailed {
                    partition: partition.to_string(),
                    seq: entry.seq,
                });
            }
            expected_prev = entry.entry_hash;
        }
        Ok(())
    }

    /// All entries of one partition in chain order.
    pub fn entries(&self, partition: &str) -> Result<Vec<EvidenceEntry>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(EVIDENCE).map_err(store_err)?;
        let mut result = Vec::new();
        for item in table
            .range((partition, 0u64)..=(partition, u64::MAX))
            .map_err(store_err)?
        {
            let (_, v) = item.map_err(store_err)?;
            result.push(serde_json::from_slice::<EvidenceEntry>(v.value())?);
        }
        Ok(result)
    }

    pub fn partitions(&self) -> Result<Vec<String>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(EVIDENCE).map_err(store_err)?;
        let mut result: Vec<String> = Vec::new();
        for item in table.iter().map_err(store_err)? {
            let (k, _) = item.map_err(store_err)?;
            let (partition, _) = k.value();
            if result.last().map(String::as_str) != Some(partition) {
                result.push(partition.to_string());
            }
        }
        Ok(result)
    }

    /// Timestamp of the newest entry in `partition`, if any.
    pub fn last_entry_at(&self, partition: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.entries(partition)?.last().map(|e| e.created_at))
    }

    /// Hard-delete an entire partition. Only the retention sweep calls this;
    /// deleting a prefix would break the chain, so deletion is all-or-nothing
    /// per partition. Returns the number of entries removed.
    pub fn delete_partition(&self, partition: &str) -> Result<u64> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let removed = {
            let mut table = wt.open_table(EVIDENCE).map_err(store_err)?;
            let seqs: Vec<u64> = {
                let mut seqs = Vec::new();
                for item in table
                    .range((partition, 0u64)..=(partition, u64::MAX))
                    .map_err(store_err)?
                {
                    let (k, _) = item.map_err(store_err)?;
                    seqs.push(k.value().1);
                }
                seqs
            };
            for seq in &seqs {
                table.remove((partition, *seq)).map_err(store_err)?;
            }
            seqs.len() as u64
        };
        wt.commit().map_err(store_err)?;
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, partition: &str, seq: u64, content: serde_json::Value) {
        let wt = self.db.begin_write().unwrap();
        {
            let mut table = wt.open_table(EVIDENCE).unwrap();
            let mut entry: EvidenceEntry = {
                let guard = table.get((partition, seq)).unwrap().unwrap();
                serde_json::from_slice(guard.value()).unwrap()
            };
            entry.content = content;
            let value = serde_json::to_vec(&entry).unwrap();
            table.insert((partition, seq), value.as_slice()).unwrap();
        }
        wt.commit().unwrap();
    }
}

fn ledger_err(e: impl std::fmt::Display) -> WardenError {
    WardenError::LedgerWriteFailed(e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
