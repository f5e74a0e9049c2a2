//! Persistent outcome store backed by a sled database
//!
//! Layout: a primary tree keyed by `outcome_id` holding the JSON-encoded
//! record plus its assigned sequence number, and four secondary index
//! trees (module, outcome type, timestamp, decision id). Index keys embed
//! an inverted timestamp followed by the sequence number so that a forward
//! scan yields newest-first order with insertion order preserved among
//! equal timestamps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use lazarus_common::{
    Error, ModuleStatistics, OutcomePatch, OutcomeStatistics, OutcomeType, Result,
    ResurrectionOutcome,
};

use crate::stats::{compute_module_statistics, compute_statistics};
use crate::OutcomeStore;

const TREE_OUTCOMES: &str = "outcomes";
const TREE_IDX_MODULE: &str = "idx_module";
const TREE_IDX_TYPE: &str = "idx_type";
const TREE_IDX_TS: &str = "idx_ts";
const TREE_IDX_DECISION: &str = "idx_decision";

const SORT_KEY_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    sequence: u64,
    outcome: ResurrectionOutcome,
}

fn store_err(e: sled::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

/// Order-preserving big-endian encoding of (timestamp, sequence), with the
/// timestamp inverted so a forward scan is newest-first.
fn sort_key(timestamp: DateTime<Utc>, sequence: u64) -> [u8; SORT_KEY_LEN] {
    let biased = (timestamp.timestamp_micros() as u64) ^ (1 << 63);
    let inverted = u64::MAX - biased;
    let mut key = [0u8; SORT_KEY_LEN];
    key[..8].copy_from_slice(&inverted.to_be_bytes());
    key[8..].copy_from_slice(&sequence.to_be_bytes());
    key
}

/// Recover the timestamp (in microseconds) from a sort key suffix.
fn sort_key_micros(key: &[u8]) -> Option<i64> {
    if key.len() < SORT_KEY_LEN {
        return None;
    }
    let inverted = u64::from_be_bytes(key[..8].try_into().ok()?);
    Some(((u64::MAX - inverted) ^ (1 << 63)) as i64)
}

fn prefixed_key(prefix: &[u8], sort: &[u8; SORT_KEY_LEN]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1 + SORT_KEY_LEN);
    key.extend_from_slice(prefix);
    key.push(0x00);
    key.extend_from_slice(sort);
    key
}

/// Persistent backend. Writes are serialized behind a single writer lock;
/// reads run concurrently.
pub struct SledOutcomeStore {
    db: sled::Db,
    outcomes: sled::Tree,
    idx_module: sled::Tree,
    idx_type: sled::Tree,
    idx_ts: sled::Tree,
    idx_decision: sled::Tree,
    next_sequence: AtomicU64,
    writer: Mutex<()>,
}

impl SledOutcomeStore {
    /// Open (or create) the store at the given path. Parent directories are
    /// created on first use; schema initialization is idempotent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::StoreUnavailable(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db = sled::open(path).map_err(store_err)?;
        let outcomes = db.open_tree(TREE_OUTCOMES).map_err(store_err)?;
        let idx_module = db.open_tree(TREE_IDX_MODULE).map_err(store_err)?;
        let idx_type = db.open_tree(TREE_IDX_TYPE).map_err(store_err)?;
        let idx_ts = db.open_tree(TREE_IDX_TS).map_err(store_err)?;
        let idx_decision = db.open_tree(TREE_IDX_DECISION).map_err(store_err)?;

        // Recover the sequence counter from existing rows
        let mut max_sequence = 0u64;
        let mut existing = 0u64;
        for entry in outcomes.iter() {
            let (_, value) = entry.map_err(store_err)?;
            match serde_json::from_slice::<StoredRecord>(&value) {
                Ok(record) => {
                    max_sequence = max_sequence.max(record.sequence);
                    existing += 1;
                }
                Err(e) => warn!("skipping undecodable outcome row: {}", e),
            }
        }

        info!(
            path = %path.display(),
            existing_outcomes = existing,
            "outcome store opened"
        );

        Ok(SledOutcomeStore {
            db,
            outcomes,
            idx_module,
            idx_type,
            idx_ts,
            idx_decision,
            next_sequence: AtomicU64::new(max_sequence + 1),
            writer: Mutex::new(()),
        })
    }

    fn index_keys(outcome: &ResurrectionOutcome, sequence: u64) -> IndexKeys {
        let sort = sort_key(outcome.timestamp, sequence);
        IndexKeys {
            module: prefixed_key(outcome.target_module.as_bytes(), &sort),
            outcome_type: prefixed_key(outcome.outcome_type.as_str().as_bytes(), &sort),
            timestamp: sort.to_vec(),
            decision: prefixed_key(outcome.decision_id.as_bytes(), &sort),
        }
    }

    /// Write a record and its index entries, removing the index entries of
    /// the row it replaces. Callers hold the writer lock.
    fn put_record(
        &self,
        sequence: u64,
        outcome: &ResurrectionOutcome,
        previous: Option<&ResurrectionOutcome>,
    ) -> Result<()> {
        if let Some(previous) = previous {
            let old = Self::index_keys(previous, sequence);
            self.idx_module.remove(old.module).map_err(store_err)?;
            self.idx_type.remove(old.outcome_type).map_err(store_err)?;
            self.idx_ts.remove(old.timestamp).map_err(store_err)?;
            self.idx_decision.remove(old.decision).map_err(store_err)?;
        }

        let record = StoredRecord {
            sequence,
            outcome: outcome.clone(),
        };
        let encoded = serde_json::to_vec(&record)?;
        self.outcomes
            .insert(outcome.outcome_id.as_bytes(), encoded)
            .map_err(store_err)?;

        let keys = Self::index_keys(outcome, sequence);
        let id = outcome.outcome_id.as_bytes();
        self.idx_module.insert(keys.module, id).map_err(store_err)?;
        self.idx_type
            .insert(keys.outcome_type, id)
            .map_err(store_err)?;
        self.idx_ts.insert(keys.timestamp, id).map_err(store_err)?;
        self.idx_decision
            .insert(keys.decision, id)
            .map_err(store_err)?;

        self.db.flush().map_err(store_err)?;
        Ok(())
    }

    fn get_record(&self, outcome_id: &str) -> Result<Option<StoredRecord>> {
        match self.outcomes.get(outcome_id.as_bytes()).map_err(store_err)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Scan an index tree, resolving primary rows, newest first.
    fn collect_index(
        &self,
        tree: &sled::Tree,
        prefix: Option<&[u8]>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>> {
        let since_micros = since.map(|s| s.timestamp_micros());
        let mut results = Vec::new();

        let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> =
            match prefix {
                Some(prefix) => {
                    let mut scan_prefix = prefix.to_vec();
                    scan_prefix.push(0x00);
                    Box::new(tree.scan_prefix(scan_prefix))
                }
                None => Box::new(tree.iter()),
            };

        for entry in iter {
            if results.len() >= limit {
                break;
            }
            let (key, outcome_id) = entry.map_err(store_err)?;

            let sort_suffix = match prefix {
                Some(prefix) => &key[prefix.len() + 1..],
                None => &key[..],
            };
            if let (Some(since_micros), Some(micros)) =
                (since_micros, sort_key_micros(sort_suffix))
            {
                // forward scan is newest-first; everything after this is older
                if micros < since_micros {
                    break;
                }
            }

            let outcome_id = String::from_utf8_lossy(&outcome_id).to_string();
            match self.get_record(&outcome_id) {
                Ok(Some(record)) => results.push(record.outcome),
                Ok(None) => warn!(outcome_id = %outcome_id, "dangling index entry"),
                Err(e) => warn!(outcome_id = %outcome_id, "skipping undecodable row: {}", e),
            }
        }

        Ok(results)
    }

    /// Full decoded scan of the primary tree. Corrupt rows are skipped with
    /// a warning, never silently dropped from counts without trace.
    fn scan_all(&self) -> Result<Vec<ResurrectionOutcome>> {
        let mut outcomes = Vec::new();
        for entry in self.outcomes.iter() {
            let (key, value) = entry.map_err(store_err)?;
            match serde_json::from_slice::<StoredRecord>(&value) {
                Ok(record) => outcomes.push(record.outcome),
                Err(e) => warn!(
                    outcome_id = %String::from_utf8_lossy(&key),
                    "skipping undecodable row: {}",
                    e
                ),
            }
        }
        Ok(outcomes)
    }
}

struct IndexKeys {
    module: Vec<u8>,
    outcome_type: Vec<u8>,
    timestamp: Vec<u8>,
    decision: Vec<u8>,
}

#[async_trait]
impl OutcomeStore for SledOutcomeStore {
    async fn store(&self, outcome: &ResurrectionOutcome) -> Result<()> {
        let _guard = self.writer.lock();

        let previous = self.get_record(&outcome.outcome_id).unwrap_or_else(|e| {
            warn!(
                outcome_id = %outcome.outcome_id,
                "replacing undecodable row: {}",
                e
            );
            None
        });
        let sequence = previous
            .as_ref()
            .map(|r| r.sequence)
            .unwrap_or_else(|| self.next_sequence.fetch_add(1, Ordering::SeqCst));

        self.put_record(sequence, outcome, previous.as_ref().map(|r| &r.outcome))?;
        debug!(outcome_id = %outcome.outcome_id, "outcome stored");
        Ok(())
    }

    async fn get(&self, outcome_id: &str) -> Result<Option<ResurrectionOutcome>> {
        Ok(self.get_record(outcome_id)?.map(|r| r.outcome))
    }

    async fn list_by_module(
        &self,
        module: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>> {
        self.collect_index(&self.idx_module, Some(module.as_bytes()), limit, since)
    }

    async fn list_by_type(
        &self,
        outcome_type: OutcomeType,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>> {
        self.collect_index(
            &self.idx_type,
            Some(outcome_type.as_str().as_bytes()),
            limit,
            since,
        )
    }

    async fn list_recent(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>> {
        self.collect_index(&self.idx_ts, None, limit, since)
    }

    async fn statistics(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<OutcomeStatistics> {
        let mut outcomes = self.scan_all()?;
        outcomes.retain(|o| since.map_or(true, |s| o.timestamp >= s));
        outcomes.retain(|o| until.map_or(true, |u| o.timestamp <= u));
        Ok(compute_statistics(&outcomes, since, until))
    }

    async fn module_statistics(&self, module: &str) -> Result<ModuleStatistics> {
        let outcomes =
            self.collect_index(&self.idx_module, Some(module.as_bytes()), usize::MAX, None)?;
        Ok(compute_module_statistics(module, &outcomes))
    }

    async fn update(&self, outcome_id: &str, patch: &OutcomePatch) -> Result<bool> {
        let _guard = self.writer.lock();

        let Some(record) = self.get_record(outcome_id)? else {
            return Ok(false);
        };

        let previous = record.outcome.clone();
        let mut updated = record.outcome;
        patch.apply(&mut updated);

        self.put_record(record.sequence, &updated, Some(&previous))?;
        debug!(outcome_id = %outcome_id, "outcome updated");
        Ok(true)
    }
}
