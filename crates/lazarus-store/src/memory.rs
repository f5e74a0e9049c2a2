//! In-memory outcome store for tests and single-process experiments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lazarus_common::{
    ModuleStatistics, OutcomePatch, OutcomeStatistics, OutcomeType, Result, ResurrectionOutcome,
};

use crate::stats::{compute_module_statistics, compute_statistics};
use crate::OutcomeStore;

/// In-memory backend. Shares the exact trait surface with the persistent
/// backend; nothing backend-specific leaks to callers.
#[derive(Default)]
pub struct MemoryOutcomeStore {
    records: RwLock<HashMap<String, (u64, ResurrectionOutcome)>>,
    next_sequence: AtomicU64,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        MemoryOutcomeStore::default()
    }

    fn sorted(
        &self,
        mut matching: Vec<(u64, ResurrectionOutcome)>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Vec<ResurrectionOutcome> {
        if let Some(since) = since {
            matching.retain(|(_, o)| o.timestamp >= since);
        }
        // newest first; insertion order among equal timestamps
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| seq_a.cmp(seq_b))
        });
        matching.truncate(limit);
        matching.into_iter().map(|(_, o)| o).collect()
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn store(&self, outcome: &ResurrectionOutcome) -> Result<()> {
        let mut records = self.records.write();
        let seq = records
            .get(&outcome.outcome_id)
            .map(|(seq, _)| *seq)
            .unwrap_or_else(|| self.next_sequence.fetch_add(1, Ordering::SeqCst));
        records.insert(outcome.outcome_id.clone(), (seq, outcome.clone()));
        Ok(())
    }

    async fn get(&self, outcome_id: &str) -> Result<Option<ResurrectionOutcome>> {
        Ok(self
            .records
            .read()
            .get(outcome_id)
            .map(|(_, o)| o.clone()))
    }

    async fn list_by_module(
        &self,
        module: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>> {
        let matching = self
            .records
            .read()
            .values()
            .filter(|(_, o)| o.target_module == module)
            .cloned()
            .collect();
        Ok(self.sorted(matching, limit, since))
    }

    async fn list_by_type(
        &self,
        outcome_type: OutcomeType,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>> {
        let matching = self
            .records
            .read()
            .values()
            .filter(|(_, o)| o.outcome_type == outcome_type)
            .cloned()
            .collect();
        Ok(self.sorted(matching, limit, since))
    }

    async fn list_recent(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>> {
        let matching = self.records.read().values().cloned().collect();
        Ok(self.sorted(matching, limit, since))
    }

    async fn statistics(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<OutcomeStatistics> {
        let outcomes: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|(_, o)| since.map_or(true, |s| o.timestamp >= s))
            .filter(|(_, o)| until.map_or(true, |u| o.timestamp <= u))
            .map(|(_, o)| o.clone())
            .collect();
        Ok(compute_statistics(&outcomes, since, until))
    }

    async fn module_statistics(&self, module: &str) -> Result<ModuleStatistics> {
        let outcomes: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|(_, o)| o.target_module == module)
            .map(|(_, o)| o.clone())
            .collect();
        Ok(compute_module_statistics(module, &outcomes))
    }

    async fn update(&self, outcome_id: &str, patch: &OutcomePatch) -> Result<bool> {
        let mut records = self.records.write();
        match records.get_mut(outcome_id) {
            Some((_, outcome)) => {
                patch.apply(outcome);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
