//! Outcome storage for the Lazarus resurrection agent
//!
//! The store is the durable, queryable log of every decision and its
//! eventual fate. Two backends satisfy the same contract: a sled-backed
//! persistent store for production and an in-memory store for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use lazarus_common::config::StorageConfig;
use lazarus_common::{
    Error, ModuleStatistics, OutcomePatch, OutcomeStatistics, OutcomeType, Result,
    ResurrectionOutcome,
};

mod memory;
mod sled_store;
mod stats;

pub use memory::MemoryOutcomeStore;
pub use sled_store::SledOutcomeStore;

/// Outcome store trait. Every operation is atomic with respect to
/// concurrent callers; list results are ordered by timestamp descending
/// with insertion order preserved among equal timestamps.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Insert or replace an outcome keyed by `outcome_id`.
    async fn store(&self, outcome: &ResurrectionOutcome) -> Result<()>;

    /// Fetch an outcome by id.
    async fn get(&self, outcome_id: &str) -> Result<Option<ResurrectionOutcome>>;

    /// Outcomes for one module, newest first.
    async fn list_by_module(
        &self,
        module: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>>;

    /// Outcomes of one type, newest first.
    async fn list_by_type(
        &self,
        outcome_type: OutcomeType,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>>;

    /// Most recent outcomes across all modules.
    async fn list_recent(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResurrectionOutcome>>;

    /// Aggregate statistics over an optional timestamp range (inclusive).
    async fn statistics(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<OutcomeStatistics>;

    /// Per-module aggregates.
    async fn module_statistics(&self, module: &str) -> Result<ModuleStatistics>;

    /// Apply a patch to an existing outcome. Returns whether a record was
    /// found. Fields outside [`OutcomePatch`] cannot be changed.
    async fn update(&self, outcome_id: &str, patch: &OutcomePatch) -> Result<bool>;
}

/// Create an outcome store from configuration.
pub async fn create_outcome_store(config: &StorageConfig) -> Result<Arc<dyn OutcomeStore>> {
    match config.backend.as_str() {
        "sled" => Ok(Arc::new(SledOutcomeStore::open(&config.path)?)),
        "memory" => Ok(Arc::new(MemoryOutcomeStore::new())),
        other => Err(Error::Configuration(format!(
            "unknown storage backend: {}",
            other
        ))),
    }
}
