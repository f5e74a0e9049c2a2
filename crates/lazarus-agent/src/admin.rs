//! Administrative operations
//!
//! The library surface an administrative caller consumes: recent
//! outcomes, aggregate statistics, operator approval of undetermined
//! outcomes, and the threshold-proposal workflow. There is no HTTP here;
//! transports live outside the core.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use lazarus_common::{
    Error, FeedbackSource, OutcomePatch, OutcomeStatistics, OutcomeType, Result,
    ResurrectionOutcome,
};
use lazarus_decision::{DecisionEngine, DecisionStatistics};
use lazarus_learning::{AdjustmentProposal, ThresholdAdapter, ThresholdState};
use lazarus_store::OutcomeStore;

const KILL_LOOKUP_SCAN_LIMIT: usize = 500;

/// Aggregate view for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStatistics {
    pub outcomes: OutcomeStatistics,
    pub decisions: DecisionStatistics,
    pub thresholds_version: u64,
}

/// Admin entry points over the running agent's components
pub struct AdminOps {
    store: Arc<dyn OutcomeStore>,
    decision_engine: Arc<dyn DecisionEngine>,
    adapter: Arc<ThresholdAdapter>,
}

impl AdminOps {
    pub fn new(
        store: Arc<dyn OutcomeStore>,
        decision_engine: Arc<dyn DecisionEngine>,
        adapter: Arc<ThresholdAdapter>,
    ) -> Self {
        AdminOps {
            store,
            decision_engine,
            adapter,
        }
    }

    /// Paginated recent outcomes, newest first.
    pub async fn recent_outcomes(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ResurrectionOutcome>> {
        let rows = self
            .store
            .list_recent(limit.saturating_add(offset), None)
            .await?;
        Ok(rows.into_iter().skip(offset).collect())
    }

    /// Aggregate statistics plus decision-engine counters.
    pub async fn statistics(&self) -> Result<AdminStatistics> {
        Ok(AdminStatistics {
            outcomes: self.store.statistics(None, None).await?,
            decisions: self.decision_engine.statistics(),
            thresholds_version: self.adapter.shared().version(),
        })
    }

    /// Most recent outcome for a kill event, if any.
    pub async fn find_outcome_by_kill(
        &self,
        kill_id: &str,
    ) -> Result<Option<ResurrectionOutcome>> {
        let rows = self.store.list_recent(KILL_LOOKUP_SCAN_LIMIT, None).await?;
        Ok(rows.into_iter().find(|o| o.kill_id == kill_id))
    }

    /// Operator approval of a pending (undetermined) outcome. Rejected
    /// with `AlreadyResolved` once the outcome has a definite type.
    pub async fn approve_outcome(
        &self,
        outcome_id: &str,
        operator: &str,
        note: &str,
    ) -> Result<ResurrectionOutcome> {
        let outcome = self
            .store
            .get(outcome_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("outcome {}", outcome_id)))?;

        if outcome.outcome_type != OutcomeType::Undetermined {
            return Err(Error::AlreadyResolved(format!(
                "outcome {} already resolved as {}",
                outcome_id,
                outcome.outcome_type.as_str()
            )));
        }

        let patch = OutcomePatch {
            corrected_decision: Some("approve_manual".to_string()),
            feedback_source: Some(FeedbackSource::HumanOperator),
            human_feedback: Some(note.to_string()),
            ..Default::default()
        };
        self.store.update(outcome_id, &patch).await?;

        info!(
            outcome_id = outcome_id,
            kill_id = %outcome.kill_id,
            operator = operator,
            "outcome approved by operator"
        );

        self.store
            .get(outcome_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("outcome {}", outcome_id)))
    }

    /// Threshold proposals awaiting a verdict.
    pub fn pending_proposals(&self) -> Vec<AdjustmentProposal> {
        self.adapter.pending_proposals()
    }

    /// Approve a threshold proposal. Applies it atomically.
    pub fn approve_proposal(&self, proposal_id: &str, operator: &str) -> bool {
        self.adapter.approve(proposal_id, operator)
    }

    /// Reject a threshold proposal without touching live policy.
    pub fn reject_proposal(&self, proposal_id: &str, reason: Option<&str>) -> bool {
        self.adapter.reject(proposal_id, reason)
    }

    /// Snapshot of the live thresholds and their history.
    pub fn thresholds(&self) -> ThresholdState {
        self.adapter.shared().snapshot()
    }
}
