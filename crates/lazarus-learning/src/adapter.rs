//! Adaptive threshold proposals
//!
//! Proposes changes to the shared threshold state grounded in outcome
//! history. Proposals are applied only on approval; each approval bumps
//! the state version and appends the applied adjustments to the history
//! in one atomic step.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lazarus_common::config::LearningConfig;
use lazarus_common::{OutcomeType, Result, ResurrectionOutcome};
use lazarus_store::OutcomeStore;

use crate::thresholds::{
    apply_adjustment, AdjustmentDirection, AdjustmentProposal, ProposalStatus, SharedThresholds,
    ThresholdAdjustment,
};

const PROPOSAL_FETCH_LIMIT: usize = 1000;
/// Floor on the number of auto-approved rows before either auto-approve
/// threshold is analyzed.
const MIN_AUTO_APPROVED: usize = 10;
/// Proposed deltas smaller than this are noise, not adjustments.
const MIN_MEANINGFUL_DELTA: f64 = 0.01;
/// Absolute ceiling when loosening the auto-approve score threshold.
const MAX_AUTO_APPROVE_SCORE: f64 = 0.5;
/// Absolute ceiling when raising the confidence bar.
const MAX_MIN_CONFIDENCE: f64 = 0.95;
const CONFIDENCE_BUCKET_BOUNDARY: f64 = 0.85;

/// Replay result of an adjustment against stored outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub total_outcomes: u64,
    pub would_change: u64,
    pub false_positives_caught: u64,
    pub true_negatives_missed: u64,
}

/// Proposes and (on approval) applies threshold changes
pub struct ThresholdAdapter {
    store: Arc<dyn OutcomeStore>,
    config: LearningConfig,
    shared: SharedThresholds,
}

impl ThresholdAdapter {
    pub fn new(
        store: Arc<dyn OutcomeStore>,
        config: LearningConfig,
        shared: SharedThresholds,
    ) -> Self {
        ThresholdAdapter {
            store,
            config,
            shared,
        }
    }

    pub fn shared(&self) -> &SharedThresholds {
        &self.shared
    }

    /// Analyze recent outcomes and propose threshold adjustments. Runs at
    /// most once per cooldown period and requires the configured sample
    /// floor. Returns `None` when nothing needs to change.
    pub async fn analyze_and_propose(&self) -> Result<Option<AdjustmentProposal>> {
        if !self.config.enabled {
            debug!("adaptive thresholds disabled");
            return Ok(None);
        }

        let now = Utc::now();
        {
            let mut inner = self.shared.lock();
            if let Some(last) = inner.last_analysis {
                let elapsed_hours = (now - last).num_minutes() as f64 / 60.0;
                if elapsed_hours < self.config.adjustment_cooldown_hours as f64 {
                    debug!(
                        elapsed_hours = format!("{:.1}", elapsed_hours),
                        "adjustment cooldown active"
                    );
                    return Ok(None);
                }
            }
            inner.last_analysis = Some(now);
        }

        let since = now - Duration::days(self.config.analysis_window_days);
        let outcomes = self
            .store
            .list_recent(PROPOSAL_FETCH_LIMIT, Some(since))
            .await?;

        if outcomes.len() < self.config.min_samples_required {
            info!(
                samples = outcomes.len(),
                required = self.config.min_samples_required,
                "insufficient samples for threshold analysis"
            );
            return Ok(None);
        }

        let mut adjustments = Vec::new();
        if let Some(adjustment) = self.analyze_auto_approve_score(&outcomes) {
            adjustments.push(adjustment);
        }
        if let Some(adjustment) = self.analyze_min_confidence(&outcomes) {
            adjustments.push(adjustment);
        }

        if adjustments.is_empty() {
            info!("no threshold adjustments recommended");
            return Ok(None);
        }

        let overall_confidence =
            adjustments.iter().map(|a| a.confidence).sum::<f64>() / adjustments.len() as f64;
        let expected_impact = Self::estimate_impact(&adjustments, &outcomes);

        let proposal = AdjustmentProposal {
            proposal_id: Uuid::new_v4().to_string(),
            created_at: now,
            adjustments,
            overall_confidence,
            expected_impact,
            status: ProposalStatus::Pending,
            approved_by: None,
            approved_at: None,
        };

        self.shared
            .lock()
            .pending
            .insert(proposal.proposal_id.clone(), proposal.clone());

        info!(
            proposal_id = %proposal.proposal_id,
            adjustments = proposal.adjustments.len(),
            "threshold adjustment proposal created"
        );

        if !self.config.require_approval {
            self.approve(&proposal.proposal_id, "auto-apply");
            let applied = self
                .shared
                .lock()
                .pending
                .get(&proposal.proposal_id)
                .cloned();
            return Ok(applied.or(Some(proposal)));
        }

        Ok(Some(proposal))
    }

    fn adjustment(
        name: &str,
        old_value: f64,
        new_value: f64,
        direction: AdjustmentDirection,
        reason: String,
        confidence: f64,
        supporting_data: HashMap<String, serde_json::Value>,
    ) -> ThresholdAdjustment {
        ThresholdAdjustment {
            adjustment_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            threshold_name: name.to_string(),
            old_value,
            new_value,
            direction,
            reason,
            confidence,
            supporting_data,
        }
    }

    fn analyze_auto_approve_score(
        &self,
        outcomes: &[ResurrectionOutcome],
    ) -> Option<ThresholdAdjustment> {
        let auto: Vec<_> = outcomes.iter().filter(|o| o.was_auto_approved).collect();
        if auto.len() < MIN_AUTO_APPROVED {
            return None;
        }

        let successes: Vec<_> = auto
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::Success)
            .collect();
        let accuracy = successes.len() as f64 / auto.len() as f64;

        let (current, _) = self.shared.current();
        let current = current.auto_approve_max_score;
        let target = self.config.target_auto_approve_accuracy;
        let max_step = current * self.config.max_adjustment_percent / 100.0;

        if accuracy < target {
            let failures: Vec<_> = auto
                .iter()
                .filter(|o| o.outcome_type != OutcomeType::Success)
                .collect();
            if failures.is_empty() {
                return None;
            }
            let avg_failure_risk = failures
                .iter()
                .map(|o| o.original_risk_score)
                .sum::<f64>()
                / failures.len() as f64;

            let new_value = current
                .min(avg_failure_risk * 0.8)
                .max(current - max_step);
            if (new_value - current).abs() < MIN_MEANINGFUL_DELTA {
                return None;
            }

            return Some(Self::adjustment(
                "auto_approve_max_score",
                current,
                new_value,
                AdjustmentDirection::Decrease,
                format!(
                    "Auto-approve accuracy {:.1}% below target {:.1}%",
                    accuracy * 100.0,
                    target * 100.0
                ),
                (0.5 + auto.len() as f64 / 200.0).min(0.9),
                HashMap::from([
                    ("current_accuracy".into(), serde_json::json!(accuracy)),
                    ("target_accuracy".into(), serde_json::json!(target)),
                    ("auto_approved_count".into(), serde_json::json!(auto.len())),
                    (
                        "avg_failure_risk".into(),
                        serde_json::json!(avg_failure_risk),
                    ),
                ]),
            ));
        }

        if accuracy > target + 0.05 && accuracy > 0.98 {
            let max_success_risk = successes
                .iter()
                .map(|o| o.original_risk_score)
                .fold(0.0_f64, f64::max);

            let new_value = (max_success_risk * 1.1)
                .min(current + max_step)
                .min(MAX_AUTO_APPROVE_SCORE);
            if (new_value - current).abs() < MIN_MEANINGFUL_DELTA {
                return None;
            }

            return Some(Self::adjustment(
                "auto_approve_max_score",
                current,
                new_value,
                AdjustmentDirection::Increase,
                format!(
                    "High accuracy {:.1}% suggests threshold can be relaxed",
                    accuracy * 100.0
                ),
                0.6,
                HashMap::from([
                    ("current_accuracy".into(), serde_json::json!(accuracy)),
                    (
                        "max_success_risk".into(),
                        serde_json::json!(max_success_risk),
                    ),
                    ("auto_approved_count".into(), serde_json::json!(auto.len())),
                ]),
            ));
        }

        None
    }

    fn analyze_min_confidence(
        &self,
        outcomes: &[ResurrectionOutcome],
    ) -> Option<ThresholdAdjustment> {
        let auto: Vec<_> = outcomes.iter().filter(|o| o.was_auto_approved).collect();
        if auto.len() < MIN_AUTO_APPROVED {
            return None;
        }

        let (low, high): (Vec<_>, Vec<_>) = auto
            .iter()
            .partition(|o| o.original_confidence < CONFIDENCE_BUCKET_BOUNDARY);
        if low.len() < 5 || high.len() < 5 {
            return None;
        }

        let success_rate = |bucket: &[&&ResurrectionOutcome]| {
            bucket
                .iter()
                .filter(|o| o.outcome_type == OutcomeType::Success)
                .count() as f64
                / bucket.len() as f64
        };
        let low_rate = success_rate(&low);
        let high_rate = success_rate(&high);
        if high_rate <= low_rate + 0.1 {
            return None;
        }

        let (current, _) = self.shared.current();
        let current = current.auto_approve_min_confidence;
        let new_value = (current * (1.0 + self.config.max_adjustment_percent / 100.0))
            .min(MAX_MIN_CONFIDENCE);
        if (new_value - current).abs() < MIN_MEANINGFUL_DELTA {
            return None;
        }

        Some(Self::adjustment(
            "auto_approve_min_confidence",
            current,
            new_value,
            AdjustmentDirection::Increase,
            format!(
                "Low-confidence outcomes ({:.1}%) worse than high ({:.1}%)",
                low_rate * 100.0,
                high_rate * 100.0
            ),
            0.75,
            HashMap::from([
                ("low_conf_success_rate".into(), serde_json::json!(low_rate)),
                ("high_conf_success_rate".into(), serde_json::json!(high_rate)),
                ("low_conf_count".into(), serde_json::json!(low.len())),
                ("high_conf_count".into(), serde_json::json!(high.len())),
            ]),
        ))
    }

    fn estimate_impact(
        adjustments: &[ThresholdAdjustment],
        outcomes: &[ResurrectionOutcome],
    ) -> HashMap<String, serde_json::Value> {
        let mut accuracy_change = 0.0;
        let mut volume_change = 0i64;
        let mut affected_decisions = 0u64;

        for adjustment in adjustments {
            if adjustment.threshold_name != "auto_approve_max_score"
                || adjustment.direction != AdjustmentDirection::Decrease
            {
                continue;
            }
            let affected: Vec<_> = outcomes
                .iter()
                .filter(|o| {
                    adjustment.new_value < o.original_risk_score
                        && o.original_risk_score <= adjustment.old_value
                })
                .collect();
            affected_decisions += affected.len() as u64;
            volume_change -= affected.len() as i64;
            let failures_avoided = affected
                .iter()
                .filter(|o| o.outcome_type != OutcomeType::Success)
                .count();
            if !affected.is_empty() {
                accuracy_change += failures_avoided as f64 / outcomes.len() as f64;
            }
        }

        HashMap::from([
            (
                "estimated_accuracy_change".into(),
                serde_json::json!(accuracy_change),
            ),
            (
                "estimated_auto_approve_volume_change".into(),
                serde_json::json!(volume_change),
            ),
            (
                "affected_decisions".into(),
                serde_json::json!(affected_decisions),
            ),
        ])
    }

    /// Approve a pending proposal: applies every adjustment, appends them
    /// to the history and bumps the version, atomically. Returns false for
    /// unknown or already-settled proposals.
    pub fn approve(&self, proposal_id: &str, approved_by: &str) -> bool {
        let now = Utc::now();
        let mut inner = self.shared.lock();

        let adjustments = match inner.pending.get_mut(proposal_id) {
            Some(proposal) if proposal.status == ProposalStatus::Pending => {
                proposal.status = ProposalStatus::Approved;
                proposal.approved_by = Some(approved_by.to_string());
                proposal.approved_at = Some(now);
                proposal.adjustments.clone()
            }
            Some(proposal) => {
                warn!(
                    proposal_id = proposal_id,
                    status = ?proposal.status,
                    "proposal already settled"
                );
                return false;
            }
            None => {
                warn!(proposal_id = proposal_id, "proposal not found");
                return false;
            }
        };

        for adjustment in &adjustments {
            apply_adjustment(&mut inner.state, adjustment);
            inner.state.adjustment_history.push(adjustment.clone());
        }
        inner.state.version += 1;
        inner.state.last_updated = now;

        info!(
            proposal_id = proposal_id,
            approved_by = approved_by,
            adjustments = adjustments.len(),
            version = inner.state.version,
            "threshold adjustments applied"
        );
        true
    }

    /// Reject a pending proposal without touching the state.
    pub fn reject(&self, proposal_id: &str, reason: Option<&str>) -> bool {
        let mut inner = self.shared.lock();
        match inner.pending.get_mut(proposal_id) {
            Some(proposal) if proposal.status == ProposalStatus::Pending => {
                proposal.status = ProposalStatus::Rejected;
                info!(
                    proposal_id = proposal_id,
                    reason = reason.unwrap_or(""),
                    "proposal rejected"
                );
                true
            }
            _ => false,
        }
    }

    /// All proposals still awaiting a verdict.
    pub fn pending_proposals(&self) -> Vec<AdjustmentProposal> {
        self.shared
            .lock()
            .pending
            .values()
            .filter(|p| p.status == ProposalStatus::Pending)
            .cloned()
            .collect()
    }

    /// Applied adjustments, most recent first.
    pub fn adjustment_history(&self, limit: usize) -> Vec<ThresholdAdjustment> {
        let inner = self.shared.lock();
        inner
            .state
            .adjustment_history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Replay an adjustment against stored outcomes to see what it would
    /// have changed.
    pub async fn simulate(
        &self,
        adjustment: &ThresholdAdjustment,
        outcomes: Option<Vec<ResurrectionOutcome>>,
    ) -> Result<SimulationResult> {
        let outcomes = match outcomes {
            Some(outcomes) => outcomes,
            None => {
                let since = Utc::now() - Duration::days(self.config.analysis_window_days);
                self.store
                    .list_recent(PROPOSAL_FETCH_LIMIT, Some(since))
                    .await?
            }
        };

        let mut result = SimulationResult {
            total_outcomes: outcomes.len() as u64,
            would_change: 0,
            false_positives_caught: 0,
            true_negatives_missed: 0,
        };

        if adjustment.threshold_name == "auto_approve_max_score" {
            for o in &outcomes {
                let old_auto = o.original_risk_score <= adjustment.old_value;
                let new_auto = o.original_risk_score <= adjustment.new_value;
                if old_auto != new_auto {
                    result.would_change += 1;
                    if !new_auto && o.outcome_type != OutcomeType::Success {
                        result.false_positives_caught += 1;
                    }
                    if !new_auto && o.outcome_type == OutcomeType::Success {
                        result.true_negatives_missed += 1;
                    }
                }
            }
        }

        Ok(result)
    }

    /// Timestamp of the last analysis run, if any.
    pub fn last_analysis(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().last_analysis
    }
}
