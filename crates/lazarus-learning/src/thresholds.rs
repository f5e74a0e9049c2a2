//! Shared threshold state and adjustment records
//!
//! The threshold state is the only piece of live policy the learning loop
//! may change, and it only ever changes through an approved proposal:
//! every approval applies its adjustments, appends them to the history and
//! bumps the version, atomically under one lock. History is append-only.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use lazarus_common::{RiskThresholds, RiskWeights};

/// Direction of a threshold adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentDirection {
    Increase,
    Decrease,
    NoChange,
}

/// One proposed (or applied) change to a named threshold or weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAdjustment {
    pub adjustment_id: String,
    pub timestamp: DateTime<Utc>,
    pub threshold_name: String,
    pub old_value: f64,
    pub new_value: f64,
    pub direction: AdjustmentDirection,
    pub reason: String,
    pub confidence: f64,
    pub supporting_data: HashMap<String, serde_json::Value>,
}

/// Lifecycle of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A batch of adjustments awaiting operator approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentProposal {
    pub proposal_id: String,
    pub created_at: DateTime<Utc>,
    pub adjustments: Vec<ThresholdAdjustment>,
    pub overall_confidence: f64,
    pub expected_impact: HashMap<String, serde_json::Value>,
    pub status: ProposalStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// Current threshold values plus their audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdState {
    pub risk_thresholds: RiskThresholds,
    pub risk_weights: RiskWeights,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
    pub adjustment_history: Vec<ThresholdAdjustment>,
}

pub(crate) struct SharedInner {
    pub(crate) state: ThresholdState,
    pub(crate) pending: HashMap<String, AdjustmentProposal>,
    pub(crate) last_analysis: Option<DateTime<Utc>>,
}

/// Thread-safe handle to the live threshold state. Pending proposals live
/// under the same lock; they are lost on restart by design.
#[derive(Clone)]
pub struct SharedThresholds {
    inner: Arc<Mutex<SharedInner>>,
}

impl SharedThresholds {
    pub fn new(thresholds: RiskThresholds, weights: RiskWeights) -> Self {
        SharedThresholds {
            inner: Arc::new(Mutex::new(SharedInner {
                state: ThresholdState {
                    risk_thresholds: thresholds,
                    risk_weights: weights,
                    last_updated: Utc::now(),
                    version: 1,
                    adjustment_history: Vec::new(),
                },
                pending: HashMap::new(),
                last_analysis: None,
            })),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock()
    }

    /// Snapshot of the live thresholds and weights for a single decision.
    pub fn current(&self) -> (RiskThresholds, RiskWeights) {
        let inner = self.inner.lock();
        (inner.state.risk_thresholds, inner.state.risk_weights)
    }

    /// Full state snapshot including the adjustment history.
    pub fn snapshot(&self) -> ThresholdState {
        self.inner.lock().state.clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().state.version
    }
}

impl Default for SharedThresholds {
    fn default() -> Self {
        SharedThresholds::new(RiskThresholds::default(), RiskWeights::default())
    }
}

/// Apply one adjustment to the state by threshold name. History is
/// appended by the caller as part of the same locked section.
pub(crate) fn apply_adjustment(state: &mut ThresholdState, adjustment: &ThresholdAdjustment) {
    let t = &mut state.risk_thresholds;
    let w = &mut state.risk_weights;
    match adjustment.threshold_name.as_str() {
        "auto_approve_max_score" => t.auto_approve_max_score = adjustment.new_value,
        "auto_approve_min_confidence" => t.auto_approve_min_confidence = adjustment.new_value,
        "escalation_min_score" => t.escalation_min_score = adjustment.new_value,
        "deny_min_score" => t.deny_min_score = adjustment.new_value,
        "smith_confidence" => w.smith_confidence = adjustment.new_value,
        "siem_risk_score" => w.siem_risk_score = adjustment.new_value,
        "false_positive_history" => w.false_positive_history = adjustment.new_value,
        "kill_reason" => w.kill_reason = adjustment.new_value,
        "severity" => w.severity = adjustment.new_value,
        "module_criticality" => w.module_criticality = adjustment.new_value,
        other => {
            warn!(threshold_name = other, "ignoring adjustment to unknown threshold");
            return;
        }
    }
    info!(
        threshold_name = %adjustment.threshold_name,
        old_value = adjustment.old_value,
        new_value = adjustment.new_value,
        "threshold adjustment applied"
    );
}
