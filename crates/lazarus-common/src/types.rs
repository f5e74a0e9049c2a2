//! Core data model for the resurrection-decision pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Unique identifier of a kill event, assigned by the killer
pub type KillId = String;

/// Logical workload name
pub type ModuleName = String;

/// Clamp a score into the [0, 1] band
pub fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Why the killer stopped the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillReason {
    ThreatDetected,
    AnomalyBehavior,
    PolicyViolation,
    ResourceExhaustion,
    DependencyCascade,
    ManualOverride,
}

/// Severity assigned by the killer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

/// Risk level bands over the normalized risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a risk score to its band. Boundaries are fixed, not configurable:
    /// [0, 0.2) MINIMAL, [0.2, 0.4) LOW, [0.4, 0.6) MEDIUM,
    /// [0.6, 0.8) HIGH, [0.8, 1.0] CRITICAL.
    pub fn from_score(score: f64) -> Self {
        let score = clamp_score(score);
        if score < 0.2 {
            RiskLevel::Minimal
        } else if score < 0.4 {
            RiskLevel::Low
        } else if score < 0.6 {
            RiskLevel::Medium
        } else if score < 0.8 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Classification of a resurrection decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    ApproveAuto,
    PendingReview,
    Deny,
    Defer,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::ApproveAuto => "APPROVE_AUTO",
            DecisionOutcome::PendingReview => "PENDING_REVIEW",
            DecisionOutcome::Deny => "DENY",
            DecisionOutcome::Defer => "DEFER",
        }
    }
}

/// Eventual fate of a resurrection decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeType {
    Success,
    PartialSuccess,
    Failure,
    Rollback,
    FalsePositive,
    TruePositive,
    Undetermined,
}

impl OutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeType::Success => "SUCCESS",
            OutcomeType::PartialSuccess => "PARTIAL_SUCCESS",
            OutcomeType::Failure => "FAILURE",
            OutcomeType::Rollback => "ROLLBACK",
            OutcomeType::FalsePositive => "FALSE_POSITIVE",
            OutcomeType::TruePositive => "TRUE_POSITIVE",
            OutcomeType::Undetermined => "UNDETERMINED",
        }
    }
}

/// Where outcome feedback came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackSource {
    Automated,
    HumanOperator,
    SiemCorrelation,
    RollbackTrigger,
}

/// Enrichment verdict on whether resurrection is advisable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Unknown,
    SafeToResurrect,
    ProceedWithCaution,
    ManualReview,
    DenyResurrection,
    NoData,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Unknown => "unknown",
            Recommendation::SafeToResurrect => "safe_to_resurrect",
            Recommendation::ProceedWithCaution => "proceed_with_caution",
            Recommendation::ManualReview => "manual_review",
            Recommendation::DenyResurrection => "deny_resurrection",
            Recommendation::NoData => "no_data",
        }
    }
}

/// Kill event delivered by the upstream killer. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillEvent {
    pub kill_id: KillId,
    pub timestamp: DateTime<Utc>,
    pub target_module: ModuleName,
    pub target_instance_id: String,
    pub kill_reason: KillReason,
    pub severity: Severity,
    pub confidence_score: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<ModuleName>,
    #[serde(default)]
    pub source_agent: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl KillEvent {
    /// Structural validation applied before the event enters the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.kill_id.is_empty() {
            return Err(Error::InvalidInput("kill_id must not be empty".into()));
        }
        if self.target_module.is_empty() {
            return Err(Error::InvalidInput("target_module must not be empty".into()));
        }
        if self.target_instance_id.is_empty() {
            return Err(Error::InvalidInput(
                "target_instance_id must not be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(Error::InvalidInput(format!(
                "confidence_score out of range: {}",
                self.confidence_score
            )));
        }
        Ok(())
    }
}

/// A single threat signal surfaced by enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatIndicator {
    pub indicator_type: String,
    pub threat_score: f64,
    #[serde(default)]
    pub description: String,
}

impl ThreatIndicator {
    pub fn new(indicator_type: impl Into<String>, threat_score: f64) -> Self {
        ThreatIndicator {
            indicator_type: indicator_type.into(),
            threat_score: clamp_score(threat_score),
            description: String::new(),
        }
    }
}

/// Threat-intel context for a kill event. Lives only for the duration of
/// the pipeline; the default stands in for "no data".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub risk_score: f64,
    pub false_positive_history: u32,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub threat_indicators: Vec<ThreatIndicator>,
}

impl Default for EnrichmentResult {
    fn default() -> Self {
        EnrichmentResult {
            risk_score: 0.5,
            false_positive_history: 0,
            recommendation: Recommendation::Unknown,
            threat_indicators: Vec::new(),
        }
    }
}

impl EnrichmentResult {
    pub fn new(
        risk_score: f64,
        false_positive_history: u32,
        recommendation: Recommendation,
    ) -> Self {
        EnrichmentResult {
            risk_score: clamp_score(risk_score),
            false_positive_history,
            recommendation,
            threat_indicators: Vec::new(),
        }
    }

    /// Highest threat score among indicators, if any.
    pub fn max_threat_score(&self) -> Option<f64> {
        self.threat_indicators
            .iter()
            .map(|i| i.threat_score)
            .fold(None, |acc, s| Some(acc.map_or(s, |a: f64| a.max(s))))
    }
}

/// One weighted contribution to the overall risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub raw_value: f64,
    pub weight: f64,
    pub weighted_score: f64,
    pub description: String,
}

/// Complete risk assessment for a kill event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub assessment_id: String,
    pub kill_id: KillId,
    pub timestamp: DateTime<Utc>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
    pub auto_approve_eligible: bool,
    pub requires_escalation: bool,
}

/// Resurrection decision with its reasoning narrative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub kill_id: KillId,
    pub timestamp: DateTime<Utc>,
    pub outcome: DecisionOutcome,
    pub assessment: RiskAssessment,
    pub reasoning: Vec<String>,
    pub recommended_action: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Result of a resurrection attempt (real or simulated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub target_module: ModuleName,
    pub target_instance_id: String,
    pub container_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub health_status: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionResult {
    /// Synthetic result for events whose decision did not trigger execution.
    pub fn skipped(event: &KillEvent) -> Self {
        ExecutionResult {
            success: false,
            target_module: event.target_module.clone(),
            target_instance_id: event.target_instance_id.clone(),
            container_id: None,
            started_at: None,
            duration_seconds: 0.0,
            health_status: None,
            error: None,
            metadata: HashMap::from([("skipped".to_string(), serde_json::Value::Bool(true))]),
        }
    }

    pub fn failure(event: &KillEvent, tag: impl Into<String>, duration_seconds: f64) -> Self {
        ExecutionResult {
            success: false,
            target_module: event.target_module.clone(),
            target_instance_id: event.target_instance_id.clone(),
            container_id: None,
            started_at: None,
            duration_seconds,
            health_status: None,
            error: Some(tag.into()),
            metadata: HashMap::new(),
        }
    }
}

/// Durable record of a decision and its eventual fate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResurrectionOutcome {
    pub outcome_id: String,
    pub decision_id: String,
    pub kill_id: KillId,
    pub target_module: ModuleName,
    pub timestamp: DateTime<Utc>,
    pub outcome_type: OutcomeType,

    pub original_risk_score: f64,
    pub original_confidence: f64,
    pub original_decision: String,
    pub was_auto_approved: bool,

    pub health_score_after: Option<f64>,
    pub time_to_healthy: Option<f64>,
    #[serde(default)]
    pub anomalies_detected: u32,
    #[serde(default)]
    pub required_rollback: bool,

    pub feedback_source: FeedbackSource,
    pub human_feedback: Option<String>,
    pub corrected_decision: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Fields an outcome update may touch. Everything else on the record is
/// immutable once stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomePatch {
    pub outcome_type: Option<OutcomeType>,
    pub health_score_after: Option<f64>,
    pub time_to_healthy: Option<f64>,
    pub anomalies_detected: Option<u32>,
    pub required_rollback: Option<bool>,
    pub feedback_source: Option<FeedbackSource>,
    pub human_feedback: Option<String>,
    pub corrected_decision: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl OutcomePatch {
    /// Apply the patch to a record in place.
    pub fn apply(&self, outcome: &mut ResurrectionOutcome) {
        if let Some(t) = self.outcome_type {
            outcome.outcome_type = t;
        }
        if let Some(h) = self.health_score_after {
            outcome.health_score_after = Some(clamp_score(h));
        }
        if let Some(t) = self.time_to_healthy {
            outcome.time_to_healthy = Some(t);
        }
        if let Some(a) = self.anomalies_detected {
            outcome.anomalies_detected = a;
        }
        if let Some(r) = self.required_rollback {
            outcome.required_rollback = r;
        }
        if let Some(f) = self.feedback_source {
            outcome.feedback_source = f;
        }
        if let Some(ref h) = self.human_feedback {
            outcome.human_feedback = Some(h.clone());
        }
        if let Some(ref c) = self.corrected_decision {
            outcome.corrected_decision = Some(c.clone());
        }
        if let Some(ref m) = self.metadata {
            outcome.metadata = m.clone();
        }
    }
}

/// Aggregate statistics over a window of outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStatistics {
    pub total_outcomes: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub rollback_count: u64,
    pub false_positive_count: u64,
    pub true_positive_count: u64,

    pub avg_risk_score_success: f64,
    pub avg_risk_score_failure: f64,
    pub avg_time_to_healthy: f64,

    pub auto_approved_count: u64,
    pub auto_approve_accuracy: f64,
    pub human_override_rate: f64,

    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Per-module aggregates feeding the risk engine's history factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatistics {
    pub module: ModuleName,
    pub total_resurrections: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub avg_risk_score: f64,
    pub avg_recovery_time: f64,
}

impl ModuleStatistics {
    pub fn empty(module: impl Into<ModuleName>) -> Self {
        ModuleStatistics {
            module: module.into(),
            total_resurrections: 0,
            success_count: 0,
            failure_count: 0,
            success_rate: 0.0,
            avg_risk_score: 0.0,
            avg_recovery_time: 0.0,
        }
    }
}

/// Configurable risk thresholds. Defaults match the shipped policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub auto_approve_max_score: f64,
    pub auto_approve_min_confidence: f64,
    pub escalation_min_score: f64,
    pub deny_min_score: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        RiskThresholds {
            auto_approve_max_score: 0.3,
            auto_approve_min_confidence: 0.85,
            escalation_min_score: 0.7,
            deny_min_score: 0.85,
        }
    }
}

/// Configurable weights for the risk factor table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub smith_confidence: f64,
    pub siem_risk_score: f64,
    pub false_positive_history: f64,
    pub kill_reason: f64,
    pub severity: f64,
    pub module_criticality: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        RiskWeights {
            smith_confidence: 0.30,
            siem_risk_score: 0.25,
            false_positive_history: 0.20,
            kill_reason: 0.10,
            severity: 0.10,
            module_criticality: 0.05,
        }
    }
}
