//! Detected patterns and module profiles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kinds of systemic patterns the analyzer can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    FalsePositiveSpike,
    ModuleInstability,
    TimeCorrelation,
    RiskScoreDrift,
    AutoApproveDegradation,
    RecoveryTimeIncrease,
}

/// Severity of a detected pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternSeverity {
    Info,
    Warning,
    Critical,
}

/// A pattern detected in the outcome history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub severity: PatternSeverity,
    pub detected_at: DateTime<Utc>,
    pub description: String,
    pub confidence: f64,
    pub affected_modules: Vec<String>,
    pub evidence: HashMap<String, serde_json::Value>,
    pub recommended_actions: Vec<String>,
}

/// Direction of a module's recent risk scores relative to its older ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTrend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// Behavioral profile of a module built from its outcome history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleProfile {
    pub module: String,
    pub total_resurrections: u64,
    pub success_rate: f64,
    pub avg_risk_score: f64,
    pub avg_recovery_time: f64,
    pub false_positive_rate: f64,
    pub auto_approve_eligible: bool,
    pub risk_trend: RiskTrend,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}
