//! Policy decision engine
//!
//! Maps a risk assessment (plus the kill event for immediate-deny inputs)
//! to a [`Decision`] with an operator-readable reasoning narrative. The
//! engine also self-tunes its local auto-approve confidence bar from
//! observed accuracy; the shared threshold state is owned elsewhere.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use lazarus_common::config::DecisionConfig;
use lazarus_common::{
    Decision, DecisionOutcome, EnrichmentResult, KillEvent, KillReason, Result, RiskAssessment,
    RiskLevel, RiskThresholds,
};
use lazarus_store::OutcomeStore;

/// Threat-indicator score above which resurrection is denied outright.
const DENY_INDICATOR_SCORE: f64 = 0.9;
/// Killer confidence above which a confirmed threat kill is denied outright.
const DENY_THREAT_CONFIDENCE: f64 = 0.95;

const CALIBRATION_STEP: f64 = 0.02;
const CALIBRATION_FLOOR: f64 = 0.70;
const CALIBRATION_CEILING: f64 = 0.98;
const CALIBRATION_MIN_SAMPLES: u64 = 10;
const CALIBRATION_LOOSEN_ABOVE: f64 = 0.95;
const CALIBRATION_TIGHTEN_BELOW: f64 = 0.80;

/// Running decision counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStatistics {
    pub total_decisions: u64,
    pub approve_auto: u64,
    pub pending_review: u64,
    pub deny: u64,
    pub defer: u64,
}

/// Result of one calibration pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub samples: u64,
    pub accuracy: f64,
    pub previous_min_confidence: f64,
    pub min_confidence: f64,
    pub changed: bool,
}

/// Decision engine trait
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Produce a decision for an assessed kill event.
    fn decide(
        &self,
        event: &KillEvent,
        enrichment: &EnrichmentResult,
        assessment: &RiskAssessment,
    ) -> Decision;

    /// Human-readable explanation of a decision.
    fn explain(&self, decision: &Decision) -> String;

    /// Running outcome counters.
    fn statistics(&self) -> DecisionStatistics;

    /// The engine-local auto-approve confidence bar.
    fn auto_approve_min_confidence(&self) -> f64;

    /// Self-tune the confidence bar from auto-approve accuracy over the
    /// analysis window. Never mutates the shared threshold state.
    async fn calibrate(&self) -> Result<CalibrationReport>;
}

/// The standard engine used in both observer and live deployments; the
/// mode only gates execution downstream, never the classification.
pub struct StandardDecisionEngine {
    auto_approve_enabled: bool,
    always_deny_modules: HashSet<String>,
    always_require_approval: HashSet<String>,
    analysis_window_days: i64,
    min_confidence: Mutex<f64>,
    counters: Mutex<DecisionStatistics>,
    store: Arc<dyn OutcomeStore>,
}

impl StandardDecisionEngine {
    pub fn new(
        config: &DecisionConfig,
        thresholds: &RiskThresholds,
        analysis_window_days: i64,
        store: Arc<dyn OutcomeStore>,
    ) -> Self {
        StandardDecisionEngine {
            auto_approve_enabled: config.auto_approve_enabled,
            always_deny_modules: config.always_deny_modules.iter().cloned().collect(),
            always_require_approval: config.always_require_approval.iter().cloned().collect(),
            analysis_window_days,
            min_confidence: Mutex::new(thresholds.auto_approve_min_confidence),
            counters: Mutex::new(DecisionStatistics::default()),
            store,
        }
    }

    /// Immediate-deny conditions, evaluated before risk scoring matters.
    fn deny_reasons(&self, event: &KillEvent, enrichment: &EnrichmentResult) -> Vec<String> {
        let mut reasons = Vec::new();

        if self.always_deny_modules.contains(&event.target_module) {
            reasons.push(format!(
                "Module '{}' is on the deny list",
                event.target_module
            ));
        }

        if event.kill_reason == KillReason::ThreatDetected
            && event.confidence_score > DENY_THREAT_CONFIDENCE
        {
            reasons.push(format!(
                "Kill reason is confirmed threat with {:.0}% confidence",
                event.confidence_score * 100.0
            ));
        }

        for indicator in &enrichment.threat_indicators {
            if indicator.threat_score > DENY_INDICATOR_SCORE {
                reasons.push(format!(
                    "High-severity threat indicator: {}",
                    indicator.indicator_type
                ));
            }
        }

        reasons
    }

    fn deny_decision(&self, event: &KillEvent, mut reasons: Vec<String>) -> Decision {
        reasons.insert(0, "Immediate denial triggered".to_string());

        let assessment = RiskAssessment {
            assessment_id: Uuid::new_v4().to_string(),
            kill_id: event.kill_id.clone(),
            timestamp: Utc::now(),
            risk_score: 0.95,
            risk_level: RiskLevel::Critical,
            confidence: 0.95,
            factors: Vec::new(),
            recommendations: vec![
                "Critical risk - do not resurrect without investigation".to_string()
            ],
            auto_approve_eligible: false,
            requires_escalation: true,
        };

        Decision {
            decision_id: Uuid::new_v4().to_string(),
            kill_id: event.kill_id.clone(),
            timestamp: Utc::now(),
            outcome: DecisionOutcome::Deny,
            assessment,
            reasoning: reasons,
            recommended_action: "Do not resurrect - threat confirmed".to_string(),
            constraints: Vec::new(),
        }
    }

    fn classify(
        &self,
        event: &KillEvent,
        assessment: &RiskAssessment,
    ) -> (DecisionOutcome, Vec<String>) {
        let min_confidence = *self.min_confidence.lock();

        let mut outcome = match assessment.risk_level {
            RiskLevel::High | RiskLevel::Critical => DecisionOutcome::Deny,
            RiskLevel::Minimal | RiskLevel::Low
                if self.auto_approve_enabled && assessment.confidence >= min_confidence =>
            {
                DecisionOutcome::ApproveAuto
            }
            _ => DecisionOutcome::PendingReview,
        };

        let mut constraints = Vec::new();
        if outcome == DecisionOutcome::ApproveAuto
            && self.always_require_approval.contains(&event.target_module)
        {
            outcome = DecisionOutcome::PendingReview;
            constraints.push(format!(
                "Module '{}' always requires manual approval",
                event.target_module
            ));
        }

        (outcome, constraints)
    }

    fn build_reasoning(
        &self,
        event: &KillEvent,
        enrichment: &EnrichmentResult,
        assessment: &RiskAssessment,
    ) -> Vec<String> {
        let mut reasoning = vec![
            format!(
                "Module '{}' killed ({:?}) with {:.0}% confidence",
                event.target_module,
                event.kill_reason,
                event.confidence_score * 100.0
            ),
            format!(
                "Threat-intel risk assessment: {:.0}% ({})",
                enrichment.risk_score * 100.0,
                enrichment.recommendation.as_str()
            ),
        ];

        if enrichment.false_positive_history > 0 {
            reasoning.push(format!(
                "Module has {} prior false positives",
                enrichment.false_positive_history
            ));
        }

        match enrichment.max_threat_score() {
            Some(max) => reasoning.push(format!(
                "Found {} threat indicators (max score: {:.0}%)",
                enrichment.threat_indicators.len(),
                max * 100.0
            )),
            None => reasoning.push("No active threat indicators found".to_string()),
        }

        reasoning.push(format!(
            "Overall risk assessment: {}",
            assessment.risk_level.as_str()
        ));

        reasoning
    }

    fn recommended_action(outcome: DecisionOutcome, risk_level: RiskLevel) -> String {
        match outcome {
            DecisionOutcome::Deny => "Do not resurrect - risk too high".to_string(),
            DecisionOutcome::ApproveAuto => {
                "Auto-resurrect - low risk with high confidence".to_string()
            }
            DecisionOutcome::PendingReview => {
                if matches!(risk_level, RiskLevel::Minimal | RiskLevel::Low) {
                    "Manual review recommended - likely safe to resurrect".to_string()
                } else {
                    "Manual review required - moderate risk assessment".to_string()
                }
            }
            DecisionOutcome::Defer => {
                "Gather additional information before deciding".to_string()
            }
        }
    }

    fn record(&self, outcome: DecisionOutcome) {
        let mut counters = self.counters.lock();
        counters.total_decisions += 1;
        match outcome {
            DecisionOutcome::ApproveAuto => counters.approve_auto += 1,
            DecisionOutcome::PendingReview => counters.pending_review += 1,
            DecisionOutcome::Deny => counters.deny += 1,
            DecisionOutcome::Defer => counters.defer += 1,
        }
    }
}

#[async_trait]
impl DecisionEngine for StandardDecisionEngine {
    fn decide(
        &self,
        event: &KillEvent,
        enrichment: &EnrichmentResult,
        assessment: &RiskAssessment,
    ) -> Decision {
        let deny_reasons = self.deny_reasons(event, enrichment);
        let decision = if !deny_reasons.is_empty() {
            self.deny_decision(event, deny_reasons)
        } else {
            let (outcome, constraints) = self.classify(event, assessment);
            Decision {
                decision_id: Uuid::new_v4().to_string(),
                kill_id: event.kill_id.clone(),
                timestamp: Utc::now(),
                outcome,
                assessment: assessment.clone(),
                reasoning: self.build_reasoning(event, enrichment, assessment),
                recommended_action: Self::recommended_action(outcome, assessment.risk_level),
                constraints,
            }
        };

        self.record(decision.outcome);

        info!(
            kill_id = %event.kill_id,
            decision_id = %decision.decision_id,
            outcome = decision.outcome.as_str(),
            risk_level = decision.assessment.risk_level.as_str(),
            risk_score = format!("{:.3}", decision.assessment.risk_score),
            confidence = format!("{:.3}", decision.assessment.confidence),
            "decision made"
        );

        decision
    }

    fn explain(&self, decision: &Decision) -> String {
        let mut lines = vec![
            format!("Decision: {}", decision.outcome.as_str()),
            format!(
                "Risk Level: {} (score: {:.2})",
                decision.assessment.risk_level.as_str(),
                decision.assessment.risk_score
            ),
            format!("Confidence: {:.0}%", decision.assessment.confidence * 100.0),
            String::new(),
            "Reasoning:".to_string(),
        ];
        for (i, reason) in decision.reasoning.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, reason));
        }
        lines.push(String::new());
        lines.push(format!("Recommended Action: {}", decision.recommended_action));
        if !decision.constraints.is_empty() {
            lines.push("Constraints:".to_string());
            for constraint in &decision.constraints {
                lines.push(format!("  - {}", constraint));
            }
        }
        lines.join("\n")
    }

    fn statistics(&self) -> DecisionStatistics {
        *self.counters.lock()
    }

    fn auto_approve_min_confidence(&self) -> f64 {
        *self.min_confidence.lock()
    }

    async fn calibrate(&self) -> Result<CalibrationReport> {
        let since = Utc::now() - Duration::days(self.analysis_window_days);
        let stats = self.store.statistics(Some(since), None).await?;

        let current = *self.min_confidence.lock();
        let mut report = CalibrationReport {
            samples: stats.auto_approved_count,
            accuracy: stats.auto_approve_accuracy,
            previous_min_confidence: current,
            min_confidence: current,
            changed: false,
        };

        if stats.auto_approved_count < CALIBRATION_MIN_SAMPLES {
            return Ok(report);
        }

        let new_value = if stats.auto_approve_accuracy > CALIBRATION_LOOSEN_ABOVE {
            (current - CALIBRATION_STEP).max(CALIBRATION_FLOOR)
        } else if stats.auto_approve_accuracy < CALIBRATION_TIGHTEN_BELOW {
            (current + CALIBRATION_STEP).min(CALIBRATION_CEILING)
        } else {
            current
        };

        if (new_value - current).abs() > f64::EPSILON {
            *self.min_confidence.lock() = new_value;
            report.min_confidence = new_value;
            report.changed = true;
            info!(
                accuracy = format!("{:.3}", stats.auto_approve_accuracy),
                samples = stats.auto_approved_count,
                old_value = current,
                new_value,
                "auto-approve confidence bar recalibrated"
            );
        }

        Ok(report)
    }
}

/// Create a decision engine from configuration.
pub fn create_decision_engine(
    config: &DecisionConfig,
    thresholds: &RiskThresholds,
    analysis_window_days: i64,
    store: Arc<dyn OutcomeStore>,
) -> Arc<dyn DecisionEngine> {
    Arc::new(StandardDecisionEngine::new(
        config,
        thresholds,
        analysis_window_days,
        store,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lazarus_common::{
        FeedbackSource, ModuleStatistics, OutcomeType, Recommendation, ResurrectionOutcome,
        RiskWeights, Severity, ThreatIndicator,
    };
    use lazarus_risk::RiskEngine;
    use lazarus_store::MemoryOutcomeStore;
    use std::collections::{BTreeSet, HashMap};

    fn event(reason: KillReason, severity: Severity, confidence: f64) -> KillEvent {
        KillEvent {
            kill_id: "kill-1".into(),
            timestamp: Utc::now(),
            target_module: "cache-service".into(),
            target_instance_id: "cache-service-0".into(),
            kill_reason: reason,
            severity,
            confidence_score: confidence,
            evidence: vec![],
            dependencies: BTreeSet::new(),
            source_agent: "smith".into(),
            metadata: HashMap::new(),
        }
    }

    fn assessment(risk_score: f64, confidence: f64) -> RiskAssessment {
        RiskAssessment {
            assessment_id: "a-1".into(),
            kill_id: "kill-1".into(),
            timestamp: Utc::now(),
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            confidence,
            factors: vec![],
            recommendations: vec![],
            auto_approve_eligible: false,
            requires_escalation: false,
        }
    }

    fn engine(config: DecisionConfig) -> StandardDecisionEngine {
        StandardDecisionEngine::new(
            &config,
            &RiskThresholds::default(),
            30,
            Arc::new(MemoryOutcomeStore::new()),
        )
    }

    fn enabled_engine() -> StandardDecisionEngine {
        engine(DecisionConfig {
            auto_approve_enabled: true,
            ..Default::default()
        })
    }

    #[test]
    fn confirmed_threat_is_denied_outright() {
        let engine = enabled_engine();
        let decision = engine.decide(
            &event(KillReason::ThreatDetected, Severity::Critical, 0.99),
            &EnrichmentResult::default(),
            &assessment(0.1, 0.99),
        );
        assert_eq!(decision.outcome, DecisionOutcome::Deny);
        assert!(decision.assessment.risk_score >= 0.9);
        assert_eq!(decision.assessment.confidence, 0.95);
        assert!(decision.reasoning[0].contains("Immediate denial"));
        assert!(decision
            .reasoning
            .iter()
            .any(|r| r.contains("confirmed threat")));
    }

    #[test]
    fn deny_list_wins_regardless_of_assessment() {
        let engine = engine(DecisionConfig {
            auto_approve_enabled: true,
            always_deny_modules: vec!["cache-service".into()],
            ..Default::default()
        });
        let decision = engine.decide(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.1),
            &EnrichmentResult::default(),
            &assessment(0.05, 0.99),
        );
        assert_eq!(decision.outcome, DecisionOutcome::Deny);
        assert!(decision.reasoning.iter().any(|r| r.contains("deny list")));
    }

    #[test]
    fn hot_threat_indicator_is_denied_outright() {
        let engine = enabled_engine();
        let mut enrichment = EnrichmentResult::new(0.1, 0, Recommendation::SafeToResurrect);
        enrichment
            .threat_indicators
            .push(ThreatIndicator::new("active_alert", 0.95));

        let decision = engine.decide(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.1),
            &enrichment,
            &assessment(0.05, 0.99),
        );
        assert_eq!(decision.outcome, DecisionOutcome::Deny);
        assert!(decision
            .reasoning
            .iter()
            .any(|r| r.contains("threat indicator")));
    }

    #[test]
    fn immediate_deny_holds_under_any_weights() {
        // run the real risk engine with weights skewed to report near-zero
        // risk; the deny rule must still fire
        let risk_engine = RiskEngine::new(vec![]);
        let weights = RiskWeights {
            smith_confidence: 0.0,
            siem_risk_score: 0.0,
            false_positive_history: 1.0,
            kill_reason: 0.0,
            severity: 0.0,
            module_criticality: 0.0,
        };
        let kill = event(KillReason::ThreatDetected, Severity::Critical, 0.99);
        let enrichment = EnrichmentResult::new(0.0, 9, Recommendation::SafeToResurrect);
        let assessment = risk_engine.assess(
            &kill,
            &enrichment,
            &ModuleStatistics::empty("cache-service"),
            &weights,
            &RiskThresholds::default(),
        );
        assert!(assessment.risk_score < 0.2);

        let decision = enabled_engine().decide(&kill, &enrichment, &assessment);
        assert_eq!(decision.outcome, DecisionOutcome::Deny);
    }

    #[test]
    fn low_risk_high_confidence_auto_approves() {
        let engine = enabled_engine();
        let decision = engine.decide(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.2),
            &EnrichmentResult::new(0.1, 3, Recommendation::SafeToResurrect),
            &assessment(0.21, 0.9),
        );
        assert_eq!(decision.outcome, DecisionOutcome::ApproveAuto);
        assert!(decision.recommended_action.contains("Auto-resurrect"));
    }

    #[test]
    fn auto_approve_disabled_falls_back_to_review() {
        let engine = engine(DecisionConfig::default());
        let decision = engine.decide(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.2),
            &EnrichmentResult::default(),
            &assessment(0.1, 0.95),
        );
        assert_eq!(decision.outcome, DecisionOutcome::PendingReview);
    }

    #[test]
    fn low_confidence_falls_back_to_review() {
        let engine = enabled_engine();
        let decision = engine.decide(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.2),
            &EnrichmentResult::default(),
            &assessment(0.1, 0.6),
        );
        assert_eq!(decision.outcome, DecisionOutcome::PendingReview);
    }

    #[test]
    fn high_risk_is_denied_medium_is_reviewed() {
        let engine = enabled_engine();
        let denied = engine.decide(
            &event(KillReason::AnomalyBehavior, Severity::High, 0.7),
            &EnrichmentResult::default(),
            &assessment(0.7, 0.9),
        );
        assert_eq!(denied.outcome, DecisionOutcome::Deny);

        let reviewed = engine.decide(
            &event(KillReason::AnomalyBehavior, Severity::Medium, 0.5),
            &EnrichmentResult::default(),
            &assessment(0.5, 0.9),
        );
        assert_eq!(reviewed.outcome, DecisionOutcome::PendingReview);
    }

    #[test]
    fn approval_list_caps_auto_approve_at_review() {
        let engine = engine(DecisionConfig {
            auto_approve_enabled: true,
            always_require_approval: vec!["cache-service".into()],
            ..Default::default()
        });
        let decision = engine.decide(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.2),
            &EnrichmentResult::default(),
            &assessment(0.1, 0.95),
        );
        assert_eq!(decision.outcome, DecisionOutcome::PendingReview);
        assert!(!decision.constraints.is_empty());

        // the cap does not soften a deny
        let denied = engine.decide(
            &event(KillReason::AnomalyBehavior, Severity::High, 0.7),
            &EnrichmentResult::default(),
            &assessment(0.8, 0.95),
        );
        assert_eq!(denied.outcome, DecisionOutcome::Deny);
    }

    #[test]
    fn reasoning_reads_as_a_narrative() {
        let engine = enabled_engine();
        let decision = engine.decide(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.2),
            &EnrichmentResult::new(0.1, 3, Recommendation::SafeToResurrect),
            &assessment(0.21, 0.9),
        );
        assert!(decision.reasoning[0].contains("cache-service"));
        assert!(decision.reasoning[1].contains("safe_to_resurrect"));
        assert!(decision
            .reasoning
            .iter()
            .any(|r| r.contains("3 prior false positives")));
        assert!(decision
            .reasoning
            .iter()
            .any(|r| r.contains("No active threat indicators")));
        assert!(decision.reasoning.last().unwrap().contains("LOW"));

        let explained = engine.explain(&decision);
        assert!(explained.contains("Decision: APPROVE_AUTO"));
        assert!(explained.contains("Reasoning:"));
    }

    #[test]
    fn statistics_count_outcomes() {
        let engine = enabled_engine();
        engine.decide(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.2),
            &EnrichmentResult::default(),
            &assessment(0.1, 0.95),
        );
        engine.decide(
            &event(KillReason::ThreatDetected, Severity::Critical, 0.99),
            &EnrichmentResult::default(),
            &assessment(0.9, 0.95),
        );
        let stats = engine.statistics();
        assert_eq!(stats.total_decisions, 2);
        assert_eq!(stats.approve_auto, 1);
        assert_eq!(stats.deny, 1);
    }

    async fn seeded_engine(success: usize, failure: usize) -> StandardDecisionEngine {
        let store = Arc::new(MemoryOutcomeStore::new());
        for i in 0..(success + failure) {
            let outcome = ResurrectionOutcome {
                outcome_id: format!("o-{}", i),
                decision_id: format!("d-{}", i),
                kill_id: format!("k-{}", i),
                target_module: "cache-service".into(),
                timestamp: Utc::now(),
                outcome_type: if i < success {
                    OutcomeType::Success
                } else {
                    OutcomeType::Failure
                },
                original_risk_score: 0.2,
                original_confidence: 0.9,
                original_decision: "APPROVE_AUTO".into(),
                was_auto_approved: true,
                health_score_after: None,
                time_to_healthy: None,
                anomalies_detected: 0,
                required_rollback: false,
                feedback_source: FeedbackSource::Automated,
                human_feedback: None,
                corrected_decision: None,
                metadata: HashMap::new(),
            };
            store.store(&outcome).await.unwrap();
        }
        StandardDecisionEngine::new(
            &DecisionConfig::default(),
            &RiskThresholds::default(),
            30,
            store,
        )
    }

    #[tokio::test]
    async fn calibrate_leaves_bar_alone_at_target_accuracy() {
        // 54/60 = 90%: neither above 95% nor below 80%
        let engine = seeded_engine(54, 6).await;
        let report = engine.calibrate().await.unwrap();
        assert_eq!(report.samples, 60);
        assert!(!report.changed);
        assert_eq!(engine.auto_approve_min_confidence(), 0.85);
    }

    #[tokio::test]
    async fn calibrate_loosens_on_high_accuracy() {
        let engine = seeded_engine(59, 1).await; // ~98%
        let report = engine.calibrate().await.unwrap();
        assert!(report.changed);
        assert!((engine.auto_approve_min_confidence() - 0.83).abs() < 1e-9);
    }

    #[tokio::test]
    async fn calibrate_tightens_on_low_accuracy() {
        let engine = seeded_engine(12, 8).await; // 60%
        let report = engine.calibrate().await.unwrap();
        assert!(report.changed);
        assert!((engine.auto_approve_min_confidence() - 0.87).abs() < 1e-9);
    }

    #[tokio::test]
    async fn calibrate_ignores_thin_samples() {
        let engine = seeded_engine(2, 3).await; // terrible accuracy, 5 samples
        let report = engine.calibrate().await.unwrap();
        assert!(!report.changed);
        assert_eq!(engine.auto_approve_min_confidence(), 0.85);
    }

    #[tokio::test]
    async fn calibrate_respects_ceiling() {
        let engine = seeded_engine(0, 20).await; // 0% accuracy
        for _ in 0..10 {
            engine.calibrate().await.unwrap();
        }
        assert!((engine.auto_approve_min_confidence() - 0.98).abs() < 1e-9);
    }
}
