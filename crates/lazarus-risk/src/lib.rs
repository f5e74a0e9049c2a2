//! Multi-factor risk engine
//!
//! Computes a reproducible [`RiskAssessment`] from a kill event, its
//! enrichment context and the target module's outcome history. Factor
//! semantics are fixed; only the weights and the eligibility thresholds
//! are configurable.

use std::collections::HashSet;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use lazarus_common::{
    clamp_score, EnrichmentResult, KillEvent, KillReason, ModuleStatistics, Recommendation,
    RiskAssessment, RiskFactor, RiskLevel, RiskThresholds, RiskWeights, Severity,
};

/// Everything a factor function may look at.
struct FactorContext<'a> {
    event: &'a KillEvent,
    enrichment: &'a EnrichmentResult,
    effective_fp_count: u64,
    is_critical_module: bool,
}

/// One entry of the ordered factor table: a name, a weight selector and a
/// raw-value function producing the score plus its operator-facing
/// description.
struct FactorSpec {
    name: &'static str,
    weight: fn(&RiskWeights) -> f64,
    raw: fn(&FactorContext<'_>) -> (f64, String),
}

fn raw_smith_confidence(ctx: &FactorContext<'_>) -> (f64, String) {
    let value = clamp_score(ctx.event.confidence_score);
    (
        value,
        format!("Killer confidence: {:.0}%", value * 100.0),
    )
}

fn raw_siem_risk_score(ctx: &FactorContext<'_>) -> (f64, String) {
    let value = ctx.enrichment.risk_score;
    (
        value,
        format!("Threat-intel risk score: {:.0}%", value * 100.0),
    )
}

/// Inverted factor: the more often this module was killed in error, the
/// lower the risk of bringing it back.
fn raw_false_positive_history(ctx: &FactorContext<'_>) -> (f64, String) {
    let fp = ctx.effective_fp_count;
    let value = match fp {
        0 => 0.8,
        1..=2 => 0.5,
        3..=5 => 0.3,
        _ => 0.1,
    };
    (
        value,
        format!("False positive history: {} prior false positives", fp),
    )
}

fn raw_kill_reason(ctx: &FactorContext<'_>) -> (f64, String) {
    let value = match ctx.event.kill_reason {
        KillReason::ThreatDetected => 0.9,
        KillReason::AnomalyBehavior => 0.6,
        KillReason::PolicyViolation => 0.5,
        KillReason::ManualOverride => 0.4,
        KillReason::DependencyCascade => 0.3,
        KillReason::ResourceExhaustion => 0.2,
    };
    (value, format!("Kill reason: {:?}", ctx.event.kill_reason))
}

fn raw_severity(ctx: &FactorContext<'_>) -> (f64, String) {
    let value = match ctx.event.severity {
        Severity::Critical => 1.0,
        Severity::High => 0.8,
        Severity::Medium => 0.5,
        Severity::Low => 0.3,
        Severity::Info => 0.1,
    };
    (value, format!("Severity: {:?}", ctx.event.severity))
}

fn raw_module_criticality(ctx: &FactorContext<'_>) -> (f64, String) {
    let value = if ctx.is_critical_module { 0.9 } else { 0.3 };
    (
        value,
        format!(
            "Critical module: {}",
            if ctx.is_critical_module { "yes" } else { "no" }
        ),
    )
}

/// Ordered factor table. The adapter and simulator are generic over which
/// factor is being tuned, so the table is data, not code paths.
static FACTORS: &[FactorSpec] = &[
    FactorSpec {
        name: "smith_confidence",
        weight: |w| w.smith_confidence,
        raw: raw_smith_confidence,
    },
    FactorSpec {
        name: "siem_risk_score",
        weight: |w| w.siem_risk_score,
        raw: raw_siem_risk_score,
    },
    FactorSpec {
        name: "false_positive_history",
        weight: |w| w.false_positive_history,
        raw: raw_false_positive_history,
    },
    FactorSpec {
        name: "kill_reason",
        weight: |w| w.kill_reason,
        raw: raw_kill_reason,
    },
    FactorSpec {
        name: "severity",
        weight: |w| w.severity,
        raw: raw_severity,
    },
    FactorSpec {
        name: "module_criticality",
        weight: |w| w.module_criticality,
        raw: raw_module_criticality,
    },
];

/// Pure risk computation over per-event snapshots. Safe to call from any
/// worker without synchronization.
pub struct RiskEngine {
    critical_modules: HashSet<String>,
}

impl RiskEngine {
    pub fn new(critical_modules: impl IntoIterator<Item = String>) -> Self {
        RiskEngine {
            critical_modules: critical_modules.into_iter().collect(),
        }
    }

    /// Assess a kill event against its enrichment context and module
    /// history, under the given weight/threshold snapshot.
    pub fn assess(
        &self,
        event: &KillEvent,
        enrichment: &EnrichmentResult,
        module_history: &ModuleStatistics,
        weights: &RiskWeights,
        thresholds: &RiskThresholds,
    ) -> RiskAssessment {
        let ctx = FactorContext {
            event,
            enrichment,
            effective_fp_count: (enrichment.false_positive_history as u64)
                .max(module_history.failure_count),
            is_critical_module: self.critical_modules.contains(&event.target_module),
        };

        let mut factors = Vec::with_capacity(FACTORS.len());
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for spec in FACTORS {
            let weight = (spec.weight)(weights);
            let (raw_value, description) = (spec.raw)(&ctx);
            let weighted_score = raw_value * weight;
            weighted_sum += weighted_score;
            weight_sum += weight;
            factors.push(RiskFactor {
                name: spec.name.to_string(),
                raw_value,
                weight,
                weighted_score,
                description,
            });
        }

        let risk_score = if weight_sum > 0.0 {
            clamp_score(weighted_sum / weight_sum)
        } else {
            0.5
        };
        let risk_level = RiskLevel::from_score(risk_score);

        let confidence = Self::confidence(enrichment, module_history);

        let auto_approve_eligible = risk_score <= thresholds.auto_approve_max_score
            && confidence >= thresholds.auto_approve_min_confidence;
        let requires_escalation = risk_score >= thresholds.escalation_min_score;

        let assessment = RiskAssessment {
            assessment_id: Uuid::new_v4().to_string(),
            kill_id: event.kill_id.clone(),
            timestamp: Utc::now(),
            risk_score,
            risk_level,
            confidence,
            factors,
            recommendations: Self::recommendations(risk_level, event),
            auto_approve_eligible,
            requires_escalation,
        };

        info!(
            kill_id = %event.kill_id,
            risk_level = risk_level.as_str(),
            risk_score = format!("{:.3}", risk_score),
            auto_approve = auto_approve_eligible,
            "risk assessment completed"
        );

        assessment
    }

    /// Confidence in the assessment, driven by data availability.
    fn confidence(enrichment: &EnrichmentResult, module_history: &ModuleStatistics) -> f64 {
        let mut confidence = 0.5;
        if enrichment.recommendation != Recommendation::Unknown {
            confidence += 0.15;
        }
        if enrichment.false_positive_history > 0 {
            confidence += 0.10;
        }
        if module_history.total_resurrections > 0 {
            confidence += 0.15;
        }
        clamp_score(confidence)
    }

    fn recommendations(risk_level: RiskLevel, event: &KillEvent) -> Vec<String> {
        let mut recommendations = vec![match risk_level {
            RiskLevel::Minimal | RiskLevel::Low => {
                "Low risk - safe to auto-approve".to_string()
            }
            RiskLevel::Medium => "Medium risk - manual review recommended".to_string(),
            RiskLevel::High => "High risk - escalate to senior operator".to_string(),
            RiskLevel::Critical => {
                "Critical risk - do not resurrect without investigation".to_string()
            }
        }];

        if event.kill_reason == KillReason::ThreatDetected {
            recommendations.push("Verify threat has been contained".to_string());
        }

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
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

    fn assess(
        engine: &RiskEngine,
        event: &KillEvent,
        enrichment: &EnrichmentResult,
        history: &ModuleStatistics,
    ) -> RiskAssessment {
        engine.assess(
            event,
            enrichment,
            history,
            &RiskWeights::default(),
            &RiskThresholds::default(),
        )
    }

    #[test]
    fn factor_table_is_ordered_and_complete() {
        let engine = RiskEngine::new(vec![]);
        let assessment = assess(
            &engine,
            &event(KillReason::ThreatDetected, Severity::Critical, 0.9),
            &EnrichmentResult::default(),
            &ModuleStatistics::empty("cache-service"),
        );

        let names: Vec<_> = assessment.factors.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "smith_confidence",
                "siem_risk_score",
                "false_positive_history",
                "kill_reason",
                "severity",
                "module_criticality"
            ]
        );
        for factor in &assessment.factors {
            assert!((factor.weighted_score - factor.raw_value * factor.weight).abs() < 1e-12);
        }
    }

    #[test]
    fn risk_score_is_normalized_weighted_mean() {
        let engine = RiskEngine::new(vec![]);
        let assessment = assess(
            &engine,
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.2),
            &EnrichmentResult::new(0.1, 3, Recommendation::SafeToResurrect),
            &ModuleStatistics::empty("cache-service"),
        );

        // raw values: 0.2, 0.1, 0.3 (fp in 3..=5), 0.2, 0.3, 0.3
        let expected = (0.2 * 0.30 + 0.1 * 0.25 + 0.3 * 0.20 + 0.2 * 0.10 + 0.3 * 0.10 + 0.3 * 0.05)
            / (0.30 + 0.25 + 0.20 + 0.10 + 0.10 + 0.05);
        assert!((assessment.risk_score - expected).abs() < 1e-9);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[test]
    fn fp_history_takes_the_worse_of_enrichment_and_module_history() {
        let engine = RiskEngine::new(vec![]);
        let mut history = ModuleStatistics::empty("cache-service");
        history.failure_count = 7;

        let assessment = assess(
            &engine,
            &event(KillReason::AnomalyBehavior, Severity::Medium, 0.5),
            &EnrichmentResult::new(0.5, 1, Recommendation::Unknown),
            &history,
        );
        let fp = assessment
            .factors
            .iter()
            .find(|f| f.name == "false_positive_history")
            .unwrap();
        assert_eq!(fp.raw_value, 0.1); // 7 prior incidents, heavy discount
    }

    #[test]
    fn critical_module_raises_the_criticality_factor() {
        let engine = RiskEngine::new(vec!["cache-service".to_string()]);
        let assessment = assess(
            &engine,
            &event(KillReason::PolicyViolation, Severity::Medium, 0.5),
            &EnrichmentResult::default(),
            &ModuleStatistics::empty("cache-service"),
        );
        let crit = assessment
            .factors
            .iter()
            .find(|f| f.name == "module_criticality")
            .unwrap();
        assert_eq!(crit.raw_value, 0.9);
    }

    #[test]
    fn confidence_accumulates_from_data_availability() {
        // nothing known: base confidence only
        assert_eq!(
            RiskEngine::confidence(
                &EnrichmentResult::default(),
                &ModuleStatistics::empty("m")
            ),
            0.5
        );

        // recommendation present
        assert_eq!(
            RiskEngine::confidence(
                &EnrichmentResult::new(0.3, 0, Recommendation::ProceedWithCaution),
                &ModuleStatistics::empty("m")
            ),
            0.65
        );

        // recommendation + fp history + module history
        let mut history = ModuleStatistics::empty("m");
        history.total_resurrections = 4;
        let confidence = RiskEngine::confidence(
            &EnrichmentResult::new(0.3, 2, Recommendation::SafeToResurrect),
            &history,
        );
        assert!((confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn eligibility_flags_follow_thresholds() {
        let engine = RiskEngine::new(vec![]);
        let mut history = ModuleStatistics::empty("cache-service");
        history.total_resurrections = 10;

        let thresholds = RiskThresholds {
            auto_approve_max_score: 0.5,
            auto_approve_min_confidence: 0.5,
            ..Default::default()
        };
        let assessment = engine.assess(
            &event(KillReason::ResourceExhaustion, Severity::Low, 0.1),
            &EnrichmentResult::new(0.05, 4, Recommendation::SafeToResurrect),
            &history,
            &RiskWeights::default(),
            &thresholds,
        );
        assert!(assessment.auto_approve_eligible);
        assert!(!assessment.requires_escalation);

        let escalating = engine.assess(
            &event(KillReason::ThreatDetected, Severity::Critical, 0.95),
            &EnrichmentResult::new(0.95, 0, Recommendation::DenyResurrection),
            &ModuleStatistics::empty("cache-service"),
            &RiskWeights::default(),
            &RiskThresholds::default(),
        );
        assert!(escalating.requires_escalation);
        assert!(!escalating.auto_approve_eligible);
    }

    #[test]
    fn scores_stay_in_bounds_for_extreme_inputs() {
        let engine = RiskEngine::new(vec!["m".to_string()]);
        let reasons = [
            KillReason::ThreatDetected,
            KillReason::AnomalyBehavior,
            KillReason::PolicyViolation,
            KillReason::ResourceExhaustion,
            KillReason::DependencyCascade,
            KillReason::ManualOverride,
        ];
        let severities = [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Info,
        ];
        for reason in reasons {
            for severity in severities {
                for confidence in [0.0, 0.5, 1.0] {
                    for enrichment_risk in [0.0, 1.0] {
                        let assessment = assess(
                            &engine,
                            &event(reason, severity, confidence),
                            &EnrichmentResult::new(
                                enrichment_risk,
                                9,
                                Recommendation::ManualReview,
                            ),
                            &ModuleStatistics::empty("m"),
                        );
                        assert!((0.0..=1.0).contains(&assessment.risk_score));
                        assert!((0.0..=1.0).contains(&assessment.confidence));
                    }
                }
            }
        }
    }

    #[test]
    fn recommendations_track_risk_level_and_reason() {
        let engine = RiskEngine::new(vec![]);
        let assessment = assess(
            &engine,
            &event(KillReason::ThreatDetected, Severity::Critical, 1.0),
            &EnrichmentResult::new(1.0, 0, Recommendation::DenyResurrection),
            &ModuleStatistics::empty("cache-service"),
        );
        assert!(assessment.recommendations[0].contains("do not resurrect"));
        assert!(assessment
            .recommendations
            .iter()
            .any(|r| r.contains("threat has been contained")));
    }
}
