//! Pattern analysis over the outcome history
//!
//! Read-only: the analyzer never mutates policy, it reports. Every
//! detector works over the same window snapshot fetched once per run.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use lazarus_common::config::AnalysisConfig;
use lazarus_common::{OutcomeType, Result, ResurrectionOutcome};
use lazarus_store::OutcomeStore;

use crate::patterns::{DetectedPattern, ModuleProfile, PatternSeverity, PatternType, RiskTrend};

const ANALYSIS_FETCH_LIMIT: usize = 1000;

fn is_failure_like(outcome_type: OutcomeType) -> bool {
    matches!(outcome_type, OutcomeType::Failure | OutcomeType::Rollback)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0u64;
    for v in values {
        sum += v;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}

/// Aggregated analysis output for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub patterns_detected: usize,
    pub critical: Vec<DetectedPattern>,
    pub warnings: Vec<DetectedPattern>,
    pub info: Vec<DetectedPattern>,
    pub suggested_actions: Vec<String>,
}

/// Detects systemic patterns in the outcome history
pub struct PatternAnalyzer {
    store: Arc<dyn OutcomeStore>,
    config: AnalysisConfig,
}

impl PatternAnalyzer {
    pub fn new(store: Arc<dyn OutcomeStore>, config: AnalysisConfig) -> Self {
        PatternAnalyzer { store, config }
    }

    /// Run the full analysis over the window starting at `since`
    /// (default: the configured window before now). Returns an empty list
    /// below the sample floor.
    pub async fn analyze(&self, since: Option<DateTime<Utc>>) -> Result<Vec<DetectedPattern>> {
        let since =
            since.unwrap_or_else(|| Utc::now() - Duration::days(self.config.time_window_days));
        let outcomes = self
            .store
            .list_recent(ANALYSIS_FETCH_LIMIT, Some(since))
            .await?;

        if outcomes.len() < self.config.min_samples_for_analysis {
            info!(
                samples = outcomes.len(),
                required = self.config.min_samples_for_analysis,
                "insufficient samples for pattern analysis"
            );
            return Ok(Vec::new());
        }

        let mut patterns = Vec::new();
        patterns.extend(self.detect_false_positive_spike(&outcomes));
        patterns.extend(self.detect_module_instability(&outcomes));
        patterns.extend(self.detect_time_correlation(&outcomes));
        patterns.extend(self.detect_risk_score_drift(&outcomes));
        patterns.extend(self.detect_auto_approve_degradation(&outcomes));
        patterns.extend(self.detect_recovery_time_increase(&outcomes));

        info!(patterns = patterns.len(), "pattern analysis complete");
        Ok(patterns)
    }

    /// Analysis grouped by severity with deduplicated actions.
    pub async fn summary(&self, since: Option<DateTime<Utc>>) -> Result<AnalysisSummary> {
        let patterns = self.analyze(since).await?;
        let actions: BTreeSet<String> = patterns
            .iter()
            .flat_map(|p| p.recommended_actions.iter().cloned())
            .collect();
        let of = |severity: PatternSeverity| -> Vec<DetectedPattern> {
            patterns
                .iter()
                .filter(|p| p.severity == severity)
                .cloned()
                .collect()
        };
        Ok(AnalysisSummary {
            patterns_detected: patterns.len(),
            critical: of(PatternSeverity::Critical),
            warnings: of(PatternSeverity::Warning),
            info: of(PatternSeverity::Info),
            suggested_actions: actions.into_iter().collect(),
        })
    }

    fn pattern(
        &self,
        pattern_type: PatternType,
        severity: PatternSeverity,
        description: String,
        confidence: f64,
        affected_modules: Vec<String>,
        evidence: HashMap<String, serde_json::Value>,
        recommended_actions: &[&str],
    ) -> DetectedPattern {
        DetectedPattern {
            pattern_id: Uuid::new_v4().to_string(),
            pattern_type,
            severity,
            detected_at: Utc::now(),
            description,
            confidence,
            affected_modules,
            evidence,
            recommended_actions: recommended_actions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn detect_false_positive_spike(
        &self,
        outcomes: &[ResurrectionOutcome],
    ) -> Option<DetectedPattern> {
        let fp: Vec<_> = outcomes
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::FalsePositive)
            .collect();
        let fp_rate = fp.len() as f64 / outcomes.len() as f64;
        if fp_rate <= self.config.false_positive_threshold {
            return None;
        }

        let mut module_counts: BTreeMap<&str, u64> = BTreeMap::new();
        for o in &fp {
            *module_counts.entry(o.target_module.as_str()).or_default() += 1;
        }
        let mut top: Vec<_> = module_counts.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        top.truncate(5);

        Some(self.pattern(
            PatternType::FalsePositiveSpike,
            if fp_rate < 0.5 {
                PatternSeverity::Warning
            } else {
                PatternSeverity::Critical
            },
            format!("High false positive rate detected: {:.1}%", fp_rate * 100.0),
            (0.5 + fp.len() as f64 / 100.0).min(0.95),
            top.iter().map(|(m, _)| m.to_string()).collect(),
            HashMap::from([
                ("false_positive_rate".into(), serde_json::json!(fp_rate)),
                ("fp_count".into(), serde_json::json!(fp.len())),
                ("total_outcomes".into(), serde_json::json!(outcomes.len())),
                (
                    "top_modules".into(),
                    serde_json::json!(top
                        .iter()
                        .map(|(m, c)| (m.to_string(), *c))
                        .collect::<BTreeMap<_, _>>()),
                ),
            ]),
            &[
                "Review killer detection thresholds",
                "Analyze common characteristics of false positives",
                "Consider adjusting risk scoring weights",
            ],
        ))
    }

    fn detect_module_instability(
        &self,
        outcomes: &[ResurrectionOutcome],
    ) -> Option<DetectedPattern> {
        let mut by_module: BTreeMap<&str, Vec<&ResurrectionOutcome>> = BTreeMap::new();
        for o in outcomes {
            by_module.entry(o.target_module.as_str()).or_default().push(o);
        }

        let mut unstable = Vec::new();
        for (module, module_outcomes) in by_module {
            if module_outcomes.len() < 3 {
                continue;
            }
            let failures = module_outcomes
                .iter()
                .filter(|o| is_failure_like(o.outcome_type))
                .count();
            let failure_rate = failures as f64 / module_outcomes.len() as f64;
            if failure_rate > 1.0 - self.config.success_rate_threshold {
                unstable.push(serde_json::json!({
                    "module": module,
                    "failure_rate": failure_rate,
                    "total_resurrections": module_outcomes.len(),
                    "failures": failures,
                }));
            }
        }

        if unstable.is_empty() {
            return None;
        }

        let modules: Vec<String> = unstable
            .iter()
            .filter_map(|u| u["module"].as_str().map(String::from))
            .collect();
        Some(self.pattern(
            PatternType::ModuleInstability,
            PatternSeverity::Warning,
            format!("{} modules showing instability", unstable.len()),
            0.8,
            modules,
            HashMap::from([("unstable_modules".into(), serde_json::json!(unstable))]),
            &[
                "Review module health checks",
                "Consider excluding from auto-resurrection",
                "Investigate root cause of repeated failures",
            ],
        ))
    }

    fn detect_time_correlation(&self, outcomes: &[ResurrectionOutcome]) -> Option<DetectedPattern> {
        use chrono::Timelike;

        let mut by_hour: BTreeMap<u32, Vec<&ResurrectionOutcome>> = BTreeMap::new();
        for o in outcomes {
            by_hour.entry(o.timestamp.hour()).or_default().push(o);
        }

        let mut hour_rates: BTreeMap<u32, f64> = BTreeMap::new();
        for (hour, hour_outcomes) in by_hour {
            if hour_outcomes.len() >= 3 {
                let failures = hour_outcomes
                    .iter()
                    .filter(|o| is_failure_like(o.outcome_type))
                    .count();
                hour_rates.insert(hour, failures as f64 / hour_outcomes.len() as f64);
            }
        }
        let avg_rate = mean(hour_rates.values().copied())?;

        let high_risk_hours: Vec<u32> = hour_rates
            .iter()
            .filter(|(_, rate)| **rate > avg_rate * 1.5 && **rate > 0.3)
            .map(|(hour, _)| *hour)
            .collect();
        if high_risk_hours.is_empty() {
            return None;
        }

        Some(self.pattern(
            PatternType::TimeCorrelation,
            PatternSeverity::Info,
            format!(
                "Higher failure rates detected during hours: {:?}",
                high_risk_hours
            ),
            0.7,
            Vec::new(),
            HashMap::from([
                ("high_risk_hours".into(), serde_json::json!(high_risk_hours)),
                ("hour_failure_rates".into(), serde_json::json!(hour_rates)),
                ("average_failure_rate".into(), serde_json::json!(avg_rate)),
            ]),
            &[
                "Consider time-based risk adjustments",
                "Review deployments during high-risk hours",
                "Investigate time-specific triggers",
            ],
        ))
    }

    fn detect_risk_score_drift(&self, outcomes: &[ResurrectionOutcome]) -> Option<DetectedPattern> {
        if outcomes.len() < 20 {
            return None;
        }

        let mut sorted: Vec<&ResurrectionOutcome> = outcomes.iter().collect();
        sorted.sort_by_key(|o| o.timestamp);
        let midpoint = sorted.len() / 2;

        // gap between mean failure risk and mean success risk; larger means
        // the scores separate outcomes better
        let calibration = |half: &[&ResurrectionOutcome]| -> f64 {
            let success = mean(
                half.iter()
                    .filter(|o| o.outcome_type == OutcomeType::Success)
                    .map(|o| o.original_risk_score),
            );
            let failure = mean(
                half.iter()
                    .filter(|o| is_failure_like(o.outcome_type))
                    .map(|o| o.original_risk_score),
            );
            match (success, failure) {
                (Some(success), Some(failure)) => failure - success,
                _ => 0.0,
            }
        };

        let first = calibration(&sorted[..midpoint]);
        let second = calibration(&sorted[midpoint..]);
        if !(first > 0.1 && second < first * 0.5) {
            return None;
        }

        Some(self.pattern(
            PatternType::RiskScoreDrift,
            PatternSeverity::Warning,
            "Risk score calibration has degraded over time".to_string(),
            0.75,
            Vec::new(),
            HashMap::from([
                ("first_period_calibration".into(), serde_json::json!(first)),
                ("second_period_calibration".into(), serde_json::json!(second)),
                ("calibration_change".into(), serde_json::json!(second - first)),
            ]),
            &[
                "Review risk scoring weights",
                "Retrain risk model with recent data",
                "Consider adaptive threshold adjustment",
            ],
        ))
    }

    fn detect_auto_approve_degradation(
        &self,
        outcomes: &[ResurrectionOutcome],
    ) -> Option<DetectedPattern> {
        let auto: Vec<_> = outcomes.iter().filter(|o| o.was_auto_approved).collect();
        if auto.len() < 10 {
            return None;
        }

        let successes = auto
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::Success)
            .count();
        let accuracy = successes as f64 / auto.len() as f64;
        if accuracy >= self.config.auto_approve_accuracy_threshold {
            return None;
        }

        let mut failing: BTreeMap<&str, u64> = BTreeMap::new();
        for o in &auto {
            if o.outcome_type != OutcomeType::Success {
                *failing.entry(o.target_module.as_str()).or_default() += 1;
            }
        }
        let mut top: Vec<_> = failing.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        top.truncate(5);

        Some(self.pattern(
            PatternType::AutoApproveDegradation,
            if accuracy < 0.7 {
                PatternSeverity::Critical
            } else {
                PatternSeverity::Warning
            },
            format!(
                "Auto-approval accuracy has dropped to {:.1}%",
                accuracy * 100.0
            ),
            0.9,
            top.iter().map(|(m, _)| m.to_string()).collect(),
            HashMap::from([
                ("auto_approve_accuracy".into(), serde_json::json!(accuracy)),
                ("auto_approved_count".into(), serde_json::json!(auto.len())),
                ("auto_success_count".into(), serde_json::json!(successes)),
                (
                    "top_failing_modules".into(),
                    serde_json::json!(top
                        .iter()
                        .map(|(m, c)| (m.to_string(), *c))
                        .collect::<BTreeMap<_, _>>()),
                ),
            ]),
            &[
                "Tighten auto-approval thresholds",
                "Review modules with high auto-approve failure rates",
                "Consider moving to manual mode temporarily",
            ],
        ))
    }

    fn detect_recovery_time_increase(
        &self,
        outcomes: &[ResurrectionOutcome],
    ) -> Option<DetectedPattern> {
        let mut successful: Vec<&ResurrectionOutcome> = outcomes
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::Success && o.time_to_healthy.is_some())
            .collect();
        if successful.len() < 10 {
            return None;
        }

        successful.sort_by_key(|o| o.timestamp);
        let midpoint = successful.len() / 2;
        let avg_first = mean(
            successful[..midpoint]
                .iter()
                .filter_map(|o| o.time_to_healthy),
        )?;
        let avg_second = mean(
            successful[midpoint..]
                .iter()
                .filter_map(|o| o.time_to_healthy),
        )?;
        if !(avg_second > avg_first * 1.5 && avg_second > 60.0) {
            return None;
        }

        Some(self.pattern(
            PatternType::RecoveryTimeIncrease,
            PatternSeverity::Info,
            format!(
                "Module recovery times have increased from {:.0}s to {:.0}s",
                avg_first, avg_second
            ),
            0.7,
            Vec::new(),
            HashMap::from([
                ("first_period_avg".into(), serde_json::json!(avg_first)),
                ("second_period_avg".into(), serde_json::json!(avg_second)),
                (
                    "increase_percent".into(),
                    serde_json::json!((avg_second - avg_first) / avg_first * 100.0),
                ),
            ]),
            &[
                "Review module startup procedures",
                "Check for resource constraints",
                "Investigate dependency loading times",
            ],
        ))
    }

    /// Build a behavioral profile for one module from its last 100 rows.
    pub async fn module_profile(&self, module: &str) -> Result<ModuleProfile> {
        let outcomes = self.store.list_by_module(module, 100, None).await?;
        Ok(self.build_profile(module, &outcomes))
    }

    /// Profiles for every module seen in the recent window, busiest first.
    pub async fn all_module_profiles(&self) -> Result<Vec<ModuleProfile>> {
        let recent = self.store.list_recent(ANALYSIS_FETCH_LIMIT, None).await?;
        let modules: BTreeSet<&str> = recent.iter().map(|o| o.target_module.as_str()).collect();

        let mut profiles = Vec::with_capacity(modules.len());
        for module in modules {
            profiles.push(self.module_profile(module).await?);
        }
        profiles.sort_by(|a, b| b.total_resurrections.cmp(&a.total_resurrections));
        Ok(profiles)
    }

    fn build_profile(&self, module: &str, outcomes: &[ResurrectionOutcome]) -> ModuleProfile {
        if outcomes.is_empty() {
            return ModuleProfile {
                module: module.to_string(),
                total_resurrections: 0,
                success_rate: 0.0,
                avg_risk_score: 0.0,
                avg_recovery_time: 0.0,
                false_positive_rate: 0.0,
                auto_approve_eligible: false,
                risk_trend: RiskTrend::InsufficientData,
                last_failure: None,
                last_updated: Utc::now(),
            };
        }

        let successes: Vec<_> = outcomes
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::Success)
            .collect();
        let false_positives = outcomes
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::FalsePositive)
            .count();

        let success_rate = successes.len() as f64 / outcomes.len() as f64;
        let fp_rate = false_positives as f64 / outcomes.len() as f64;

        // outcomes arrive newest first; compare the recent half with the
        // older half, with 20% bands around "stable"
        let risk_trend = if outcomes.len() >= 10 {
            let midpoint = outcomes.len() / 2;
            let recent = mean(outcomes[..midpoint].iter().map(|o| o.original_risk_score));
            let older = mean(outcomes[midpoint..].iter().map(|o| o.original_risk_score));
            match (recent, older) {
                (Some(recent), Some(older)) if recent > older * 1.2 => RiskTrend::Increasing,
                (Some(recent), Some(older)) if recent < older * 0.8 => RiskTrend::Decreasing,
                _ => RiskTrend::Stable,
            }
        } else {
            RiskTrend::InsufficientData
        };

        ModuleProfile {
            module: module.to_string(),
            total_resurrections: outcomes.len() as u64,
            success_rate,
            avg_risk_score: mean(outcomes.iter().map(|o| o.original_risk_score)).unwrap_or(0.0),
            avg_recovery_time: mean(
                successes.iter().map(|o| o.time_to_healthy.unwrap_or(0.0)),
            )
            .unwrap_or(0.0),
            false_positive_rate: fp_rate,
            auto_approve_eligible: outcomes.len() >= 5
                && success_rate >= 0.9
                && fp_rate >= 0.2,
            risk_trend,
            last_failure: outcomes
                .iter()
                .find(|o| is_failure_like(o.outcome_type))
                .map(|o| o.timestamp),
            last_updated: Utc::now(),
        }
    }
}
