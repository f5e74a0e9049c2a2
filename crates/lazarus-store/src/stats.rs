//! Aggregate computations shared by both store backends
//!
//! Keeping the math in one place guarantees the in-memory and persistent
//! backends report identical numbers for identical rows.

use chrono::{DateTime, Utc};

use lazarus_common::{ModuleStatistics, OutcomeStatistics, OutcomeType, ResurrectionOutcome};

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0u64;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn is_failure_like(outcome_type: OutcomeType) -> bool {
    matches!(outcome_type, OutcomeType::Failure | OutcomeType::Rollback)
}

/// Compute aggregate statistics over a slice of outcomes already filtered
/// to the requested range.
pub(crate) fn compute_statistics(
    outcomes: &[ResurrectionOutcome],
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> OutcomeStatistics {
    if outcomes.is_empty() {
        let now = Utc::now();
        return OutcomeStatistics {
            total_outcomes: 0,
            success_count: 0,
            failure_count: 0,
            rollback_count: 0,
            false_positive_count: 0,
            true_positive_count: 0,
            avg_risk_score_success: 0.0,
            avg_risk_score_failure: 0.0,
            avg_time_to_healthy: 0.0,
            auto_approved_count: 0,
            auto_approve_accuracy: 0.0,
            human_override_rate: 0.0,
            period_start: since.unwrap_or(now),
            period_end: until.unwrap_or(now),
        };
    }

    let count_of = |t: OutcomeType| outcomes.iter().filter(|o| o.outcome_type == t).count() as u64;

    let auto_approved: Vec<_> = outcomes.iter().filter(|o| o.was_auto_approved).collect();
    let auto_success = auto_approved
        .iter()
        .filter(|o| o.outcome_type == OutcomeType::Success)
        .count() as u64;
    let overrides = outcomes
        .iter()
        .filter(|o| o.corrected_decision.is_some())
        .count() as u64;

    OutcomeStatistics {
        total_outcomes: outcomes.len() as u64,
        success_count: count_of(OutcomeType::Success),
        failure_count: count_of(OutcomeType::Failure),
        rollback_count: count_of(OutcomeType::Rollback),
        false_positive_count: count_of(OutcomeType::FalsePositive),
        true_positive_count: count_of(OutcomeType::TruePositive),
        avg_risk_score_success: mean(
            outcomes
                .iter()
                .filter(|o| o.outcome_type == OutcomeType::Success)
                .map(|o| o.original_risk_score),
        ),
        avg_risk_score_failure: mean(
            outcomes
                .iter()
                .filter(|o| is_failure_like(o.outcome_type))
                .map(|o| o.original_risk_score),
        ),
        avg_time_to_healthy: mean(
            outcomes
                .iter()
                .filter(|o| o.outcome_type == OutcomeType::Success)
                .filter_map(|o| o.time_to_healthy),
        ),
        auto_approved_count: auto_approved.len() as u64,
        auto_approve_accuracy: if auto_approved.is_empty() {
            0.0
        } else {
            auto_success as f64 / auto_approved.len() as f64
        },
        human_override_rate: overrides as f64 / outcomes.len() as f64,
        period_start: outcomes
            .iter()
            .map(|o| o.timestamp)
            .min()
            .unwrap_or_else(Utc::now),
        period_end: outcomes
            .iter()
            .map(|o| o.timestamp)
            .max()
            .unwrap_or_else(Utc::now),
    }
}

/// Compute per-module aggregates over the module's rows.
pub(crate) fn compute_module_statistics(
    module: &str,
    outcomes: &[ResurrectionOutcome],
) -> ModuleStatistics {
    if outcomes.is_empty() {
        return ModuleStatistics::empty(module);
    }

    let successes: Vec<_> = outcomes
        .iter()
        .filter(|o| o.outcome_type == OutcomeType::Success)
        .collect();
    let failures = outcomes
        .iter()
        .filter(|o| is_failure_like(o.outcome_type))
        .count() as u64;

    ModuleStatistics {
        module: module.to_string(),
        total_resurrections: outcomes.len() as u64,
        success_count: successes.len() as u64,
        failure_count: failures,
        success_rate: successes.len() as f64 / outcomes.len() as f64,
        avg_risk_score: mean(outcomes.iter().map(|o| o.original_risk_score)),
        avg_recovery_time: mean(successes.iter().filter_map(|o| o.time_to_healthy)),
    }
}
