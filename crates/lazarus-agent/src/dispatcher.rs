//! Per-event state machine
//!
//! Each accepted kill event moves through
//! `RECEIVED → ENRICHING → ASSESSING → DECIDING → (EXECUTING | SKIPPED) →
//! RECORDING → ACKED`. The outcome record is durable before the event is
//! acknowledged upstream; a store failure leaves the event unacknowledged
//! for redelivery. No other stage failure aborts the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lazarus_common::config::Mode;
use lazarus_common::{
    Decision, DecisionOutcome, EnrichmentResult, ExecutionResult, FeedbackSource, KillEvent,
    ModuleStatistics, OutcomeType, Result, ResurrectionOutcome,
};
use lazarus_decision::DecisionEngine;
use lazarus_enrich::Enricher;
use lazarus_executor::Executor;
use lazarus_learning::SharedThresholds;
use lazarus_risk::RiskEngine;
use lazarus_store::OutcomeStore;

use crate::kill_source::KillSource;

/// Where an event's state machine ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Received,
    Enriching,
    Assessing,
    Deciding,
    Executing,
    Skipped,
    Recording,
    Acked,
    FailedUnacked,
}

/// Result of dispatching one kill event
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub kill_id: String,
    pub state: DispatchState,
    pub decision: Option<Decision>,
    pub outcome_id: Option<String>,
    pub error: Option<String>,
}

/// Coordinates the collaborators for each kill event
pub struct Dispatcher {
    mode: Mode,
    enricher: Arc<dyn Enricher>,
    executor: Arc<dyn Executor>,
    store: Arc<dyn OutcomeStore>,
    risk_engine: RiskEngine,
    decision_engine: Arc<dyn DecisionEngine>,
    thresholds: SharedThresholds,
}

impl Dispatcher {
    pub fn new(
        mode: Mode,
        enricher: Arc<dyn Enricher>,
        executor: Arc<dyn Executor>,
        store: Arc<dyn OutcomeStore>,
        risk_engine: RiskEngine,
        decision_engine: Arc<dyn DecisionEngine>,
        thresholds: SharedThresholds,
    ) -> Self {
        Dispatcher {
            mode,
            enricher,
            executor,
            store,
            risk_engine,
            decision_engine,
            thresholds,
        }
    }

    /// Run one kill event through the pipeline. Returns `InvalidInput` for
    /// structurally broken events; every other failure is reflected in the
    /// report state.
    pub async fn handle_event(
        &self,
        event: &KillEvent,
        source: &dyn KillSource,
    ) -> Result<DispatchReport> {
        event.validate()?;

        info!(
            kill_id = %event.kill_id,
            target_module = %event.target_module,
            kill_reason = ?event.kill_reason,
            "kill event received"
        );

        debug!(kill_id = %event.kill_id, state = ?DispatchState::Enriching, "state transition");
        let enrichment = self.enricher.enrich(event).await;

        debug!(kill_id = %event.kill_id, state = ?DispatchState::Assessing, "state transition");
        let module_history = match self.store.module_statistics(&event.target_module).await {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    kill_id = %event.kill_id,
                    error = %e,
                    "module history unavailable, assessing without it"
                );
                ModuleStatistics::empty(&event.target_module)
            }
        };
        let (thresholds, weights) = self.thresholds.current();
        let assessment =
            self.risk_engine
                .assess(event, &enrichment, &module_history, &weights, &thresholds);

        debug!(kill_id = %event.kill_id, state = ?DispatchState::Deciding, "state transition");
        let decision = self.decision_engine.decide(event, &enrichment, &assessment);

        let execute = decision.outcome == DecisionOutcome::ApproveAuto && self.mode == Mode::Live;
        let (execution, stage) = if execute {
            debug!(kill_id = %event.kill_id, state = ?DispatchState::Executing, "state transition");
            (self.executor.resurrect(event, &decision).await, DispatchState::Executing)
        } else {
            debug!(kill_id = %event.kill_id, state = ?DispatchState::Skipped, "state transition");
            (ExecutionResult::skipped(event), DispatchState::Skipped)
        };

        debug!(kill_id = %event.kill_id, state = ?DispatchState::Recording, "state transition");
        let outcome = Self::build_outcome(event, &enrichment, &decision, &execution, execute);

        if let Err(e) = self.store.store(&outcome).await {
            error!(
                kill_id = %event.kill_id,
                error = %e,
                "outcome not durable, leaving event unacknowledged"
            );
            return Ok(DispatchReport {
                kill_id: event.kill_id.clone(),
                state: DispatchState::FailedUnacked,
                decision: Some(decision),
                outcome_id: None,
                error: Some(e.to_string()),
            });
        }

        if let Err(e) = source.acknowledge(&event.kill_id).await {
            warn!(
                kill_id = %event.kill_id,
                error = %e,
                "acknowledge failed, upstream will redeliver"
            );
            return Ok(DispatchReport {
                kill_id: event.kill_id.clone(),
                state: DispatchState::FailedUnacked,
                decision: Some(decision),
                outcome_id: Some(outcome.outcome_id),
                error: Some(e.to_string()),
            });
        }

        info!(
            kill_id = %event.kill_id,
            outcome = decision.outcome.as_str(),
            outcome_type = outcome.outcome_type.as_str(),
            executed = (stage == DispatchState::Executing),
            "kill event processed"
        );

        Ok(DispatchReport {
            kill_id: event.kill_id.clone(),
            state: DispatchState::Acked,
            decision: Some(decision),
            outcome_id: Some(outcome.outcome_id),
            error: None,
        })
    }

    fn build_outcome(
        event: &KillEvent,
        enrichment: &EnrichmentResult,
        decision: &Decision,
        execution: &ExecutionResult,
        executed: bool,
    ) -> ResurrectionOutcome {
        let outcome_type = if executed {
            if execution.success {
                OutcomeType::Success
            } else {
                OutcomeType::Failure
            }
        } else {
            OutcomeType::Undetermined
        };

        let mut metadata: HashMap<String, serde_json::Value> = HashMap::from([(
            "enrichment".to_string(),
            serde_json::json!({
                "risk_score": enrichment.risk_score,
                "recommendation": enrichment.recommendation.as_str(),
                "false_positive_history": enrichment.false_positive_history,
                "threat_indicators": enrichment.threat_indicators.len(),
            }),
        )]);
        if executed {
            if let Some(container_id) = &execution.container_id {
                metadata.insert(
                    "container_id".to_string(),
                    serde_json::Value::String(container_id.clone()),
                );
            }
            metadata.insert(
                "execution".to_string(),
                serde_json::json!({
                    "duration_seconds": execution.duration_seconds,
                    "health_status": execution.health_status,
                }),
            );
            if let Some(error) = &execution.error {
                metadata.insert(
                    "error".to_string(),
                    serde_json::Value::String(error.clone()),
                );
            }
        }

        ResurrectionOutcome {
            outcome_id: Uuid::new_v4().to_string(),
            decision_id: decision.decision_id.clone(),
            kill_id: event.kill_id.clone(),
            target_module: event.target_module.clone(),
            timestamp: Utc::now(),
            outcome_type,
            original_risk_score: decision.assessment.risk_score,
            original_confidence: decision.assessment.confidence,
            original_decision: decision.outcome.as_str().to_string(),
            was_auto_approved: executed,
            health_score_after: if executed {
                match execution.health_status.as_deref() {
                    Some("healthy") | Some("dry_run") => Some(1.0),
                    Some("unhealthy") => Some(0.0),
                    _ => None,
                }
            } else {
                None
            },
            time_to_healthy: (executed && execution.success)
                .then_some(execution.duration_seconds),
            anomalies_detected: 0,
            required_rollback: false,
            feedback_source: FeedbackSource::Automated,
            human_feedback: None,
            corrected_decision: None,
            metadata,
        }
    }
}
