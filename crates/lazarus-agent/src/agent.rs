//! Agent wiring and run loop
//!
//! Builds every collaborator from configuration via the crate factories,
//! runs kill events through the dispatcher on a bounded worker pool, and
//! hosts the periodic learning loop.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use lazarus_common::{Config, Error, Result};
use lazarus_decision::{create_decision_engine, DecisionEngine};
use lazarus_enrich::create_enricher;
use lazarus_executor::create_executor;
use lazarus_learning::{PatternAnalyzer, PatternSeverity, SharedThresholds, ThresholdAdapter};
use lazarus_risk::RiskEngine;
use lazarus_store::{create_outcome_store, OutcomeStore};

use crate::admin::AdminOps;
use crate::dispatcher::Dispatcher;
use crate::kill_source::KillSource;

/// The assembled resurrection-decision agent
pub struct Agent {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn OutcomeStore>,
    decision_engine: Arc<dyn DecisionEngine>,
    analyzer: Arc<PatternAnalyzer>,
    adapter: Arc<ThresholdAdapter>,
    worker_slots: Arc<Semaphore>,
}

impl Agent {
    /// Build an agent from configuration.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store = create_outcome_store(&config.storage).await?;
        let enricher = create_enricher(&config.enricher)?;
        let executor = create_executor(&config.executor)?;

        let thresholds =
            SharedThresholds::new(config.risk.thresholds, config.risk.weights);
        let risk_engine = RiskEngine::new(config.risk.critical_modules.iter().cloned());
        let decision_engine = create_decision_engine(
            &config.decision,
            &config.risk.thresholds,
            config.learning.analysis_window_days,
            store.clone(),
        );

        let analyzer = Arc::new(PatternAnalyzer::new(
            store.clone(),
            config.learning.analysis.clone(),
        ));
        let adapter = Arc::new(ThresholdAdapter::new(
            store.clone(),
            config.learning.clone(),
            thresholds.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            config.mode,
            enricher,
            executor,
            store.clone(),
            risk_engine,
            decision_engine.clone(),
            thresholds,
        ));

        let worker_slots = Arc::new(Semaphore::new(config.dispatcher.max_in_flight));

        info!(mode = ?config.mode, "agent assembled");

        Ok(Agent {
            config,
            dispatcher,
            store,
            decision_engine,
            analyzer,
            adapter,
            worker_slots,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn OutcomeStore> {
        self.store.clone()
    }

    /// Admin surface over this agent's components.
    pub fn admin(&self) -> AdminOps {
        AdminOps::new(
            self.store.clone(),
            self.decision_engine.clone(),
            self.adapter.clone(),
        )
    }

    /// Consume the source until it is exhausted. Events run concurrently
    /// up to the configured worker pool size; the learning loop ticks in
    /// the background while the agent runs.
    pub async fn run(&self, source: Arc<dyn KillSource>) -> Result<()> {
        let _learning = LearningLoop::spawn(
            self.analyzer.clone(),
            self.adapter.clone(),
            self.decision_engine.clone(),
            self.config.learning.enabled,
            self.config.learning.interval_seconds,
        );

        let max_in_flight = self.config.dispatcher.max_in_flight as u32;

        while let Some(event) = source.next_event().await {
            if let Err(e) = event.validate() {
                warn!(error = %e, "rejecting malformed kill event");
                continue;
            }

            let permit = self
                .worker_slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Generic(anyhow::anyhow!("worker pool closed: {}", e)))?;

            let dispatcher = self.dispatcher.clone();
            let source = source.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match dispatcher.handle_event(&event, source.as_ref()).await {
                    Ok(report) => {
                        if report.error.is_some() {
                            warn!(
                                kill_id = %report.kill_id,
                                state = ?report.state,
                                error = report.error.as_deref().unwrap_or(""),
                                "event finished degraded"
                            );
                        }
                    }
                    Err(e) => error!(kill_id = %event.kill_id, error = %e, "event rejected"),
                }
            });
        }

        // wait for in-flight events to drain
        let _drain = self
            .worker_slots
            .acquire_many(max_in_flight)
            .await
            .map_err(|e| Error::Generic(anyhow::anyhow!("worker pool closed: {}", e)))?;

        info!("kill source exhausted, agent run complete");
        Ok(())
    }
}

/// Periodic learning pass. The task stops when the guard drops.
pub struct LearningLoop {
    handle: tokio::task::JoinHandle<()>,
}

impl LearningLoop {
    pub fn spawn(
        analyzer: Arc<PatternAnalyzer>,
        adapter: Arc<ThresholdAdapter>,
        decision_engine: Arc<dyn DecisionEngine>,
        enabled: bool,
        interval_seconds: u64,
    ) -> Self {
        let handle = tokio::spawn(async move {
            if !enabled {
                return;
            }
            let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                Self::cycle(&analyzer, &adapter, &decision_engine).await;
            }
        });
        LearningLoop { handle }
    }

    async fn cycle(
        analyzer: &PatternAnalyzer,
        adapter: &ThresholdAdapter,
        decision_engine: &Arc<dyn DecisionEngine>,
    ) {
        match analyzer.analyze(None).await {
            Ok(patterns) => {
                for pattern in &patterns {
                    match pattern.severity {
                        PatternSeverity::Critical => error!(
                            pattern = ?pattern.pattern_type,
                            description = %pattern.description,
                            "critical pattern detected"
                        ),
                        PatternSeverity::Warning => warn!(
                            pattern = ?pattern.pattern_type,
                            description = %pattern.description,
                            "pattern detected"
                        ),
                        PatternSeverity::Info => info!(
                            pattern = ?pattern.pattern_type,
                            description = %pattern.description,
                            "pattern detected"
                        ),
                    }
                }
            }
            Err(e) => warn!(error = %e, "pattern analysis failed"),
        }

        match adapter.analyze_and_propose().await {
            Ok(Some(proposal)) => info!(
                proposal_id = %proposal.proposal_id,
                adjustments = proposal.adjustments.len(),
                status = ?proposal.status,
                "threshold proposal awaiting review"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "threshold analysis failed"),
        }

        match decision_engine.calibrate().await {
            Ok(report) if report.changed => info!(
                accuracy = format!("{:.3}", report.accuracy),
                min_confidence = report.min_confidence,
                "decision engine recalibrated"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "calibration failed"),
        }
    }
}

impl Drop for LearningLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
