//! Resurrection execution
//!
//! The executor performs (or simulates) the restart of a killed workload
//! and reports health. Implementations attempt the restart at most once
//! per call and encode every failure in the returned [`ExecutionResult`]
//! rather than erroring: the pipeline records failures, it does not abort
//! on them.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use lazarus_common::config::ExecutorConfig;
use lazarus_common::{Decision, Error, ExecutionResult, KillEvent, Result};

mod docker;

pub use docker::DockerExecutor;

/// Execution contract
#[async_trait]
pub trait Executor: Send + Sync {
    /// Attempt to resurrect the killed workload. At most one restart
    /// attempt per call; failures are encoded in the result.
    async fn resurrect(&self, event: &KillEvent, decision: &Decision) -> ExecutionResult;

    /// Health status of a named container, if it can be determined.
    async fn health_check(&self, container_name: &str) -> Option<String>;
}

/// Observer-mode executor: logs intent, never touches the runtime, and
/// reports a synthetic success.
#[derive(Default)]
pub struct DryRunExecutor {
    history: Mutex<Vec<ExecutionResult>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        DryRunExecutor::default()
    }

    /// Results of every simulated resurrection so far.
    pub fn history(&self) -> Vec<ExecutionResult> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn resurrect(&self, event: &KillEvent, decision: &Decision) -> ExecutionResult {
        info!(
            target_module = %event.target_module,
            instance_id = %event.target_instance_id,
            decision_id = %decision.decision_id,
            risk_score = format!("{:.3}", decision.assessment.risk_score),
            "dry run: would restart container"
        );

        let result = ExecutionResult {
            success: true,
            target_module: event.target_module.clone(),
            target_instance_id: event.target_instance_id.clone(),
            container_id: Some("dry-run".to_string()),
            started_at: Some(Utc::now()),
            duration_seconds: 0.0,
            health_status: Some("dry_run".to_string()),
            error: None,
            metadata: std::collections::HashMap::from([(
                "dry_run".to_string(),
                serde_json::Value::Bool(true),
            )]),
        };
        self.history.lock().push(result.clone());
        result
    }

    async fn health_check(&self, _container_name: &str) -> Option<String> {
        Some("dry_run".to_string())
    }
}

/// Create an executor from configuration.
pub fn create_executor(config: &ExecutorConfig) -> Result<Arc<dyn Executor>> {
    match config.backend.as_str() {
        "dry-run" => Ok(Arc::new(DryRunExecutor::new())),
        "docker" => Ok(Arc::new(DockerExecutor::new(config)?)),
        other => Err(Error::Configuration(format!(
            "unknown executor backend: {}",
            other
        ))),
    }
}
