//! Docker Engine API executor
//!
//! Restarts the killed container over the Engine REST API. Lookup order:
//! exact container name matching the instance id, then the module label,
//! then a name-substring fallback. After the restart the container must
//! reach a running state; if it defines a healthcheck, the executor polls
//! until the check resolves or times out. A running container without a
//! healthcheck counts as success.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{error, info, warn};

use lazarus_common::config::ExecutorConfig;
use lazarus_common::{Decision, Error, ExecutionResult, KillEvent, Result};

use crate::Executor;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "State")]
    state: ContainerState,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ContainerState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "Health")]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContainerHealth {
    #[serde(rename = "Status")]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
}

impl ContainerInspect {
    fn health_status(&self) -> Option<String> {
        self.state.health.as_ref().map(|h| h.status.clone())
    }
}

/// Live-mode executor speaking the Docker Engine REST API.
pub struct DockerExecutor {
    client: reqwest::Client,
    host: String,
    label_prefix: String,
    restart_timeout: Duration,
    health_check_timeout: Duration,
}

impl DockerExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.restart_timeout_seconds + 5))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build http client: {}", e)))?;

        Ok(DockerExecutor {
            client,
            host: config.docker_host.trim_end_matches('/').to_string(),
            label_prefix: config.label_prefix.clone(),
            restart_timeout: Duration::from_secs(config.restart_timeout_seconds),
            health_check_timeout: Duration::from_secs(config.health_check_timeout_seconds),
        })
    }

    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInspect>> {
        let response = self
            .client
            .get(format!("{}/containers/{}/json", self.host, name_or_id))
            .send()
            .await
            .map_err(|e| Error::ExecutorUnavailable(format!("docker_unavailable: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let inspect = response.json().await.map_err(|e| {
                    Error::ExecutorUnavailable(format!("bad inspect response: {}", e))
                })?;
                Ok(Some(inspect))
            }
            status => Err(Error::ExecutorUnavailable(format!(
                "docker inspect returned {}",
                status
            ))),
        }
    }

    async fn list(&self, filters: Option<String>) -> Result<Vec<ContainerSummary>> {
        let mut request = self
            .client
            .get(format!("{}/containers/json", self.host))
            .query(&[("all", "true")]);
        if let Some(filters) = filters {
            request = request.query(&[("filters", filters)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ExecutorUnavailable(format!("docker_unavailable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ExecutorUnavailable(format!(
                "docker list returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::ExecutorUnavailable(format!("bad list response: {}", e)))
    }

    /// Locate the target container: exact instance id, then label match,
    /// then name-substring fallback.
    async fn find_container(&self, event: &KillEvent) -> Result<Option<ContainerInspect>> {
        if let Some(container) = self.inspect(&event.target_instance_id).await? {
            return Ok(Some(container));
        }

        let label_filter = serde_json::json!({
            "label": [format!("{}={}", self.label_prefix, event.target_module)],
        })
        .to_string();
        if let Some(summary) = self.list(Some(label_filter)).await?.into_iter().next() {
            return self.inspect(&summary.id).await;
        }

        for summary in self.list(None).await? {
            let matches = summary
                .names
                .iter()
                .any(|n| n.contains(event.target_module.as_str()));
            if matches {
                return self.inspect(&summary.id).await;
            }
        }

        Ok(None)
    }

    async fn restart(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/containers/{}/restart", self.host, id))
            .query(&[("t", self.restart_timeout.as_secs().to_string())])
            .send()
            .await
            .map_err(|e| Error::ExecutorUnavailable(format!("docker_unavailable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ExecutorFailed(format!(
                "restart_failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Poll the container health check until it resolves or the timeout
    /// elapses. `None` means the container defines no healthcheck.
    async fn wait_for_health(&self, id: &str) -> Result<Option<String>> {
        let Some(container) = self.inspect(id).await? else {
            return Ok(None);
        };
        let Some(mut status) = container.health_status() else {
            return Ok(None);
        };

        let deadline = Instant::now() + self.health_check_timeout;
        while Instant::now() < deadline {
            if status == "healthy" || status == "unhealthy" {
                return Ok(Some(status));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
            status = match self.inspect(id).await? {
                Some(container) => container.health_status().unwrap_or(status),
                None => return Ok(Some(status)),
            };
        }
        Ok(Some(status))
    }

    async fn try_resurrect(&self, event: &KillEvent) -> Result<ExecutionResult> {
        let started = Instant::now();

        let Some(container) = self.find_container(event).await? else {
            error!(
                target_module = %event.target_module,
                instance_id = %event.target_instance_id,
                "container not found for resurrection"
            );
            return Ok(ExecutionResult::failure(
                event,
                "container_not_found",
                started.elapsed().as_secs_f64(),
            ));
        };

        let container_id: String = container.id.chars().take(12).collect();
        let status_before = container.state.status.clone();

        info!(
            container_id = %container_id,
            container_name = %container.name,
            status_before = %status_before,
            target_module = %event.target_module,
            "restarting container"
        );

        if let Err(e) = self.restart(&container.id).await {
            error!(container_id = %container_id, error = %e, "docker restart failed");
            let mut result = ExecutionResult::failure(
                event,
                e.to_string(),
                started.elapsed().as_secs_f64(),
            );
            result.container_id = Some(container_id);
            return Ok(result);
        }

        let Some(reloaded) = self.inspect(&container.id).await? else {
            let mut result = ExecutionResult::failure(
                event,
                "container_not_found",
                started.elapsed().as_secs_f64(),
            );
            result.container_id = Some(container_id);
            return Ok(result);
        };
        if !reloaded.state.running {
            error!(
                container_id = %container_id,
                status = %reloaded.state.status,
                "container not running after restart"
            );
            let mut result = ExecutionResult::failure(
                event,
                format!("not_running: status={}", reloaded.state.status),
                started.elapsed().as_secs_f64(),
            );
            result.container_id = Some(container_id);
            return Ok(result);
        }

        let health_status = self.wait_for_health(&container.id).await?;
        let duration = started.elapsed().as_secs_f64();
        let success = matches!(health_status.as_deref(), Some("healthy") | None);

        if success {
            info!(
                container_id = %container_id,
                container_name = %container.name,
                duration_seconds = format!("{:.2}", duration),
                health_status = health_status.as_deref().unwrap_or("no_healthcheck"),
                "container resurrected"
            );
        } else {
            warn!(
                container_id = %container_id,
                health_status = health_status.as_deref().unwrap_or("unknown"),
                duration_seconds = format!("{:.2}", duration),
                "container restarted but unhealthy"
            );
        }

        Ok(ExecutionResult {
            success,
            target_module: event.target_module.clone(),
            target_instance_id: event.target_instance_id.clone(),
            container_id: Some(container_id),
            started_at: Some(Utc::now()),
            duration_seconds: duration,
            health_status: Some(
                health_status.unwrap_or_else(|| "no_healthcheck".to_string()),
            ),
            error: if success {
                None
            } else {
                Some("unhealthy".to_string())
            },
            metadata: std::collections::HashMap::from([
                (
                    "container_name".to_string(),
                    serde_json::Value::String(container.name),
                ),
                (
                    "status_before".to_string(),
                    serde_json::Value::String(status_before),
                ),
            ]),
        })
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn resurrect(&self, event: &KillEvent, _decision: &Decision) -> ExecutionResult {
        let started = Instant::now();
        match self.try_resurrect(event).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    target_module = %event.target_module,
                    error = %e,
                    "docker executor unavailable"
                );
                ExecutionResult::failure(event, e.to_string(), started.elapsed().as_secs_f64())
            }
        }
    }

    async fn health_check(&self, container_name: &str) -> Option<String> {
        match self.inspect(container_name).await {
            Ok(Some(container)) => container
                .health_status()
                .or(Some(container.state.status)),
            _ => None,
        }
    }
}
