//! REST threat-intel client
//!
//! Speaks to a SIEM-style HTTP API: session login for a bearer token
//! (re-authenticating once on 401), an event search over the lookback
//! window, and active/resolved alert listings filtered to the target
//! module by substring. The combined data is folded into a normalized
//! [`EnrichmentResult`]; any failure along the way degrades to the
//! "unknown" default.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use lazarus_common::config::EnricherConfig;
use lazarus_common::{
    clamp_score, EnrichmentResult, Error, KillEvent, Recommendation, Result, ThreatIndicator,
};

use crate::Enricher;

const SEVERITY_HIGH_WATERMARK: u32 = 7;
const EVENT_VOLUME_BOOST_ABOVE: u64 = 20;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    results: Vec<SearchEvent>,
}

#[derive(Debug, Deserialize)]
struct SearchEvent {
    #[serde(default)]
    severity: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct Alert {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    group_key: String,
    #[serde(default)]
    severity: String,
}

impl Alert {
    fn mentions(&self, module: &str) -> bool {
        self.title.contains(module)
            || self.description.contains(module)
            || self.group_key.contains(module)
    }

    fn is_hot(&self) -> bool {
        matches!(self.severity.as_str(), "critical" | "high")
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AlertsResponse {
    List(Vec<Alert>),
    Wrapped {
        #[serde(default)]
        alerts: Vec<Alert>,
    },
}

impl AlertsResponse {
    fn into_alerts(self) -> Vec<Alert> {
        match self {
            AlertsResponse::List(alerts) => alerts,
            AlertsResponse::Wrapped { alerts } => alerts,
        }
    }
}

/// HTTP enricher. The configured request timeout bounds every call; the
/// dispatcher never waits longer than that for enrichment.
pub struct HttpEnricher {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    tenant_id: String,
    lookback_hours: u64,
    token: Mutex<Option<String>>,
}

impl HttpEnricher {
    pub fn new(config: &EnricherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build http client: {}", e)))?;

        Ok(HttpEnricher {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            tenant_id: config.tenant_id.clone(),
            lookback_hours: config.lookback_hours,
            token: Mutex::new(None),
        })
    }

    async fn authenticate(&self) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&json!({
                "username": self.username,
                "password": self.password,
                "tenant_id": self.tenant_id,
            }))
            .send()
            .await
            .map_err(|e| Error::EnricherUnavailable(format!("login failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::EnricherUnavailable(format!(
                "login rejected: {}",
                response.status()
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::EnricherUnavailable(format!("bad login response: {}", e)))?;

        info!("authenticated with threat-intel source");
        *self.token.lock().await = Some(login.token.clone());
        Ok(login.token)
    }

    async fn current_token(&self) -> Result<String> {
        if let Some(token) = self.token.lock().await.clone() {
            return Ok(token);
        }
        self.authenticate().await
    }

    /// Send an authenticated request, re-authenticating once on 401.
    async fn send_authed(
        &self,
        build: impl Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let token = self.current_token().await?;
        let response = build(&self.client, &token)
            .send()
            .await
            .map_err(|e| Error::EnricherUnavailable(e.to_string()))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!("threat-intel token expired, re-authenticating");
        let token = self.authenticate().await?;
        build(&self.client, &token)
            .send()
            .await
            .map_err(|e| Error::EnricherUnavailable(e.to_string()))
    }

    async fn search_events(&self, module: &str) -> Result<SearchResponse> {
        let body = json!({
            "query": format!("source.product = \"{}\" AND severity >= 1", module),
            "start_time": format!("now-{}h", self.lookback_hours),
            "end_time": "now",
            "limit": 100,
            "order_by": "severity",
            "order_desc": true,
        });
        let url = format!("{}/v1/search", self.base_url);
        let response = self
            .send_authed(|client, token| client.post(&url).bearer_auth(token).json(&body))
            .await?;

        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                target_module = module,
                "threat-intel search failed"
            );
            return Ok(SearchResponse::default());
        }

        response
            .json()
            .await
            .map_err(|e| Error::EnricherUnavailable(format!("bad search response: {}", e)))
    }

    async fn list_alerts(&self, module: &str, status: &str, limit: u32) -> Result<Vec<Alert>> {
        let url = format!("{}/v1/alerts", self.base_url);
        let response = self
            .send_authed(|client, token| {
                client
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("status", status), ("limit", &limit.to_string())])
            })
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "threat-intel alerts query failed");
            return Ok(Vec::new());
        }

        let alerts: AlertsResponse = response
            .json()
            .await
            .map_err(|e| Error::EnricherUnavailable(format!("bad alerts response: {}", e)))?;

        Ok(alerts
            .into_alerts()
            .into_iter()
            .filter(|a| a.mentions(module))
            .collect())
    }

    async fn lookup(&self, module: &str) -> Result<EnrichmentResult> {
        let search = self.search_events(module).await?;
        let active_alerts = self.list_alerts(module, "new", 50).await?;
        let resolved_count = self.list_alerts(module, "resolved", 100).await?.len() as u32;

        Ok(Self::compose(
            module,
            &search,
            &active_alerts,
            resolved_count,
        ))
    }

    /// Fold the raw lookups into a normalized result.
    ///
    /// Score: base = share of high-severity events halved, +0.3 per active
    /// critical/high alert capped at +0.4, +0.1 on a busy window, clamped.
    fn compose(
        module: &str,
        search: &SearchResponse,
        active_alerts: &[Alert],
        false_positive_history: u32,
    ) -> EnrichmentResult {
        let total_events = search.total_count;
        let high_severity = search
            .results
            .iter()
            .filter(|e| e.severity >= SEVERITY_HIGH_WATERMARK)
            .count() as u64;

        let hot_alerts: Vec<&Alert> = active_alerts.iter().filter(|a| a.is_hot()).collect();

        let mut risk_score = 0.0;
        if total_events > 0 {
            risk_score = high_severity as f64 / total_events as f64 * 0.5;
        }
        risk_score += (hot_alerts.len() as f64 * 0.3).min(0.4);
        if total_events > EVENT_VOLUME_BOOST_ABOVE {
            risk_score += 0.1;
        }
        let risk_score = clamp_score(risk_score);

        let recommendation = if !hot_alerts.is_empty() {
            Recommendation::DenyResurrection
        } else if risk_score > 0.5 {
            Recommendation::ManualReview
        } else if risk_score < 0.2 && false_positive_history > 0 {
            Recommendation::SafeToResurrect
        } else if total_events == 0 {
            Recommendation::NoData
        } else {
            Recommendation::ProceedWithCaution
        };

        let threat_indicators = hot_alerts
            .iter()
            .map(|a| ThreatIndicator {
                indicator_type: "active_alert".to_string(),
                threat_score: if a.severity == "critical" { 0.95 } else { 0.85 },
                description: a.title.clone(),
            })
            .collect();

        info!(
            target_module = module,
            risk_score = format!("{:.3}", risk_score),
            total_events,
            high_severity,
            active_alerts = active_alerts.len(),
            false_positives = false_positive_history,
            recommendation = recommendation.as_str(),
            "threat-intel enrichment complete"
        );

        EnrichmentResult {
            risk_score,
            false_positive_history,
            recommendation,
            threat_indicators,
        }
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, event: &KillEvent) -> EnrichmentResult {
        match self.lookup(&event.target_module).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    target_module = %event.target_module,
                    error = %e,
                    "enrichment failed, using defaults"
                );
                EnrichmentResult::default()
            }
        }
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
