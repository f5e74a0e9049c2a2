//! HTTP enricher tests against a mock threat-intel API

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lazarus_common::config::EnricherConfig;
use lazarus_common::{KillEvent, KillReason, Recommendation, Severity};
use lazarus_enrich::{Enricher, HttpEnricher};

fn event(module: &str) -> KillEvent {
    KillEvent {
        kill_id: "kill-1".into(),
        timestamp: Utc::now(),
        target_module: module.into(),
        target_instance_id: format!("{}-0", module),
        kill_reason: KillReason::AnomalyBehavior,
        severity: Severity::Medium,
        confidence_score: 0.5,
        evidence: vec![],
        dependencies: BTreeSet::new(),
        source_agent: "smith".into(),
        metadata: HashMap::new(),
    }
}

fn config(server: &MockServer) -> EnricherConfig {
    EnricherConfig {
        backend: "http".into(),
        base_url: server.uri(),
        username: "lazarus".into(),
        password: "secret".into(),
        tenant_id: "default".into(),
        timeout_seconds: 5,
        lookback_hours: 24,
    }
}

async fn mock_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_partial_json(serde_json::json!({"username": "lazarus"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": token,
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn composes_result_from_events_and_alerts() {
    let server = MockServer::start().await;
    mock_login(&server, "tok-1").await;

    Mock::given(method("POST"))
        .and(path("/v1/search"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 10,
            "results": [
                {"severity": 8}, {"severity": 7}, {"severity": 3}, {"severity": 2},
            ],
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/alerts"))
        .and(query_param("status", "new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"title": "cache-service breach attempt", "severity": "critical"},
            {"title": "unrelated alert", "severity": "critical"},
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/alerts"))
        .and(query_param("status", "resolved"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "alerts": [
                {"title": "cache-service flapped", "severity": "low"},
                {"title": "cache-service oom", "severity": "low"},
                {"title": "other-module noise", "severity": "low"},
            ],
        })))
        .mount(&server)
        .await;

    let enricher = HttpEnricher::new(&config(&server)).unwrap();
    let result = enricher.enrich(&event("cache-service")).await;

    // base 2/10 * 0.5 = 0.1, one matching critical alert +0.3
    assert!((result.risk_score - 0.4).abs() < 1e-9);
    assert_eq!(result.false_positive_history, 2);
    assert_eq!(result.recommendation, Recommendation::DenyResurrection);
    assert_eq!(result.threat_indicators.len(), 1);
    assert_eq!(result.threat_indicators[0].threat_score, 0.95);
}

#[tokio::test]
async fn reauthenticates_once_on_401() {
    let server = MockServer::start().await;

    // first login hands out a token the API immediately considers stale;
    // the re-authentication gets a fresh one
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "tok-stale",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mock_login(&server, "tok-fresh").await;

    Mock::given(method("POST"))
        .and(path("/v1/search"))
        .and(header("authorization", "Bearer tok-stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/search"))
        .and(header("authorization", "Bearer tok-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 0,
            "results": [],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/alerts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let enricher = HttpEnricher::new(&config(&server)).unwrap();
    let result = enricher.enrich(&event("cache-service")).await;
    assert_eq!(result.recommendation, Recommendation::NoData);
    assert_eq!(result.risk_score, 0.0);
}

#[tokio::test]
async fn upstream_failure_degrades_to_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let enricher = HttpEnricher::new(&config(&server)).unwrap();
    let result = enricher.enrich(&event("cache-service")).await;
    assert_eq!(result.risk_score, 0.5);
    assert_eq!(result.recommendation, Recommendation::Unknown);
    assert!(result.threat_indicators.is_empty());
}

#[tokio::test]
async fn quiet_history_reads_as_safe() {
    let server = MockServer::start().await;
    mock_login(&server, "tok-1").await;

    Mock::given(method("POST"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 5,
            "results": [{"severity": 2}, {"severity": 1}],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/alerts"))
        .and(query_param("status", "new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/alerts"))
        .and(query_param("status", "resolved"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"title": "cache-service noise", "severity": "low"},
        ])))
        .mount(&server)
        .await;

    let enricher = HttpEnricher::new(&config(&server)).unwrap();
    let result = enricher.enrich(&event("cache-service")).await;
    assert_eq!(result.risk_score, 0.0);
    assert_eq!(result.false_positive_history, 1);
    assert_eq!(result.recommendation, Recommendation::SafeToResurrect);
}

#[tokio::test]
async fn health_check_reflects_reachability() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let enricher = HttpEnricher::new(&config(&server)).unwrap();
    assert!(enricher.health_check().await);
}
