//! Contract tests run against both store backends

use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use lazarus_common::{
    FeedbackSource, OutcomePatch, OutcomeType, ResurrectionOutcome,
};
use lazarus_store::{MemoryOutcomeStore, OutcomeStore, SledOutcomeStore};

fn outcome(id: &str, module: &str, minutes: i64) -> ResurrectionOutcome {
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    ResurrectionOutcome {
        outcome_id: id.to_string(),
        decision_id: format!("decision-{}", id),
        kill_id: format!("kill-{}", id),
        target_module: module.to_string(),
        timestamp: base + Duration::minutes(minutes),
        outcome_type: OutcomeType::Undetermined,
        original_risk_score: 0.2,
        original_confidence: 0.9,
        original_decision: "PENDING_REVIEW".to_string(),
        was_auto_approved: false,
        health_score_after: None,
        time_to_healthy: None,
        anomalies_detected: 0,
        required_rollback: false,
        feedback_source: FeedbackSource::Automated,
        human_feedback: None,
        corrected_decision: None,
        metadata: HashMap::new(),
    }
}

fn backends() -> Vec<(&'static str, Arc<dyn OutcomeStore>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let sled = SledOutcomeStore::open(dir.path().join("outcomes.db")).unwrap();
    vec![
        ("memory", Arc::new(MemoryOutcomeStore::new()), None),
        ("sled", Arc::new(sled), Some(dir)),
    ]
}

#[tokio::test]
async fn round_trips_every_field() {
    for (name, store, _guard) in backends() {
        let mut original = outcome("rt-1", "cache-service", 0);
        original.outcome_type = OutcomeType::Success;
        original.was_auto_approved = true;
        original.health_score_after = Some(0.97);
        original.time_to_healthy = Some(12.5);
        original.anomalies_detected = 2;
        original.required_rollback = false;
        original.feedback_source = FeedbackSource::SiemCorrelation;
        original.human_feedback = Some("looked fine".to_string());
        original.corrected_decision = Some("approve_manual".to_string());
        original.metadata.insert(
            "enrichment".to_string(),
            serde_json::json!({"risk_score": 0.1, "recommendation": "safe_to_resurrect"}),
        );

        store.store(&original).await.unwrap();
        let loaded = store.get("rt-1").await.unwrap().expect("stored record");
        assert_eq!(loaded, original, "backend {}", name);

        assert!(store.get("missing").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn store_is_insert_or_replace() {
    for (name, store, _guard) in backends() {
        let mut record = outcome("ir-1", "cache-service", 0);
        store.store(&record).await.unwrap();

        record.outcome_type = OutcomeType::Failure;
        store.store(&record).await.unwrap();

        let loaded = store.get("ir-1").await.unwrap().unwrap();
        assert_eq!(loaded.outcome_type, OutcomeType::Failure, "backend {}", name);

        // replaced rows must not appear twice in listings
        let recent = store.list_recent(10, None).await.unwrap();
        assert_eq!(recent.len(), 1, "backend {}", name);
        // nor under their old type index
        let undetermined = store
            .list_by_type(OutcomeType::Undetermined, 10, None)
            .await
            .unwrap();
        assert!(undetermined.is_empty(), "backend {}", name);
    }
}

#[tokio::test]
async fn listings_are_newest_first_with_limit_and_since() {
    for (name, store, _guard) in backends() {
        store.store(&outcome("a", "cache-service", 0)).await.unwrap();
        store.store(&outcome("b", "cache-service", 10)).await.unwrap();
        store.store(&outcome("c", "auth-service", 20)).await.unwrap();
        store.store(&outcome("d", "cache-service", 30)).await.unwrap();

        let recent = store.list_recent(10, None).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|o| o.outcome_id.as_str()).collect();
        assert_eq!(ids, ["d", "c", "b", "a"], "backend {}", name);

        let limited = store.list_recent(2, None).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].outcome_id, "d");

        let since = outcome("x", "x", 10).timestamp;
        let recent_since = store.list_recent(10, Some(since)).await.unwrap();
        let ids: Vec<_> = recent_since.iter().map(|o| o.outcome_id.as_str()).collect();
        assert_eq!(ids, ["d", "c", "b"], "backend {}", name);

        let by_module = store
            .list_by_module("cache-service", 10, None)
            .await
            .unwrap();
        let ids: Vec<_> = by_module.iter().map(|o| o.outcome_id.as_str()).collect();
        assert_eq!(ids, ["d", "b", "a"], "backend {}", name);

        let by_type = store
            .list_by_type(OutcomeType::Undetermined, 10, None)
            .await
            .unwrap();
        assert_eq!(by_type.len(), 4, "backend {}", name);
    }
}

#[tokio::test]
async fn equal_timestamps_keep_insertion_order() {
    for (name, store, _guard) in backends() {
        // identical timestamps, inserted e2 then e1 then e3
        store.store(&outcome("e2", "m", 5)).await.unwrap();
        store.store(&outcome("e1", "m", 5)).await.unwrap();
        store.store(&outcome("e3", "m", 5)).await.unwrap();

        let recent = store.list_recent(10, None).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|o| o.outcome_id.as_str()).collect();
        assert_eq!(ids, ["e2", "e1", "e3"], "backend {}", name);
    }
}

#[tokio::test]
async fn update_touches_only_allowed_fields() {
    for (name, store, _guard) in backends() {
        let original = outcome("up-1", "cache-service", 0);
        store.store(&original).await.unwrap();

        let patch = OutcomePatch {
            outcome_type: Some(OutcomeType::FalsePositive),
            human_feedback: Some("killer was wrong".to_string()),
            feedback_source: Some(FeedbackSource::HumanOperator),
            corrected_decision: Some("approve_manual".to_string()),
            anomalies_detected: Some(1),
            ..Default::default()
        };
        assert!(store.update("up-1", &patch).await.unwrap());

        let updated = store.get("up-1").await.unwrap().unwrap();
        assert_eq!(updated.outcome_type, OutcomeType::FalsePositive);
        assert_eq!(updated.human_feedback.as_deref(), Some("killer was wrong"));
        assert_eq!(updated.feedback_source, FeedbackSource::HumanOperator);
        assert_eq!(updated.anomalies_detected, 1);

        // identity and decision context are immutable
        assert_eq!(updated.kill_id, original.kill_id, "backend {}", name);
        assert_eq!(updated.decision_id, original.decision_id);
        assert_eq!(updated.timestamp, original.timestamp);
        assert_eq!(updated.original_risk_score, original.original_risk_score);
        assert_eq!(updated.original_decision, original.original_decision);

        // type index follows the update
        let fps = store
            .list_by_type(OutcomeType::FalsePositive, 10, None)
            .await
            .unwrap();
        assert_eq!(fps.len(), 1, "backend {}", name);

        assert!(!store.update("missing", &patch).await.unwrap());
    }
}

#[tokio::test]
async fn statistics_match_seeded_rows() {
    for (name, store, _guard) in backends() {
        let mut s1 = outcome("s1", "cache-service", 0);
        s1.outcome_type = OutcomeType::Success;
        s1.was_auto_approved = true;
        s1.original_risk_score = 0.2;
        s1.time_to_healthy = Some(10.0);

        let mut s2 = outcome("s2", "cache-service", 1);
        s2.outcome_type = OutcomeType::Success;
        s2.was_auto_approved = true;
        s2.original_risk_score = 0.25;
        s2.time_to_healthy = Some(20.0);

        let mut f1 = outcome("f1", "auth-service", 2);
        f1.outcome_type = OutcomeType::Failure;
        f1.was_auto_approved = true;
        f1.original_risk_score = 0.6;

        let mut fp1 = outcome("fp1", "auth-service", 3);
        fp1.outcome_type = OutcomeType::FalsePositive;

        for o in [&s1, &s2, &f1, &fp1] {
            store.store(o).await.unwrap();
        }

        let stats = store.statistics(None, None).await.unwrap();
        assert_eq!(stats.total_outcomes, 4, "backend {}", name);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.false_positive_count, 1);
        assert_eq!(stats.auto_approved_count, 3);
        assert!((stats.auto_approve_accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.avg_risk_score_success - 0.225).abs() < 1e-9);
        assert!((stats.avg_risk_score_failure - 0.6).abs() < 1e-9);
        assert!((stats.avg_time_to_healthy - 15.0).abs() < 1e-9);
        assert_eq!(stats.human_override_rate, 0.0);
        assert_eq!(stats.period_start, s1.timestamp);
        assert_eq!(stats.period_end, fp1.timestamp);

        let module = store.module_statistics("cache-service").await.unwrap();
        assert_eq!(module.total_resurrections, 2);
        assert_eq!(module.success_count, 2);
        assert_eq!(module.failure_count, 0);
        assert_eq!(module.success_rate, 1.0);
        assert!((module.avg_recovery_time - 15.0).abs() < 1e-9);

        let empty = store.module_statistics("unknown-module").await.unwrap();
        assert_eq!(empty.total_resurrections, 0);
        assert_eq!(empty.success_rate, 0.0);
    }
}

#[tokio::test]
async fn sled_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outcomes.db");

    {
        let store = SledOutcomeStore::open(&path).unwrap();
        store.store(&outcome("p-1", "cache-service", 0)).await.unwrap();
        store.store(&outcome("p-2", "cache-service", 1)).await.unwrap();
    }

    let store = SledOutcomeStore::open(&path).unwrap();
    assert!(store.get("p-1").await.unwrap().is_some());
    let recent = store.list_recent(10, None).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].outcome_id, "p-2");

    // new rows after reopen must not collide with recovered sequences
    store.store(&outcome("p-3", "cache-service", 1)).await.unwrap();
    let recent = store.list_recent(10, None).await.unwrap();
    let ids: Vec<_> = recent.iter().map(|o| o.outcome_id.as_str()).collect();
    assert_eq!(ids, ["p-2", "p-3", "p-1"]);
}

#[tokio::test]
async fn sled_store_skips_corrupt_rows_in_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outcomes.db");

    {
        let db = sled::open(&path).unwrap();
        let tree = db.open_tree("outcomes").unwrap();
        tree.insert(b"garbage", b"not json at all".as_slice()).unwrap();
        db.flush().unwrap();
    }

    let store = SledOutcomeStore::open(&path).unwrap();
    let mut good = outcome("g-1", "cache-service", 0);
    good.outcome_type = OutcomeType::Success;
    store.store(&good).await.unwrap();

    let stats = store.statistics(None, None).await.unwrap();
    assert_eq!(stats.total_outcomes, 1);
    assert_eq!(stats.success_count, 1);
}
