//! End-to-end scenarios driven through the HTTP router: webhook ingestion
//! feeding monitors feeding alerts, cycle rejection on monitor updates, and
//! the API's boundary validations.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use watchtower_backend::alerts::notifier::RecordingNotifier;
use watchtower_backend::alerts::AlertEngine;
use watchtower_backend::api::{router, AppState};
use watchtower_backend::cache::SnapshotCache;
use watchtower_backend::formula::FormulaEngine;
use watchtower_backend::scrapers::SpotUniverseSource;
use watchtower_backend::store::Store;

struct EmptyUniverse;

#[async_trait]
impl SpotUniverseSource for EmptyUniverse {
    async fn fetch_symbols(&self) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }
}

struct TestApp {
    _dir: TempDir,
    store: Arc<Store>,
    formula: Arc<FormulaEngine>,
    notifier: Arc<RecordingNotifier>,
    alert_engine: AlertEngine,
    router: Router,
}

fn test_app(webhook_secret: Option<&str>) -> TestApp {
    let dir = TempDir::new().expect("tempdir");
    let store = Arc::new(Store::open(dir.path().join("test.db")).expect("open store"));
    let formula = Arc::new(FormulaEngine::new(store.clone()));
    let cache = Arc::new(SnapshotCache::new(Vec::new(), Arc::new(EmptyUniverse)));
    let notifier = Arc::new(RecordingNotifier::default());
    let alert_engine = AlertEngine::new(store.clone(), formula.clone(), notifier.clone(), None);

    let state = AppState {
        store: store.clone(),
        formula: formula.clone(),
        cache,
        webhook_secret: webhook_secret.map(String::from),
    };

    TestApp {
        _dir: dir,
        store,
        formula,
        notifier,
        alert_engine,
        router: router(state),
    }
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn webhook_to_alert_flow() {
    let app = test_app(None);

    // Monitor over the webhook source, high-tier rule with a 5 min cooldown,
    // medium-floor target.
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/monitors",
        json!({ "id": "m1", "name": "Pricing", "formula": "${webhook:pricing}" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/alert-rules",
        json!({
            "id": "r1",
            "name": "Pricing high",
            "condition": "${monitor:m1} > 100",
            "level": "high",
            "cooldown_s": 300,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/notification-targets",
        json!({ "name": "t1", "recipient_key": "user-key", "min_level": "medium" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Webhook lands with text "150".
    let (status, body) = send_json(
        &app.router,
        "POST",
        "/webhook/distill",
        json!({ "id": "pricing", "uri": "https://x", "text": "150" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["monitor_id"], "pricing");

    // Sample persisted with the parsed value; monitor recomputed before the
    // webhook response returned.
    let sample = app.store.latest_sample("pricing").unwrap().unwrap();
    assert_eq!(sample.value, Some(150.0));
    let mv = app.store.latest_monitor_value("m1").unwrap().unwrap();
    assert_eq!(mv.value, 150.0);

    // One alert tick: notifier invoked once at level high, message carries
    // the current value; state is active.
    let t0 = Utc::now();
    app.alert_engine.tick(t0).await.unwrap();
    {
        let sent = app.notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, "high");
        assert!(sent[0].message.contains("150"));
    }
    assert!(app.store.active_alert_state("r1", false).unwrap().is_some());

    // Second webhook within the cooldown: new MonitorValue row (151 != 150)
    // but no second notification.
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/webhook/distill",
        json!({ "id": "pricing", "uri": "https://x", "text": "151" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.store.monitor_value_count("m1").unwrap(), 2);

    app.alert_engine.tick(t0 + Duration::seconds(60)).await.unwrap();
    assert_eq!(app.notifier.sent.lock().len(), 1);
}

#[tokio::test]
async fn cycle_rejected_on_update_leaves_monitor_unchanged() {
    let app = test_app(None);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/monitors",
        json!({ "id": "a", "name": "A", "formula": "1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/monitors",
        json!({ "id": "b", "name": "B", "formula": "${monitor:a} + 1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // a -> b -> a must be rejected with a distinct error.
    let (status, body) = send_json(
        &app.router,
        "PUT",
        "/monitors/a",
        json!({ "name": "A", "formula": "${monitor:b} + 1" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(
        body["detail"]
            .as_str()
            .unwrap()
            .contains("circular dependency"),
        "detail = {body}"
    );

    let a = app.store.get_monitor("a").unwrap().unwrap();
    assert_eq!(a.formula, "1");
}

#[tokio::test]
async fn webhook_token_is_enforced_when_configured() {
    let app = test_app(Some("s3cret"));
    let payload = json!({ "id": "p", "uri": "https://x", "text": "1" });

    let (status, _) = send_json(&app.router, "POST", "/webhook/distill", payload.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/webhook/distill?token=wrong",
        payload.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/webhook/distill?token=s3cret",
        payload,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn webhook_validates_required_fields() {
    let app = test_app(None);

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/webhook/distill",
        json!({ "uri": "https://x", "text": "1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("id"));

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/webhook/distill",
        json!({ "id": "p", "text": "1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unparseable text still persists the sample with a null value.
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/webhook/distill",
        json!({ "id": "p", "uri": "https://x", "text": "status: OK" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sample = app.store.latest_sample("p").unwrap().unwrap();
    assert_eq!(sample.value, None);
    assert_eq!(sample.text.as_deref(), Some("status: OK"));
}

#[tokio::test]
async fn data_endpoint_enforces_limit_ceiling() {
    let app = test_app(None);

    let (status, _) = get(&app.router, "/data?limit=1000").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&app.router, "/data?limit=1001").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("limit"));

    let (status, _) = get(&app.router, "/data?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app.router, "/data?start_date=07/01/2026").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app.router, "/data?order_by=evil").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chart_data_validates_days_and_windows_points() {
    let app = test_app(None);

    let (status, _) = get(&app.router, "/chart-data/m?days=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&app.router, "/chart-data/m?days=366").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Seed two samples: one 2h old, one 30h old. days=1 returns exactly the
    // last 24h of points.
    for (value, hours) in [(1.0, 2i64), (2.0, 30)] {
        app.store
            .insert_sample(&watchtower_backend::models::NewSample {
                source_id: "m".to_string(),
                value: Some(value),
                status: "active".to_string(),
                timestamp: Utc::now() - Duration::hours(hours),
                ..Default::default()
            })
            .unwrap();
    }

    let (status, body) = get(&app.router, "/chart-data/m?days=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total_points"], 1);
    assert_eq!(body["data"][0]["value"], 1.0);

    let (status, body) = get(&app.router, "/chart-data/m?days=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total_points"], 2);
}

#[tokio::test]
async fn monitor_with_constant_formula_evaluates_to_zero() {
    let app = test_app(None);

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/monitors",
        json!({ "id": "zero", "name": "Zero", "formula": "0" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "constant");

    // "0" is a constant, not an unresolved formula: it caches 0.0.
    let mv = app.store.latest_monitor_value("zero").unwrap().unwrap();
    assert_eq!(mv.value, 0.0);

    // A monitor whose only dependency never produced data stays null and
    // writes no value row.
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/monitors",
        json!({ "id": "starved", "name": "S", "formula": "${webhook:never}" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.formula.compute_monitor_value("starved"), None);
    assert!(app.store.latest_monitor_value("starved").unwrap().is_none());
}

#[tokio::test]
async fn invalid_formula_and_level_are_rejected() {
    let app = test_app(None);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/monitors",
        json!({ "id": "bad", "name": "Bad", "formula": "import os" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/alert-rules",
        json!({ "id": "r", "name": "R", "condition": "${monitor:x} > 1", "level": "urgent" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/alert-rules",
        json!({ "id": "r", "name": "R", "condition": "${monitor:x} + 1" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn dex_endpoint_serves_empty_cache() {
    // With no configured sources the cache returns an empty batch rather
    // than failing.
    let app = test_app(None);
    let (status, body) = get(&app.router, "/dex/funding-rates").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rates"].as_array().unwrap().len(), 0);
}
