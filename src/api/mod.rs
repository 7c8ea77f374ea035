//! HTTP surface: webhook ingestion, sample/chart reads, monitor and alert
//! rule management, and the cached funding-rate comparison endpoints.

pub mod alert_rules;
pub mod data;
pub mod dex;
pub mod error;
pub mod monitors;
pub mod targets;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;

use crate::cache::SnapshotCache;
use crate::formula::FormulaEngine;
use crate::store::Store;

/// Shared handler state: the engine root handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub formula: Arc<FormulaEngine>,
    pub cache: Arc<SnapshotCache>,
    pub webhook_secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/distill", post(webhook::receive_distill))
        .route("/data", get(data::get_data))
        .route("/sources", get(data::get_summaries))
        .route("/chart-data/:monitor_id", get(data::get_chart_data))
        .route(
            "/monitors",
            get(monitors::list_monitors).post(monitors::create_monitor),
        )
        .route(
            "/monitors/:id",
            put(monitors::update_monitor).delete(monitors::delete_monitor),
        )
        .route(
            "/alert-rules",
            get(alert_rules::list_rules).post(alert_rules::create_rule),
        )
        .route(
            "/alert-rules/:id",
            put(alert_rules::update_rule).delete(alert_rules::delete_rule),
        )
        .route(
            "/notification-targets",
            get(targets::list_targets).post(targets::create_target),
        )
        .route(
            "/notification-targets/:id",
            put(targets::update_target).delete(targets::delete_target),
        )
        .route("/dex/funding-rates", get(dex::get_funding_rates))
        .route(
            "/dex/funding-rates/:symbol",
            get(dex::get_funding_rates_by_symbol),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
