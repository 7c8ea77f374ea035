//! Monitor CRUD. Formula syntax and the acyclicity of `monitor:` references
//! are enforced at write time; deletes cascade to cached values.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::errors::CoreError;
use crate::formula::classify;
use crate::models::Monitor;
use crate::store::MonitorSpec;

#[derive(Debug, Deserialize)]
pub struct MonitorPayload {
    pub id: Option<String>,
    pub name: String,
    pub formula: String,
    pub unit: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub heartbeat_interval_s: i64,
}

fn default_decimal_places() -> i64 {
    2
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct MonitorResponse {
    #[serde(flatten)]
    pub monitor: Monitor,
    /// Derived from the formula: constant, direct or computed.
    pub kind: &'static str,
    pub latest_value: Option<f64>,
}

fn to_response(state: &AppState, monitor: Monitor) -> MonitorResponse {
    let latest_value = state
        .store
        .latest_monitor_value(&monitor.id)
        .ok()
        .flatten()
        .map(|v| v.value);
    MonitorResponse {
        kind: classify(&monitor.formula),
        latest_value,
        monitor,
    }
}

fn validate(state: &AppState, monitor_id: &str, payload: &MonitorPayload) -> Result<(), ApiError> {
    state
        .formula
        .dependencies_of(&payload.formula)
        .map_err(|e| ApiError::unprocessable(format!("Invalid formula: {e}")))?;
    state.formula.check_cycles(monitor_id, &payload.formula)?;
    if payload.heartbeat_interval_s < 0 {
        return Err(ApiError::bad_request("heartbeat_interval_s must be >= 0"));
    }
    Ok(())
}

fn spec_from(monitor_id: String, payload: MonitorPayload) -> MonitorSpec {
    MonitorSpec {
        id: monitor_id,
        name: payload.name,
        formula: payload.formula,
        unit: payload.unit,
        color: payload.color,
        description: payload.description,
        decimal_places: payload.decimal_places,
        enabled: payload.enabled,
        heartbeat_interval_s: payload.heartbeat_interval_s,
    }
}

/// GET /monitors
pub async fn list_monitors(
    State(state): State<AppState>,
) -> Result<Json<Vec<MonitorResponse>>, ApiError> {
    let monitors = state.store.list_monitors(false)?;
    let responses = monitors
        .into_iter()
        .map(|m| to_response(&state, m))
        .collect();
    Ok(Json(responses))
}

/// POST /monitors
pub async fn create_monitor(
    State(state): State<AppState>,
    Json(payload): Json<MonitorPayload>,
) -> Result<Json<MonitorResponse>, ApiError> {
    let monitor_id = payload
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("id is required"))?;

    if state.store.get_monitor(&monitor_id)?.is_some() {
        return Err(ApiError::bad_request(format!(
            "monitor '{monitor_id}' already exists"
        )));
    }
    validate(&state, &monitor_id, &payload)?;

    let monitor = state
        .store
        .create_monitor(&spec_from(monitor_id.clone(), payload))?;
    info!(monitor_id, "Monitor created");

    // Seed the value cache so heartbeats and alerts see data immediately.
    state.formula.compute_monitor_value(&monitor_id);

    Ok(Json(to_response(&state, monitor)))
}

/// PUT /monitors/{id}
pub async fn update_monitor(
    State(state): State<AppState>,
    Path(monitor_id): Path<String>,
    Json(payload): Json<MonitorPayload>,
) -> Result<Json<MonitorResponse>, ApiError> {
    validate(&state, &monitor_id, &payload)?;

    let monitor = state
        .store
        .update_monitor(&spec_from(monitor_id.clone(), payload))?
        .ok_or_else(|| ApiError::from(CoreError::NotFound(format!("monitor '{monitor_id}'"))))?;
    info!(monitor_id, "Monitor updated");

    state.formula.compute_monitor_value(&monitor_id);

    Ok(Json(to_response(&state, monitor)))
}

/// DELETE /monitors/{id}
pub async fn delete_monitor(
    State(state): State<AppState>,
    Path(monitor_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.delete_monitor(&monitor_id)? {
        return Err(CoreError::NotFound(format!("monitor '{monitor_id}'")).into());
    }
    info!(monitor_id, "Monitor deleted");
    Ok(Json(serde_json::json!({ "status": "deleted", "id": monitor_id })))
}
