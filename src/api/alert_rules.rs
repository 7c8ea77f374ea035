//! Alert rule CRUD. Conditions must split into two formula sub-expressions
//! around a comparison operator; both sides are syntax-checked at write time.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::alerts::engine::split_condition;
use crate::errors::CoreError;
use crate::models::{AlertLevel, AlertRule};
use crate::store::AlertRuleSpec;

#[derive(Debug, Deserialize)]
pub struct AlertRulePayload {
    pub id: Option<String>,
    pub name: String,
    pub condition: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_s: i64,
    #[serde(default)]
    pub heartbeat_enabled: bool,
    #[serde(default)]
    pub heartbeat_interval_s: i64,
}

fn default_level() -> String {
    "medium".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> i64 {
    300
}

fn validate(state: &AppState, payload: &AlertRulePayload) -> Result<AlertLevel, ApiError> {
    let level = AlertLevel::parse(&payload.level).ok_or_else(|| {
        ApiError::unprocessable(format!(
            "Invalid level '{}' (use low, medium, high or critical)",
            payload.level
        ))
    })?;

    let Some((left, _op, right)) = split_condition(&payload.condition) else {
        return Err(ApiError::unprocessable(
            "Condition must compare two expressions, e.g. ${monitor:x} > 100",
        ));
    };
    for side in [left, right] {
        state
            .formula
            .dependencies_of(side)
            .map_err(|e| ApiError::unprocessable(format!("Invalid condition expression: {e}")))?;
    }

    if payload.cooldown_s < 0 {
        return Err(ApiError::bad_request("cooldown_s must be >= 0"));
    }
    if payload.heartbeat_enabled && payload.heartbeat_interval_s <= 0 {
        return Err(ApiError::bad_request(
            "heartbeat_interval_s must be > 0 when heartbeat is enabled",
        ));
    }

    Ok(level)
}

fn spec_from(rule_id: String, payload: AlertRulePayload, level: AlertLevel) -> AlertRuleSpec {
    AlertRuleSpec {
        id: rule_id,
        name: payload.name,
        condition: payload.condition,
        level,
        enabled: payload.enabled,
        cooldown_s: payload.cooldown_s,
        heartbeat_enabled: payload.heartbeat_enabled,
        heartbeat_interval_s: payload.heartbeat_interval_s,
    }
}

/// GET /alert-rules
pub async fn list_rules(State(state): State<AppState>) -> Result<Json<Vec<AlertRule>>, ApiError> {
    Ok(Json(state.store.list_alert_rules(false)?))
}

/// POST /alert-rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(payload): Json<AlertRulePayload>,
) -> Result<Json<AlertRule>, ApiError> {
    let rule_id = payload
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("id is required"))?;

    if state.store.get_alert_rule(&rule_id)?.is_some() {
        return Err(ApiError::bad_request(format!(
            "alert rule '{rule_id}' already exists"
        )));
    }
    let level = validate(&state, &payload)?;

    let rule = state
        .store
        .create_alert_rule(&spec_from(rule_id.clone(), payload, level))?;
    info!(rule_id, "Alert rule created");
    Ok(Json(rule))
}

/// PUT /alert-rules/{id}
pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Json(payload): Json<AlertRulePayload>,
) -> Result<Json<AlertRule>, ApiError> {
    let level = validate(&state, &payload)?;

    let rule = state
        .store
        .update_alert_rule(&spec_from(rule_id.clone(), payload, level))?
        .ok_or_else(|| ApiError::from(CoreError::NotFound(format!("alert rule '{rule_id}'"))))?;
    info!(rule_id, "Alert rule updated");
    Ok(Json(rule))
}

/// DELETE /alert-rules/{id}
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.delete_alert_rule(&rule_id)? {
        return Err(CoreError::NotFound(format!("alert rule '{rule_id}'")).into());
    }
    info!(rule_id, "Alert rule deleted");
    Ok(Json(serde_json::json!({ "status": "deleted", "id": rule_id })))
}
