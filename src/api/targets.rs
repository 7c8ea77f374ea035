//! Notification target CRUD: who receives alerts and from which tier up.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::errors::CoreError;
use crate::models::{AlertLevel, NotificationTarget};
use crate::store::TargetSpec;

#[derive(Debug, Deserialize)]
pub struct TargetPayload {
    pub name: String,
    pub recipient_key: String,
    pub api_token: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_min_level")]
    pub min_level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_min_level() -> String {
    "low".to_string()
}

fn spec_from(payload: TargetPayload) -> Result<TargetSpec, ApiError> {
    let min_level = AlertLevel::parse(&payload.min_level).ok_or_else(|| {
        ApiError::unprocessable(format!(
            "Invalid min_level '{}' (use low, medium, high or critical)",
            payload.min_level
        ))
    })?;
    if payload.recipient_key.trim().is_empty() {
        return Err(ApiError::bad_request("recipient_key is required"));
    }

    Ok(TargetSpec {
        name: payload.name,
        recipient_key: payload.recipient_key,
        api_token: payload.api_token,
        enabled: payload.enabled,
        min_level,
    })
}

/// GET /notification-targets
pub async fn list_targets(
    State(state): State<AppState>,
) -> Result<Json<Vec<NotificationTarget>>, ApiError> {
    Ok(Json(state.store.list_targets(false)?))
}

/// POST /notification-targets
pub async fn create_target(
    State(state): State<AppState>,
    Json(payload): Json<TargetPayload>,
) -> Result<Json<NotificationTarget>, ApiError> {
    let target = state.store.create_target(&spec_from(payload)?)?;
    info!(target = %target.name, "Notification target created");
    Ok(Json(target))
}

/// PUT /notification-targets/{id}
pub async fn update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<TargetPayload>,
) -> Result<Json<NotificationTarget>, ApiError> {
    let target = state
        .store
        .update_target(id, &spec_from(payload)?)?
        .ok_or_else(|| ApiError::from(CoreError::NotFound(format!("notification target {id}"))))?;
    info!(target = %target.name, "Notification target updated");
    Ok(Json(target))
}

/// DELETE /notification-targets/{id}
pub async fn delete_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.delete_target(id)? {
        return Err(CoreError::NotFound(format!("notification target {id}")).into());
    }
    info!(id, "Notification target deleted");
    Ok(Json(serde_json::json!({ "status": "deleted", "id": id })))
}
