//! Funding-rate comparison endpoints, served from the snapshot cache.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::AppState;
use crate::errors::CoreError;
use crate::models::NormalizedRate;

#[derive(Debug, Deserialize)]
pub struct DexQuery {
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct FundingRatesResponse {
    pub rates: Vec<NormalizedRate>,
    pub last_updated: DateTime<Utc>,
}

/// GET /dex/funding-rates — the merged latest batch across every venue.
pub async fn get_funding_rates(
    State(state): State<AppState>,
    Query(params): Query<DexQuery>,
) -> Result<Json<FundingRatesResponse>, ApiError> {
    let batch = state
        .cache
        .get(params.force_refresh)
        .await
        .map_err(|e| ApiError::from(CoreError::Upstream(e.to_string())))?;

    Ok(Json(FundingRatesResponse {
        rates: batch.rates,
        last_updated: batch.last_updated,
    }))
}

/// GET /dex/funding-rates/{symbol} — filtered by symbol prefix.
pub async fn get_funding_rates_by_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<DexQuery>,
) -> Result<Json<FundingRatesResponse>, ApiError> {
    let batch = state
        .cache
        .get(params.force_refresh)
        .await
        .map_err(|e| ApiError::from(CoreError::Upstream(e.to_string())))?;

    let prefix = symbol.to_uppercase();
    let rates: Vec<NormalizedRate> = batch
        .rates
        .into_iter()
        .filter(|r| r.symbol.to_uppercase().starts_with(&prefix))
        .collect();

    Ok(Json(FundingRatesResponse {
        rates,
        last_updated: batch.last_updated,
    }))
}
