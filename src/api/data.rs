//! Read endpoints over the sample series: paged history, per-source
//! summaries and chart-ready downsampled points.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;
use crate::models::Sample;
use crate::store::{SampleOrder, SampleQuery, SourceSummary};

const MAX_LIMIT: i64 = 1000;
const MAX_CHART_POINTS: usize = 500;
const CHART_FETCH_LIMIT: i64 = 10_000;

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub monitor_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default = "default_order_dir")]
    pub order_dir: String,
}

fn default_limit() -> i64 {
    100
}

fn default_order_by() -> String {
    "timestamp".to_string()
}

fn default_order_dir() -> String {
    "desc".to_string()
}

fn parse_date(raw: &str, label: &str) -> Result<DateTime<Utc>, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
        .map_err(|_| ApiError::bad_request(format!("Invalid {label} format. Use YYYY-MM-DD")))
}

/// GET /data — paged sample history with optional source and date filters.
pub async fn get_data(
    State(state): State<AppState>,
    Query(params): Query<DataQuery>,
) -> Result<Json<Vec<Sample>>, ApiError> {
    if params.limit < 1 || params.limit > MAX_LIMIT {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    if params.offset < 0 {
        return Err(ApiError::bad_request("offset must be non-negative"));
    }

    let order_by = SampleOrder::parse(&params.order_by)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid order_by: {}", params.order_by)))?;
    let descending = match params.order_dir.as_str() {
        "desc" => true,
        "asc" => false,
        other => {
            return Err(ApiError::bad_request(format!(
                "Invalid order_dir: {other} (use asc or desc)"
            )))
        }
    };

    let start = params
        .start_date
        .as_deref()
        .map(|raw| parse_date(raw, "start_date"))
        .transpose()?;
    // The end date is inclusive: extend to the following midnight.
    let end = params
        .end_date
        .as_deref()
        .map(|raw| parse_date(raw, "end_date").map(|d| d + Duration::days(1)))
        .transpose()?;

    let samples = state.store.samples_by_range(&SampleQuery {
        source_id: params.monitor_id,
        start,
        end,
        limit: params.limit,
        offset: params.offset,
        order_by,
        descending,
    })?;

    Ok(Json(samples))
}

/// GET /sources — aggregate stats per source_id.
pub async fn get_summaries(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceSummary>>, ApiError> {
    Ok(Json(state.store.sample_summaries()?))
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    7
}

#[derive(Debug, Serialize)]
struct ChartPoint {
    timestamp: String,
    value: Option<f64>,
    status: String,
    is_change: bool,
}

/// GET /chart-data/{monitor_id} — at most 500 points, evenly strided, plus
/// summary statistics over the full window.
pub async fn get_chart_data(
    State(state): State<AppState>,
    Path(monitor_id): Path<String>,
    Query(params): Query<ChartQuery>,
) -> Result<Json<Value>, ApiError> {
    if !(1..=365).contains(&params.days) {
        return Err(ApiError::bad_request("days must be between 1 and 365"));
    }

    let end = Utc::now();
    let start = end - Duration::days(params.days);

    let records = state.store.samples_by_range(&SampleQuery {
        source_id: Some(monitor_id.clone()),
        start: Some(start),
        end: Some(end),
        limit: CHART_FETCH_LIMIT,
        offset: 0,
        order_by: SampleOrder::Timestamp,
        descending: false,
    })?;

    let date_range = format!("{} to {}", start.date_naive(), end.date_naive());

    if records.is_empty() {
        return Ok(Json(json!({
            "monitor_id": monitor_id,
            "data": [],
            "summary": { "total_points": 0, "date_range": date_range },
        })));
    }

    let charted = stride_sample(&records, MAX_CHART_POINTS);
    let data: Vec<ChartPoint> = charted
        .iter()
        .map(|r| ChartPoint {
            timestamp: r.timestamp.to_rfc3339(),
            value: r.value,
            status: r.status.clone(),
            is_change: r.is_change,
        })
        .collect();

    // Stats run over the full record set, not the strided one.
    let values: Vec<f64> = records.iter().filter_map(|r| r.value).collect();
    let (min, max, avg) = if values.is_empty() {
        (None, None, None)
    } else {
        let sum: f64 = values.iter().sum();
        (
            values.iter().copied().fold(f64::INFINITY, f64::min).into(),
            values.iter().copied().fold(f64::NEG_INFINITY, f64::max).into(),
            Some(sum / values.len() as f64),
        )
    };
    let changes = records.iter().filter(|r| r.is_change).count();
    let latest = records.last();

    Ok(Json(json!({
        "monitor_id": monitor_id,
        "data": data,
        "summary": {
            "total_points": records.len(),
            "displayed_points": charted.len(),
            "date_range": date_range,
            "value_range": { "min": min, "max": max, "avg": avg },
            "changes_detected": changes,
            "latest_value": latest.and_then(|r| r.value),
            "latest_timestamp": latest.map(|r| r.timestamp.to_rfc3339()),
        },
    })))
}

/// Every `floor(len / max_points)`-th record, always including the last.
fn stride_sample(records: &[Sample], max_points: usize) -> Vec<&Sample> {
    if records.len() <= max_points {
        return records.iter().collect();
    }

    let stride = records.len() / max_points;
    let mut sampled: Vec<&Sample> = records.iter().step_by(stride.max(1)).collect();

    if let Some(last) = records.last() {
        if sampled.last().map(|s| s.id) != Some(last.id) {
            sampled.push(last);
        }
    }
    sampled
}
