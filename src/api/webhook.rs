//! Distill webhook ingestion: token check, text parsing, sample persistence
//! and event-driven monitor recompute (completed before the response
//! returns).

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::AppState;
use crate::errors::CoreError;
use crate::models::NewSample;

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

/// Distill sends `id`/`uri`/`text`; older senders use the long field names.
#[derive(Debug, Default, Deserialize)]
pub struct DistillPayload {
    pub id: Option<String>,
    pub monitor_id: Option<String>,
    pub name: Option<String>,
    pub monitor_name: Option<String>,
    pub uri: Option<String>,
    pub url: Option<String>,
    pub text: Option<String>,
    pub text_value: Option<String>,
    pub value: Option<f64>,
    pub status: Option<String>,
    pub timestamp: Option<String>,
    pub is_change: Option<bool>,
    pub change_type: Option<String>,
    pub previous_value: Option<f64>,
}

fn verify_token(secret: Option<&str>, token: Option<&str>) -> Result<(), CoreError> {
    let Some(secret) = secret else {
        // No secret configured: webhook is open and the token is ignored.
        warn!("WEBHOOK_SECRET not configured - webhook is not protected");
        return Ok(());
    };

    match token {
        None => Err(CoreError::AuthMissing(
            "Missing authentication token. Please provide ?token=xxx in URL.".to_string(),
        )),
        Some(token) if token != secret => Err(CoreError::AuthInvalid(
            "Invalid authentication token".to_string(),
        )),
        Some(_) => Ok(()),
    }
}

/// Parse a numeric value and display unit out of webhook text like
/// `"1,234.56%"`, `"-0.42"`, `"3.5k SOL"` or `"$1.2M"`.
///
/// Unit detection checks currency symbols before crypto tickers, so
/// `"$1 BTC"` tags as `$`; this mirrors the upstream feed's behavior.
pub fn parse_value_and_unit(text: &str) -> (Option<f64>, Option<String>) {
    if text.trim().is_empty() {
        return (None, None);
    }

    let unit = if text.contains('%') {
        Some("%")
    } else if text.contains('$') {
        Some("$")
    } else if text.contains('€') {
        Some("€")
    } else if text.contains('£') {
        Some("£")
    } else if text.contains("SOL") {
        Some("SOL")
    } else if text.contains("ETH") {
        Some("ETH")
    } else if text.contains("BTC") {
        Some("BTC")
    } else {
        None
    };

    let mut clean = text.replace(',', "");
    for token in ["%", "$", "€", "£", "SOL", "ETH", "BTC"] {
        clean = clean.replace(token, "");
    }
    let mut clean = clean.trim().to_string();

    let mut multiplier = 1.0f64;
    let lower = clean.to_lowercase();
    if lower.ends_with('k') {
        multiplier = 1e3;
        clean.truncate(clean.len() - 1);
    } else if lower.ends_with('m') {
        multiplier = 1e6;
        clean.truncate(clean.len() - 1);
    } else if lower.ends_with('b') {
        multiplier = 1e9;
        clean.truncate(clean.len() - 1);
    }

    let value = clean.trim().parse::<f64>().ok().map(|v| v * multiplier);
    if value.is_none() {
        debug!(text, "Could not parse numeric value from webhook text");
    }
    (value, unit.map(String::from))
}

/// Render a value back into display text such that re-parsing yields the
/// same `(value, unit)` pair.
pub fn format_value(value: f64, unit: Option<&str>, decimal_places: usize) -> String {
    let number = format!("{value:.decimal_places$}");
    match unit {
        Some("%") => format!("{number}%"),
        Some(u @ ("$" | "€" | "£")) => format!("{u}{number}"),
        Some(u) => format!("{number} {u}"),
        None => number,
    }
}

/// Timestamps arrive in a handful of ISO-ish shapes; unparseable ones fall
/// back to the current time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

pub async fn receive_distill(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(raw): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    verify_token(state.webhook_secret.as_deref(), query.token.as_deref())?;

    let payload: DistillPayload = serde_json::from_value(raw)
        .map_err(|e| ApiError::unprocessable(format!("Validation error: {e}")))?;

    let monitor_id = payload
        .id
        .or(payload.monitor_id)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("id or monitor_id is required"))?;
    // The source URI is required by the contract but not persisted; the
    // original text is the provenance we keep.
    payload
        .uri
        .or(payload.url)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("uri or url is required"))?;
    let text = payload
        .text
        .or(payload.text_value)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("text or text_value is required"))?;

    let (parsed_value, unit) = parse_value_and_unit(&text);
    // Upstream may supply an explicit value when the text is unparseable.
    let value = parsed_value.or(payload.value);

    let timestamp = payload
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(|| {
            if payload.timestamp.is_some() {
                warn!(monitor_id, "Unparseable webhook timestamp, using now");
            }
            Utc::now()
        });

    // Display settings stick to the series; inherit them from the previous
    // sample rather than resetting on every delivery.
    let decimal_places = state
        .store
        .latest_sample(&monitor_id)?
        .and_then(|prev| prev.decimal_places)
        .or(Some(2));

    let sample = state.store.insert_sample(&NewSample {
        source_id: monitor_id.clone(),
        display_name: payload.name.or(payload.monitor_name),
        value,
        text: Some(text),
        unit,
        decimal_places,
        status: payload.status.unwrap_or_else(|| "monitored".to_string()),
        timestamp,
        is_change: payload.is_change.unwrap_or(false),
        change_type: payload.change_type,
        previous_value: payload.previous_value,
    })?;

    // Event-driven recompute happens before the webhook response returns.
    let recomputed = state
        .formula
        .recompute_for_dependency(&format!("webhook:{monitor_id}"));
    if !recomputed.is_empty() {
        debug!(
            monitor_id,
            count = recomputed.len(),
            "Webhook triggered monitor recompute"
        );
    }

    info!(monitor_id, value = ?sample.value, "Webhook sample stored");

    Ok(Json(json!({
        "status": "success",
        "message": "Webhook data received and processed",
        "data": {
            "id": sample.id,
            "monitor_id": sample.source_id,
            "timestamp": sample.timestamp.to_rfc3339(),
            "received_at": sample.received_at.to_rfc3339(),
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percent_with_commas() {
        let (value, unit) = parse_value_and_unit("1,234.56%");
        assert_eq!(value, Some(1234.56));
        assert_eq!(unit.as_deref(), Some("%"));
    }

    #[test]
    fn parses_plain_negative() {
        let (value, unit) = parse_value_and_unit("-0.42");
        assert_eq!(value, Some(-0.42));
        assert_eq!(unit, None);
    }

    #[test]
    fn parses_magnitude_suffix_with_crypto_unit() {
        let (value, unit) = parse_value_and_unit("3.5k SOL");
        assert_eq!(value, Some(3500.0));
        assert_eq!(unit.as_deref(), Some("SOL"));
    }

    #[test]
    fn parses_currency_with_magnitude() {
        let (value, unit) = parse_value_and_unit("$1.2M");
        assert_eq!(value, Some(1_200_000.0));
        assert_eq!(unit.as_deref(), Some("$"));

        let (value, _) = parse_value_and_unit("2B");
        assert_eq!(value, Some(2e9));
    }

    #[test]
    fn currency_symbol_wins_over_crypto_ticker() {
        // Observed upstream behavior: "$1 BTC" tags as "$".
        let (value, unit) = parse_value_and_unit("$1 BTC");
        assert_eq!(value, Some(1.0));
        assert_eq!(unit.as_deref(), Some("$"));
    }

    #[test]
    fn unparseable_text_keeps_null_value() {
        let (value, unit) = parse_value_and_unit("status: OK");
        assert_eq!(value, None);
        assert_eq!(unit, None);
    }

    #[test]
    fn parse_format_round_trip() {
        let cases = [
            (1234.56, Some("%"), 2),
            (-0.42, None, 2),
            (3500.0, Some("SOL"), 1),
            (1_200_000.0, Some("$"), 2),
            (0.0, Some("£"), 2),
            (99.999, Some("€"), 3),
        ];

        for (value, unit, decimals) in cases {
            let rendered = format_value(value, unit, decimals);
            let (re_value, re_unit) = parse_value_and_unit(&rendered);
            assert_eq!(re_value, Some(value), "value round trip via {rendered:?}");
            assert_eq!(
                re_unit.as_deref(),
                unit,
                "unit round trip via {rendered:?}"
            );
        }
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2026-07-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2026-07-01T12:00:00.123Z").is_some());
        assert!(parse_timestamp("2026-07-01T12:00:00").is_some());
        assert!(parse_timestamp("2026-07-01 12:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn token_verification() {
        // No secret configured: token ignored either way.
        assert!(verify_token(None, None).is_ok());
        assert!(verify_token(None, Some("anything")).is_ok());

        // Secret configured: missing token is 401, wrong token 403.
        let err = verify_token(Some("s3cret"), None).unwrap_err();
        assert!(matches!(err, CoreError::AuthMissing(_)));
        assert_eq!(
            ApiError::from(err).status,
            axum::http::StatusCode::UNAUTHORIZED
        );
        let err = verify_token(Some("s3cret"), Some("wrong")).unwrap_err();
        assert!(matches!(err, CoreError::AuthInvalid(_)));
        assert_eq!(ApiError::from(err).status, axum::http::StatusCode::FORBIDDEN);
        assert!(verify_token(Some("s3cret"), Some("s3cret")).is_ok());
    }
}
