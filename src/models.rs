//! Core domain types shared across the store, engines and API.
//!
//! Everything cross-references by string id (source_id, monitor id, rule id);
//! there is no in-memory object graph.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity tier. Ordering matters: a target only receives alerts with
/// `level >= target.min_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Low => "low",
            AlertLevel::Medium => "medium",
            AlertLevel::High => "high",
            AlertLevel::Critical => "critical",
        }
    }

    /// Parse a tier name. Accepts the plain form only; heartbeat-prefixed
    /// state levels go through [`base_level`].
    pub fn parse(s: &str) -> Option<AlertLevel> {
        match s {
            "low" => Some(AlertLevel::Low),
            "medium" => Some(AlertLevel::Medium),
            "high" => Some(AlertLevel::High),
            "critical" => Some(AlertLevel::Critical),
            _ => None,
        }
    }

    /// Pushover priority for this tier.
    pub fn priority(&self) -> i8 {
        match self {
            AlertLevel::Low => -1,
            AlertLevel::Medium => 0,
            AlertLevel::High => 1,
            AlertLevel::Critical => 2,
        }
    }

    /// Pushover sound for this tier.
    pub fn sound(&self) -> &'static str {
        match self {
            AlertLevel::Low => "none",
            AlertLevel::Medium => "pushover",
            AlertLevel::High => "persistent",
            AlertLevel::Critical => "siren",
        }
    }

    /// Retry/expire window in seconds, only set for emergency-priority tiers.
    pub fn retry_expire(&self) -> Option<(u32, u32)> {
        match self {
            AlertLevel::Critical => Some((30, 3600)),
            _ => None,
        }
    }
}

/// Strip an optional `heartbeat_` prefix off a persisted state level and parse
/// the base tier. Heartbeat states are stored as e.g. `heartbeat_high` so they
/// never collide with threshold states for the same rule.
pub fn base_level(state_level: &str) -> Option<AlertLevel> {
    AlertLevel::parse(state_level.strip_prefix("heartbeat_").unwrap_or(state_level))
}

/// One time-stamped measurement row, the uniform record written by every
/// producer (pollers, webhooks, account monitors). Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: i64,
    pub source_id: String,
    pub display_name: Option<String>,
    pub value: Option<f64>,
    pub text: Option<String>,
    pub unit: Option<String>,
    pub decimal_places: Option<i64>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub is_change: bool,
    pub change_type: Option<String>,
    pub previous_value: Option<f64>,
}

/// A sample about to be persisted. `received_at` is stamped by the store.
#[derive(Debug, Clone, Default)]
pub struct NewSample {
    pub source_id: String,
    pub display_name: Option<String>,
    pub value: Option<f64>,
    pub text: Option<String>,
    pub unit: Option<String>,
    pub decimal_places: Option<i64>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub is_change: bool,
    pub change_type: Option<String>,
    pub previous_value: Option<f64>,
}

impl NewSample {
    /// A plain numeric sample with defaults for the provenance fields.
    pub fn value_only(source_id: &str, display_name: &str, value: f64, unit: Option<&str>) -> Self {
        NewSample {
            source_id: source_id.to_string(),
            display_name: Some(display_name.to_string()),
            value: Some(value),
            unit: unit.map(|u| u.to_string()),
            status: "active".to_string(),
            timestamp: Utc::now(),
            ..Default::default()
        }
    }
}

/// User-authored metric definition. The formula grammar is documented on
/// [`crate::formula`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,
    pub name: String,
    pub formula: String,
    pub unit: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub decimal_places: i64,
    pub enabled: bool,
    /// 0 disables heartbeat staleness tracking.
    pub heartbeat_interval_s: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cached computed value for a monitor. A new row is written only when the
/// value moves by more than 1e-10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorValue {
    pub id: i64,
    pub monitor_id: String,
    pub value: f64,
    pub computed_at: DateTime<Utc>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    /// Boolean condition, e.g. `${monitor:btc} > 50000`.
    pub condition: String,
    pub level: AlertLevel,
    pub enabled: bool,
    pub cooldown_s: i64,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_s: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Live alert bookkeeping. At most one active state per (rule, kind) where
/// kind is threshold or heartbeat; enforced by the alert engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertState {
    pub id: i64,
    pub rule_id: String,
    /// Tier name, `heartbeat_`-prefixed for staleness alerts.
    pub level: String,
    pub triggered_at: DateTime<Utc>,
    pub last_notified_at: DateTime<Utc>,
    pub notification_count: i64,
    pub resolved_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// A push-notification recipient with a minimum-severity filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub id: i64,
    pub name: String,
    pub recipient_key: String,
    pub api_token: Option<String>,
    pub enabled: bool,
    pub min_level: AlertLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One funding-rate observation, normalized to the 8-hour basis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub id: i64,
    pub exchange: String,
    pub symbol: String,
    /// 8-hour normalized rate (decimal, e.g. 0.0001 = 0.01%).
    pub rate: f64,
    /// Annualized percentage, e.g. 10.95 = 10.95% APY.
    pub annualized_rate: f64,
    pub mark_price: Option<f64>,
    pub next_funding_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotPrice {
    pub id: i64,
    pub exchange: String,
    pub symbol: String,
    pub price: f64,
    pub volume_24h: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Adapter output: one venue's funding rate for one symbol, normalized so
/// `rate_8h` is always on the 8-hour basis. `interval_hours` preserves the
/// upstream periodicity so consumers can re-derive the raw figure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRate {
    pub exchange: String,
    pub symbol: String,
    pub rate_8h: Option<f64>,
    pub annualized_rate: Option<f64>,
    pub mark_price: Option<f64>,
    pub next_funding_time: Option<DateTime<Utc>>,
    pub volume_24h: Option<f64>,
    pub turnover_24h: Option<f64>,
    pub interval_hours: Option<f64>,
    /// Set by the snapshot cache: symbol trades on Binance spot.
    #[serde(default)]
    pub has_binance_spot: bool,
}

impl NormalizedRate {
    pub fn new(exchange: &str, symbol: &str) -> Self {
        NormalizedRate {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            rate_8h: None,
            annualized_rate: None,
            mark_price: None,
            next_funding_time: None,
            volume_24h: None,
            turnover_24h: None,
            interval_hours: None,
            has_binance_spot: false,
        }
    }
}

/// Adapter output: one spot quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotQuote {
    pub symbol: String,
    pub price: f64,
    pub volume_24h: Option<f64>,
}

/// Adapter output: an on-chain account snapshot. Positions are signed sizes
/// keyed by symbol; dust (|size| < 1e-4) is filtered by the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountData {
    pub account_value: f64,
    pub positions: BTreeMap<String, f64>,
}

/// One required hedge leg computed by an LP hedge calculator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HedgePosition {
    /// Tokens to hedge for the configured holdings.
    pub amount: f64,
    /// Pool exposure per LP token.
    pub per_token: f64,
}
