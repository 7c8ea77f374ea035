//! Venue adapters: one module per exchange, normalizing heterogeneous
//! funding/spot/account APIs into the shared batch types.
//!
//! Adapters either return a full (possibly empty) batch or fail with an
//! error — malformed individual records are skipped, but transport and HTTP
//! failures always surface so the poller can apply its retry policy.

pub mod alp;
pub mod aster;
pub mod backpack;
pub mod binance;
pub mod bybit;
pub mod grvt;
pub mod hyperliquid;
pub mod jlp;
pub mod jupiter;
pub mod lighter;
pub mod okx;
pub mod pyth;
pub mod solana;

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AccountData, HedgePosition, NormalizedRate, SpotQuote};

/// Default per-request timeout; batched adapters (GRVT) override to 30 s.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Positions smaller than this are dust and dropped from account snapshots.
pub const POSITION_DUST: f64 = 1e-4;

/// Funding-rate producer.
#[async_trait]
pub trait RateAdapter: Send + Sync {
    fn exchange(&self) -> &'static str;
    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRate>>;
}

/// Spot-price producer.
#[async_trait]
pub trait SpotAdapter: Send + Sync {
    fn exchange(&self) -> &'static str;
    async fn fetch_spot(&self) -> Result<Vec<SpotQuote>>;
}

/// On-chain account reader.
#[async_trait]
pub trait AccountAdapter: Send + Sync {
    fn exchange(&self) -> &'static str;
    async fn fetch_account(&self, address: &str, label: &str) -> Result<AccountData>;
}

/// LP hedge calculator: derives the required hedge legs for a holding of
/// `lp_amount` pool tokens from on-chain pool state.
#[async_trait]
pub trait HedgeAdapter: Send + Sync {
    /// Lowercase protocol tag; hedge samples land as `{tag}_hedge_{SYMBOL}`.
    fn protocol(&self) -> &'static str;
    async fn fetch_hedge(&self, lp_amount: f64) -> Result<BTreeMap<String, HedgePosition>>;
}

/// The set of symbols tradeable on Binance spot, used to annotate snapshot
/// batches.
#[async_trait]
pub trait SpotUniverseSource: Send + Sync {
    async fn fetch_symbols(&self) -> Result<HashSet<String>>;
}

pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .user_agent("Watchtower/1.0")
        .build()
        .expect("Failed to create HTTP client")
}

/// 8-hour rate to annualized percentage: 3 payments/day × 365 × 100.
pub fn annualize_8h(rate_8h: f64) -> f64 {
    rate_8h * 3.0 * 365.0 * 100.0
}

/// 1-hour rate to annualized percentage: 24 payments/day × 365 × 100.
pub fn annualize_1h(rate_1h: f64) -> f64 {
    rate_1h * 24.0 * 365.0 * 100.0
}

/// Scale a rate quoted over `interval_hours` to the 8-hour basis.
pub fn scale_to_8h(rate: f64, interval_hours: f64) -> f64 {
    rate * (8.0 / interval_hours)
}

/// Uppercase and strip common pair suffixes: `BTCUSDT` -> `BTC`,
/// `eth-perp` -> `ETH`.
pub fn normalize_symbol(symbol: &str) -> String {
    let mut s = symbol.to_uppercase();
    for suffix in ["-PERP", "_PERP", "PERP", "USDT", "USD"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped.to_string();
        }
    }
    s
}

/// Venues disagree on whether numbers arrive as JSON numbers or strings.
pub(crate) fn value_to_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Funding timestamps arrive as epoch millis (number or string) or RFC 3339.
pub(crate) fn parse_funding_time(v: &serde_json::Value) -> Option<DateTime<Utc>> {
    match v {
        serde_json::Value::Number(n) => DateTime::<Utc>::from_timestamp_millis(n.as_i64()?),
        serde_json::Value::String(s) => {
            if let Ok(ms) = s.parse::<i64>() {
                return DateTime::<Utc>::from_timestamp_millis(ms);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}
