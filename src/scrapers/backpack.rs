//! Backpack adapter. There is no batch funding endpoint, so the adapter fans
//! out per perp symbol; a 5-permit semaphore bounds the parallelism against
//! the upstream. Funding is quoted hourly.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{annualize_1h, default_client, RateAdapter};
use crate::models::NormalizedRate;

const MARKETS_API: &str = "https://api.backpack.exchange/api/v1/markets";
const FUNDING_API: &str = "https://api.backpack.exchange/api/v1/fundingRates";
const TICKER_API: &str = "https://api.backpack.exchange/api/v1/ticker";

const MAX_CONCURRENT_REQUESTS: usize = 5;

pub struct BackpackAdapter {
    client: Client,
    semaphore: Arc<Semaphore>,
}

impl BackpackAdapter {
    pub fn new() -> Self {
        BackpackAdapter {
            client: default_client(),
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        }
    }

    /// Fetch the latest funding rate and 24h turnover for one perp symbol.
    /// Per-symbol failures are skipped by the caller; only the market list
    /// itself failing aborts the batch.
    async fn fetch_symbol(&self, perp_symbol: String) -> Option<NormalizedRate> {
        let _permit = self.semaphore.acquire().await.ok()?;

        let funding: Vec<FundingEntry> = match self
            .client
            .get(FUNDING_API)
            .query(&[("symbol", perp_symbol.as_str()), ("limit", "1")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => match resp.json().await {
                Ok(list) => list,
                Err(e) => {
                    warn!(symbol = %perp_symbol, error = %e, "Unparsable backpack funding entry");
                    return None;
                }
            },
            Err(e) => {
                warn!(symbol = %perp_symbol, error = %e, "Backpack funding request failed");
                return None;
            }
        };

        let rate_1h = funding
            .first()
            .and_then(|entry| entry.funding_rate.as_deref())
            .and_then(|s| s.parse::<f64>().ok())?;

        // Turnover is best-effort; a missing ticker only loses the volume cap.
        let turnover_24h = match self
            .client
            .get(TICKER_API)
            .query(&[("symbol", perp_symbol.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => resp
                .json::<TickerEntry>()
                .await
                .ok()
                .and_then(|t| t.quote_volume)
                .and_then(|s| s.parse::<f64>().ok()),
            Err(_) => None,
        };

        let base = perp_symbol.replace("_USDC_PERP", "");
        let mut rate = NormalizedRate::new("backpack", &base);
        rate.rate_8h = Some(rate_1h * 8.0);
        rate.annualized_rate = Some(annualize_1h(rate_1h));
        rate.turnover_24h = turnover_24h;
        rate.interval_hours = Some(1.0);
        Some(rate)
    }
}

impl Default for BackpackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct MarketEntry {
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct FundingEntry {
    #[serde(rename = "fundingRate")]
    funding_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    #[serde(rename = "quoteVolume")]
    quote_volume: Option<String>,
}

#[async_trait]
impl RateAdapter for BackpackAdapter {
    fn exchange(&self) -> &'static str {
        "backpack"
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRate>> {
        let markets: Vec<MarketEntry> = self
            .client
            .get(MARKETS_API)
            .send()
            .await
            .context("GET backpack markets")?
            .error_for_status()
            .context("backpack markets status")?
            .json()
            .await
            .context("parse backpack markets")?;

        let perp_symbols: Vec<String> = markets
            .into_iter()
            .map(|m| m.symbol)
            .filter(|s| s.ends_with("_USDC_PERP"))
            .collect();

        if perp_symbols.is_empty() {
            return Ok(Vec::new());
        }

        let fetches = perp_symbols
            .into_iter()
            .map(|symbol| self.fetch_symbol(symbol));
        let rates: Vec<NormalizedRate> = join_all(fetches).await.into_iter().flatten().collect();

        debug!(count = rates.len(), "Fetched backpack funding rates");
        Ok(rates)
    }
}
