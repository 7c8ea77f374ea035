//! Binance adapter: perpetual funding rates, spot prices and the spot-symbol
//! universe used to annotate snapshot batches.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{annualize_8h, default_client, RateAdapter, SpotAdapter, SpotUniverseSource};
use crate::models::{NormalizedRate, SpotQuote};

const FUNDING_API: &str = "https://fapi.binance.com/fapi/v1/premiumIndex";
const SPOT_API: &str = "https://api.binance.com/api/v3/ticker/24hr";
const EXCHANGE_INFO_API: &str = "https://api.binance.com/api/v3/exchangeInfo";

/// Perp pairs worth tracking, mapped to normalized symbols.
const FUNDING_SYMBOLS: [(&str, &str); 3] =
    [("BTCUSDT", "BTC"), ("ETHUSDT", "ETH"), ("SOLUSDT", "SOL")];

const SPOT_TARGETS: [&str; 3] = ["BTC", "ETH", "SOL"];

pub struct BinanceAdapter {
    client: Client,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        BinanceAdapter {
            client: default_client(),
        }
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct PremiumIndexEntry {
    symbol: String,
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: Option<String>,
    #[serde(rename = "markPrice")]
    mark_price: Option<String>,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Ticker24h {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: Option<String>,
    #[serde(rename = "quoteVolume")]
    quote_volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
struct ExchangeSymbol {
    #[serde(rename = "baseAsset")]
    base_asset: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
    status: String,
}

fn parse_funding(entries: Vec<PremiumIndexEntry>) -> Vec<NormalizedRate> {
    let mut rates = Vec::new();

    for entry in entries {
        let Some(symbol) = FUNDING_SYMBOLS
            .iter()
            .find(|(pair, _)| *pair == entry.symbol)
            .map(|(_, normalized)| *normalized)
        else {
            continue;
        };

        let Some(rate_8h) = entry.last_funding_rate.as_deref().and_then(|s| s.parse::<f64>().ok())
        else {
            continue;
        };

        let mut rate = NormalizedRate::new("binance", symbol);
        rate.rate_8h = Some(rate_8h);
        rate.annualized_rate = Some(annualize_8h(rate_8h));
        rate.mark_price = entry.mark_price.as_deref().and_then(|s| s.parse().ok());
        rate.next_funding_time = entry
            .next_funding_time
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        rate.interval_hours = Some(8.0);
        rates.push(rate);
    }

    rates
}

fn parse_spot(entries: Vec<Ticker24h>) -> Vec<SpotQuote> {
    let mut quotes = Vec::new();

    for entry in entries {
        let Some(base) = entry.symbol.strip_suffix("USDT") else {
            continue;
        };
        if !SPOT_TARGETS.contains(&base) {
            continue;
        }
        let Some(price) = entry.last_price.as_deref().and_then(|s| s.parse::<f64>().ok()) else {
            continue;
        };

        quotes.push(SpotQuote {
            symbol: base.to_string(),
            price,
            volume_24h: entry.quote_volume.as_deref().and_then(|s| s.parse().ok()),
        });
    }

    quotes
}

#[async_trait]
impl RateAdapter for BinanceAdapter {
    fn exchange(&self) -> &'static str {
        "binance"
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRate>> {
        let entries: Vec<PremiumIndexEntry> = self
            .client
            .get(FUNDING_API)
            .send()
            .await
            .context("GET binance premium index")?
            .error_for_status()
            .context("binance premium index status")?
            .json()
            .await
            .context("parse binance premium index")?;

        let rates = parse_funding(entries);
        debug!(count = rates.len(), "Fetched binance funding rates");
        Ok(rates)
    }
}

#[async_trait]
impl SpotAdapter for BinanceAdapter {
    fn exchange(&self) -> &'static str {
        "binance"
    }

    async fn fetch_spot(&self) -> Result<Vec<SpotQuote>> {
        let entries: Vec<Ticker24h> = self
            .client
            .get(SPOT_API)
            .send()
            .await
            .context("GET binance 24h tickers")?
            .error_for_status()
            .context("binance 24h ticker status")?
            .json()
            .await
            .context("parse binance 24h tickers")?;

        let quotes = parse_spot(entries);
        debug!(count = quotes.len(), "Fetched binance spot prices");
        Ok(quotes)
    }
}

#[async_trait]
impl SpotUniverseSource for BinanceAdapter {
    async fn fetch_symbols(&self) -> Result<HashSet<String>> {
        let info: ExchangeInfo = self
            .client
            .get(EXCHANGE_INFO_API)
            .send()
            .await
            .context("GET binance exchange info")?
            .error_for_status()
            .context("binance exchange info status")?
            .json()
            .await
            .context("parse binance exchange info")?;

        let symbols: HashSet<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.quote_asset == "USDT" && s.status == "TRADING")
            .map(|s| s.base_asset.to_uppercase())
            .collect();

        debug!(count = symbols.len(), "Fetched binance spot universe");
        Ok(symbols)
    }
}
