//! Bybit adapter: linear-perp funding rates and spot prices via the v5
//! unified ticker endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{annualize_8h, default_client, parse_funding_time, RateAdapter, SpotAdapter};
use crate::models::{NormalizedRate, SpotQuote};

const TICKERS_API: &str = "https://api.bybit.com/v5/market/tickers";

const SPOT_TARGETS: [&str; 3] = ["BTC", "ETH", "SOL"];

pub struct BybitAdapter {
    client: Client,
}

impl BybitAdapter {
    pub fn new() -> Self {
        BybitAdapter {
            client: default_client(),
        }
    }

    async fn fetch_tickers(&self, category: &str) -> Result<Vec<TickerEntry>> {
        let resp: TickersResponse = self
            .client
            .get(TICKERS_API)
            .query(&[("category", category)])
            .send()
            .await
            .with_context(|| format!("GET bybit {category} tickers"))?
            .error_for_status()
            .context("bybit ticker status")?
            .json()
            .await
            .context("parse bybit tickers")?;

        if resp.ret_code != 0 {
            bail!(
                "bybit API error {}: {}",
                resp.ret_code,
                resp.ret_msg.unwrap_or_default()
            );
        }

        Ok(resp.result.map(|r| r.list).unwrap_or_default())
    }
}

impl Default for BybitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: Option<String>,
    result: Option<TickersResult>,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    #[serde(default)]
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: Option<String>,
    #[serde(rename = "markPrice")]
    mark_price: Option<String>,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: Option<String>,
    #[serde(rename = "lastPrice")]
    last_price: Option<String>,
    #[serde(rename = "turnover24h")]
    turnover_24h: Option<String>,
}

fn parse_funding(entries: Vec<TickerEntry>) -> Vec<NormalizedRate> {
    let mut rates = Vec::new();

    for entry in entries {
        let Some(base) = entry.symbol.strip_suffix("USDT") else {
            continue;
        };
        let Some(rate_8h) = entry
            .funding_rate
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
        else {
            continue;
        };

        let mut rate = NormalizedRate::new("bybit", base);
        rate.rate_8h = Some(rate_8h);
        rate.annualized_rate = Some(annualize_8h(rate_8h));
        rate.mark_price = entry.mark_price.as_deref().and_then(|s| s.parse().ok());
        rate.next_funding_time = entry
            .next_funding_time
            .as_deref()
            .and_then(|s| parse_funding_time(&serde_json::Value::String(s.to_string())));
        rate.turnover_24h = entry.turnover_24h.as_deref().and_then(|s| s.parse().ok());
        rate.interval_hours = Some(8.0);
        rates.push(rate);
    }

    rates
}

fn parse_spot(entries: Vec<TickerEntry>) -> Vec<SpotQuote> {
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
            volume_24h: entry.turnover_24h.as_deref().and_then(|s| s.parse().ok()),
        });
    }

    quotes
}

#[async_trait]
impl RateAdapter for BybitAdapter {
    fn exchange(&self) -> &'static str {
        "bybit"
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRate>> {
        let rates = parse_funding(self.fetch_tickers("linear").await?);
        debug!(count = rates.len(), "Fetched bybit funding rates");
        Ok(rates)
    }
}

#[async_trait]
impl SpotAdapter for BybitAdapter {
    fn exchange(&self) -> &'static str {
        "bybit"
    }

    async fn fetch_spot(&self) -> Result<Vec<SpotQuote>> {
        let quotes = parse_spot(self.fetch_tickers("spot").await?);
        debug!(count = quotes.len(), "Fetched bybit spot prices");
        Ok(quotes)
    }
}
