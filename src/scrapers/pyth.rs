//! Pyth Network oracle adapter: spot prices from the Hermes price feed,
//! decoded from the (mantissa, exponent) wire representation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{default_client, SpotAdapter};
use crate::models::SpotQuote;

const HERMES_API: &str = "https://hermes.pyth.network/v2/updates/price/latest";

/// Tracked price-feed ids mapped to display symbols.
const TARGET_FEEDS: [(&str, &str); 3] = [
    (
        "e62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43",
        "BTC",
    ),
    (
        "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace",
        "ETH",
    ),
    (
        "ef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d",
        "SOL",
    ),
];

pub struct PythAdapter {
    client: Client,
}

impl PythAdapter {
    pub fn new() -> Self {
        PythAdapter {
            client: default_client(),
        }
    }
}

impl Default for PythAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct HermesResponse {
    #[serde(default)]
    parsed: Vec<ParsedFeed>,
}

#[derive(Debug, Deserialize)]
struct ParsedFeed {
    id: Option<String>,
    price: Option<FeedPrice>,
}

#[derive(Debug, Deserialize)]
struct FeedPrice {
    price: Option<String>,
    #[serde(default)]
    expo: i32,
}

fn feed_symbol(id: &str) -> Option<&'static str> {
    let id = id.strip_prefix("0x").unwrap_or(id);
    TARGET_FEEDS
        .iter()
        .find(|(feed, _)| *feed == id)
        .map(|(_, symbol)| *symbol)
}

fn parse_feeds(resp: HermesResponse) -> Vec<SpotQuote> {
    let mut quotes = Vec::new();

    for feed in resp.parsed {
        let Some(symbol) = feed.id.as_deref().and_then(feed_symbol) else {
            continue;
        };
        let Some(price) = feed.price else {
            continue;
        };
        let Some(mantissa) = price.price.as_deref().and_then(|s| s.parse::<f64>().ok()) else {
            continue;
        };

        quotes.push(SpotQuote {
            symbol: symbol.to_string(),
            price: mantissa * 10f64.powi(price.expo),
            volume_24h: None,
        });
    }

    quotes
}

#[async_trait]
impl SpotAdapter for PythAdapter {
    fn exchange(&self) -> &'static str {
        "pyth"
    }

    async fn fetch_spot(&self) -> Result<Vec<SpotQuote>> {
        let ids: Vec<(&str, &str)> = TARGET_FEEDS.iter().map(|(feed, _)| ("ids[]", *feed)).collect();
        let resp: HermesResponse = self
            .client
            .get(HERMES_API)
            .query(&ids)
            .send()
            .await
            .context("GET pyth hermes prices")?
            .error_for_status()
            .context("pyth hermes status")?
            .json()
            .await
            .context("parse pyth hermes prices")?;

        let quotes = parse_feeds(resp);
        debug!(count = quotes.len(), "Fetched pyth spot prices");
        Ok(quotes)
    }
}
