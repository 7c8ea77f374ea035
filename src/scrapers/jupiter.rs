//! Jupiter adapter (Solana DEX aggregator): spot prices by token mint.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{default_client, value_to_f64, SpotAdapter};
use crate::models::SpotQuote;

const PRICE_API: &str = "https://price.jup.ag/v4/price";

/// Tracked token mints mapped to display symbols.
const TARGET_TOKENS: [(&str, &str); 2] = [
    ("So11111111111111111111111111111111111111112", "SOL"),
    ("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "USDC"),
];

pub struct JupiterAdapter {
    client: Client,
}

impl JupiterAdapter {
    pub fn new() -> Self {
        JupiterAdapter {
            client: default_client(),
        }
    }
}

impl Default for JupiterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    data: HashMap<String, PriceEntry>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    price: Option<Value>,
}

fn parse_prices(resp: PriceResponse) -> Vec<SpotQuote> {
    let mut quotes = Vec::new();

    for (mint, symbol) in TARGET_TOKENS {
        let Some(entry) = resp.data.get(mint) else {
            continue;
        };
        let Some(price) = entry.price.as_ref().and_then(value_to_f64) else {
            continue;
        };
        quotes.push(SpotQuote {
            symbol: symbol.to_string(),
            price,
            volume_24h: None,
        });
    }

    quotes
}

#[async_trait]
impl SpotAdapter for JupiterAdapter {
    fn exchange(&self) -> &'static str {
        "jupiter"
    }

    async fn fetch_spot(&self) -> Result<Vec<SpotQuote>> {
        let ids: Vec<&str> = TARGET_TOKENS.iter().map(|(mint, _)| *mint).collect();
        let resp: PriceResponse = self
            .client
            .get(PRICE_API)
            .query(&[("ids", ids.join(","))])
            .send()
            .await
            .context("GET jupiter prices")?
            .error_for_status()
            .context("jupiter price status")?
            .json()
            .await
            .context("parse jupiter prices")?;

        let quotes = parse_prices(resp);
        debug!(count = quotes.len(), "Fetched jupiter spot prices");
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_mints_to_symbols() {
        let mut data = HashMap::new();
        data.insert(
            "So11111111111111111111111111111111111111112".to_string(),
            PriceEntry { price: Some(json!(150.25)) },
        );
        data.insert(
            "UnknownMint".to_string(),
            PriceEntry { price: Some(json!(1.0)) },
        );

        let quotes = parse_prices(PriceResponse { data });
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "SOL");
        assert_eq!(quotes[0].price, 150.25);
    }
}
