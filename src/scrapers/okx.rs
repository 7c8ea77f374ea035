//! OKX adapter: spot prices via the v5 ticker endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{default_client, SpotAdapter};
use crate::models::SpotQuote;

const TICKERS_API: &str = "https://www.okx.com/api/v5/market/tickers";

const SPOT_TARGETS: [&str; 3] = ["BTC", "ETH", "SOL"];

pub struct OkxAdapter {
    client: Client,
}

impl OkxAdapter {
    pub fn new() -> Self {
        OkxAdapter {
            client: default_client(),
        }
    }
}

impl Default for OkxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    code: String,
    msg: Option<String>,
    #[serde(default)]
    data: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    #[serde(rename = "instId", default)]
    inst_id: String,
    last: Option<String>,
    #[serde(rename = "volCcy24h")]
    vol_ccy_24h: Option<String>,
}

fn parse_spot(entries: Vec<TickerEntry>) -> Vec<SpotQuote> {
    let mut quotes = Vec::new();

    for entry in entries {
        let Some(base) = entry.inst_id.strip_suffix("-USDT") else {
            continue;
        };
        if !SPOT_TARGETS.contains(&base) {
            continue;
        }
        let Some(price) = entry.last.as_deref().and_then(|s| s.parse::<f64>().ok()) else {
            continue;
        };

        quotes.push(SpotQuote {
            symbol: base.to_string(),
            price,
            volume_24h: entry.vol_ccy_24h.as_deref().and_then(|s| s.parse().ok()),
        });
    }

    quotes
}

#[async_trait]
impl SpotAdapter for OkxAdapter {
    fn exchange(&self) -> &'static str {
        "okx"
    }

    async fn fetch_spot(&self) -> Result<Vec<SpotQuote>> {
        let resp: TickersResponse = self
            .client
            .get(TICKERS_API)
            .query(&[("instType", "SPOT")])
            .send()
            .await
            .context("GET okx tickers")?
            .error_for_status()
            .context("okx ticker status")?
            .json()
            .await
            .context("parse okx tickers")?;

        if resp.code != "0" {
            bail!("okx API error {}: {}", resp.code, resp.msg.unwrap_or_default());
        }

        let quotes = parse_spot(resp.data);
        debug!(count = quotes.len(), "Fetched okx spot prices");
        Ok(quotes)
    }
}
