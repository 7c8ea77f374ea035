//! Hyperliquid adapter. Funding is quoted hourly; rates are scaled to the
//! 8-hour basis on the way out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{annualize_1h, default_client, RateAdapter};
use crate::models::NormalizedRate;

const INFO_API: &str = "https://api.hyperliquid.xyz/info";

pub struct HyperliquidAdapter {
    client: Client,
}

impl HyperliquidAdapter {
    pub fn new() -> Self {
        HyperliquidAdapter {
            client: default_client(),
        }
    }
}

impl Default for HyperliquidAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    universe: Vec<UniverseEntry>,
}

#[derive(Debug, Deserialize)]
struct UniverseEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AssetCtx {
    funding: Option<String>,
    #[serde(rename = "markPx")]
    mark_px: Option<String>,
}

/// The info endpoint answers `[meta, assetCtxs]` with the contexts aligned to
/// `meta.universe` by index.
fn parse_rates(meta: Meta, ctxs: Vec<AssetCtx>) -> Vec<NormalizedRate> {
    let mut rates = Vec::new();

    for (entry, ctx) in meta.universe.into_iter().zip(ctxs) {
        let Some(rate_1h) = ctx.funding.as_deref().and_then(|s| s.parse::<f64>().ok()) else {
            continue;
        };

        let mut rate = NormalizedRate::new("hyperliquid", &entry.name);
        rate.rate_8h = Some(rate_1h * 8.0);
        rate.annualized_rate = Some(annualize_1h(rate_1h));
        rate.mark_price = ctx.mark_px.as_deref().and_then(|s| s.parse().ok());
        rate.interval_hours = Some(1.0);
        rates.push(rate);
    }

    rates
}

#[async_trait]
impl RateAdapter for HyperliquidAdapter {
    fn exchange(&self) -> &'static str {
        "hyperliquid"
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRate>> {
        let (meta, ctxs): (Meta, Vec<AssetCtx>) = self
            .client
            .post(INFO_API)
            .json(&serde_json::json!({"type": "metaAndAssetCtxs"}))
            .send()
            .await
            .context("POST hyperliquid info")?
            .error_for_status()
            .context("hyperliquid info status")?
            .json()
            .await
            .context("parse hyperliquid info")?;

        let rates = parse_rates(meta, ctxs);
        debug!(count = rates.len(), "Fetched hyperliquid funding rates");
        Ok(rates)
    }
}
