//! Aster adapter. Funding periodicity varies per symbol; the funding-info
//! endpoint supplies the interval used to scale each rate to the 8-hour
//! basis.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    annualize_8h, default_client, normalize_symbol, parse_funding_time, scale_to_8h, value_to_f64,
    RateAdapter,
};
use crate::models::NormalizedRate;

const PREMIUM_API: &str = "https://api.prod.aster.app/v1/premium-index";
const FUNDING_INFO_API: &str = "https://api.prod.aster.app/v1/funding-info";

pub struct AsterAdapter {
    client: Client,
}

impl AsterAdapter {
    pub fn new() -> Self {
        AsterAdapter {
            client: default_client(),
        }
    }
}

impl Default for AsterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct PremiumEntry {
    #[serde(default)]
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: Option<Value>,
    #[serde(rename = "markPrice")]
    mark_price: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FundingInfoEntry {
    #[serde(default)]
    symbol: String,
    #[serde(rename = "fundingIntervalHours")]
    funding_interval_hours: Option<f64>,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: Option<Value>,
}

fn parse_rates(premium: Vec<PremiumEntry>, info: Vec<FundingInfoEntry>) -> Vec<NormalizedRate> {
    let mut interval_map: HashMap<String, f64> = HashMap::new();
    let mut next_funding_map: HashMap<String, Value> = HashMap::new();
    for entry in info {
        let symbol = entry.symbol.to_uppercase();
        if symbol.is_empty() {
            continue;
        }
        interval_map.insert(symbol.clone(), entry.funding_interval_hours.unwrap_or(8.0));
        if let Some(next) = entry.next_funding_time {
            next_funding_map.insert(symbol, next);
        }
    }

    let mut rates = Vec::new();
    for entry in premium {
        let symbol = entry.symbol.to_uppercase();
        if symbol.is_empty() {
            continue;
        }
        let Some(raw_rate) = entry.funding_rate.as_ref().and_then(value_to_f64) else {
            continue;
        };

        let interval_hours = interval_map.get(&symbol).copied().unwrap_or(8.0);
        let rate_8h = scale_to_8h(raw_rate, interval_hours);

        let mut rate = NormalizedRate::new("aster", &normalize_symbol(&symbol));
        rate.rate_8h = Some(rate_8h);
        rate.annualized_rate = Some(annualize_8h(rate_8h));
        rate.mark_price = entry.mark_price.as_ref().and_then(value_to_f64);
        rate.next_funding_time = next_funding_map.get(&symbol).and_then(parse_funding_time);
        rate.interval_hours = Some(interval_hours);
        rates.push(rate);
    }

    rates
}

#[async_trait]
impl RateAdapter for AsterAdapter {
    fn exchange(&self) -> &'static str {
        "aster"
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRate>> {
        let premium_req = self
            .client
            .get(PREMIUM_API)
            .header("Accept", "application/json")
            .send();
        let info_req = self
            .client
            .get(FUNDING_INFO_API)
            .header("Accept", "application/json")
            .send();

        let (premium_resp, info_resp) =
            tokio::try_join!(premium_req, info_req).context("GET aster endpoints")?;

        let premium: Vec<PremiumEntry> = premium_resp
            .error_for_status()
            .context("aster premium status")?
            .json()
            .await
            .context("parse aster premium index")?;
        let info: Vec<FundingInfoEntry> = info_resp
            .error_for_status()
            .context("aster funding info status")?
            .json()
            .await
            .context("parse aster funding info")?;

        let rates = parse_rates(premium, info);
        debug!(count = rates.len(), "Fetched aster funding rates");
        Ok(rates)
    }
}
