//! GRVT adapter. Both endpoints are batched POSTs, so the per-request
//! timeout is raised to 30 s. The 8h-average rate is preferred; the plain
//! `funding_rate` field is a fallback of undeclared periodicity and is
//! treated as 8h.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{annualize_8h, default_client, parse_funding_time, value_to_f64, RateAdapter};
use crate::models::NormalizedRate;

const INSTRUMENTS_API: &str = "https://market-data.grvt.io/full/v1/instruments";
const FUNDING_API: &str = "https://market-data.grvt.io/full/v1/funding";

const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GrvtAdapter {
    client: Client,
}

impl GrvtAdapter {
    pub fn new() -> Self {
        GrvtAdapter {
            client: default_client(),
        }
    }
}

impl Default for GrvtAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ResultList<T> {
    #[serde(default)]
    result: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct InstrumentEntry {
    instrument: Option<String>,
    base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FundingEntry {
    instrument: Option<String>,
    funding_rate: Option<Value>,
    #[serde(rename = "funding_rate_8_h_avg")]
    funding_rate_8h_avg: Option<Value>,
    mark_price: Option<Value>,
    next_funding_time: Option<Value>,
}

fn parse_rates(
    instruments: Vec<InstrumentEntry>,
    funding: Vec<FundingEntry>,
) -> Vec<NormalizedRate> {
    let instrument_map: HashMap<String, String> = instruments
        .into_iter()
        .filter_map(|entry| match (entry.instrument, entry.base) {
            (Some(id), Some(base)) if !base.is_empty() => Some((id, base.to_uppercase())),
            _ => None,
        })
        .collect();

    let mut rates = Vec::new();
    for entry in funding {
        let Some(symbol) = entry
            .instrument
            .as_ref()
            .and_then(|id| instrument_map.get(id))
        else {
            continue;
        };

        let rate_8h = entry
            .funding_rate_8h_avg
            .as_ref()
            .and_then(value_to_f64)
            .or_else(|| entry.funding_rate.as_ref().and_then(value_to_f64));
        let Some(rate_8h) = rate_8h else {
            continue;
        };

        let mut rate = NormalizedRate::new("grvt", symbol);
        rate.rate_8h = Some(rate_8h);
        rate.annualized_rate = Some(annualize_8h(rate_8h));
        rate.mark_price = entry.mark_price.as_ref().and_then(value_to_f64);
        rate.next_funding_time = entry.next_funding_time.as_ref().and_then(parse_funding_time);
        rate.interval_hours = Some(8.0);
        rates.push(rate);
    }

    rates
}

#[async_trait]
impl RateAdapter for GrvtAdapter {
    fn exchange(&self) -> &'static str {
        "grvt"
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRate>> {
        let instruments_req = self
            .client
            .post(INSTRUMENTS_API)
            .timeout(BATCH_TIMEOUT)
            .json(&serde_json::json!({
                "kind": ["PERPETUAL"],
                "quote": ["USDT"],
                "is_active": true,
            }))
            .send();
        let funding_req = self
            .client
            .post(FUNDING_API)
            .timeout(BATCH_TIMEOUT)
            .json(&serde_json::json!({
                "kind": ["PERPETUAL"],
                "quote": ["USDT"],
            }))
            .send();

        let (instruments_resp, funding_resp) =
            tokio::try_join!(instruments_req, funding_req).context("POST grvt endpoints")?;

        let instruments: ResultList<InstrumentEntry> = instruments_resp
            .error_for_status()
            .context("grvt instruments status")?
            .json()
            .await
            .context("parse grvt instruments")?;
        let funding: ResultList<FundingEntry> = funding_resp
            .error_for_status()
            .context("grvt funding status")?
            .json()
            .await
            .context("parse grvt funding")?;

        let rates = parse_rates(instruments.result, funding.result);
        debug!(count = rates.len(), "Fetched grvt funding rates");
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_8h_average_and_maps_instruments() {
        let instruments = vec![
            InstrumentEntry {
                instrument: Some("BTC_USDT_Perp".to_string()),
                base: Some("btc".to_string()),
            },
            InstrumentEntry {
                instrument: Some("ETH_USDT_Perp".to_string()),
                base: Some("eth".to_string()),
            },
        ];
        let funding = vec![
            FundingEntry {
                instrument: Some("BTC_USDT_Perp".to_string()),
                funding_rate: Some(json!("0.0005")),
                funding_rate_8h_avg: Some(json!("0.0001")),
                mark_price: Some(json!("50000")),
                next_funding_time: Some(json!("2026-01-02T03:00:00Z")),
            },
            FundingEntry {
                instrument: Some("ETH_USDT_Perp".to_string()),
                funding_rate: Some(json!("0.0002")),
                funding_rate_8h_avg: None, // falls back to funding_rate
                mark_price: None,
                next_funding_time: None,
            },
            FundingEntry {
                instrument: Some("UNKNOWN_Perp".to_string()), // no instrument mapping
                funding_rate: Some(json!("0.1")),
                funding_rate_8h_avg: None,
                mark_price: None,
                next_funding_time: None,
            },
        ];

        let rates = parse_rates(instruments, funding);
        assert_eq!(rates.len(), 2);

        let btc = rates.iter().find(|r| r.symbol == "BTC").unwrap();
        assert_eq!(btc.rate_8h, Some(0.0001));
        assert!(btc.next_funding_time.is_some());

        let eth = rates.iter().find(|r| r.symbol == "ETH").unwrap();
        assert_eq!(eth.rate_8h, Some(0.0002));
    }
}
