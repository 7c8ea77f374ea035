//! Lighter adapter: funding rates plus read-only account snapshots
//! (collateral, unrealized PnL and signed positions by L1 address).

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    annualize_8h, default_client, value_to_f64, AccountAdapter, RateAdapter, POSITION_DUST,
};
use crate::models::{AccountData, NormalizedRate};

const FUNDING_API: &str = "https://mainnet.zklighter.elliot.ai/api/v1/funding-rates";
const ACCOUNT_API: &str = "https://mainnet.zklighter.elliot.ai/api/v1/account";

const TARGET_SYMBOLS: [&str; 3] = ["BTC", "ETH", "SOL"];

pub struct LighterAdapter {
    client: Client,
}

impl LighterAdapter {
    pub fn new() -> Self {
        LighterAdapter {
            client: default_client(),
        }
    }
}

impl Default for LighterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct FundingResponse {
    #[serde(default)]
    funding_rates: Vec<FundingEntry>,
}

#[derive(Debug, Deserialize)]
struct FundingEntry {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    exchange: String,
    rate: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    accounts: Vec<AccountEntry>,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    collateral: Option<Value>,
    #[serde(default)]
    positions: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
struct PositionEntry {
    #[serde(default)]
    symbol: String,
    position: Option<Value>,
    unrealized_pnl: Option<Value>,
    /// 1 for long, -1 for short.
    sign: Option<i64>,
}

fn parse_funding(resp: FundingResponse) -> Vec<NormalizedRate> {
    let mut rates = Vec::new();

    for entry in resp.funding_rates {
        // The feed aggregates several venues; only lighter's own rows count.
        if entry.exchange.to_lowercase() != "lighter" {
            continue;
        }
        let symbol = entry.symbol.to_uppercase();
        if !TARGET_SYMBOLS.contains(&symbol.as_str()) {
            continue;
        }
        let Some(rate_8h) = entry.rate.as_ref().and_then(value_to_f64) else {
            continue;
        };

        let mut rate = NormalizedRate::new("lighter", &symbol);
        rate.rate_8h = Some(rate_8h);
        rate.annualized_rate = Some(annualize_8h(rate_8h));
        rate.interval_hours = Some(8.0);
        rates.push(rate);
    }

    rates
}

fn parse_account(resp: AccountResponse) -> Result<AccountData> {
    let Some(account) = resp.accounts.into_iter().next() else {
        bail!("lighter account response contained no accounts");
    };

    let collateral = account
        .collateral
        .as_ref()
        .and_then(value_to_f64)
        .unwrap_or(0.0);

    let mut total_unrealized = 0.0;
    let mut positions: BTreeMap<String, f64> = BTreeMap::new();

    for position in account.positions {
        if let Some(pnl) = position.unrealized_pnl.as_ref().and_then(value_to_f64) {
            total_unrealized += pnl;
        }

        let Some(size) = position.position.as_ref().and_then(value_to_f64) else {
            continue;
        };
        let signed = match position.sign {
            Some(s) if s < 0 => -size.abs(),
            _ => size,
        };
        if signed.abs() < POSITION_DUST {
            continue;
        }
        positions.insert(position.symbol.to_uppercase(), signed);
    }

    Ok(AccountData {
        account_value: collateral + total_unrealized,
        positions,
    })
}

#[async_trait]
impl RateAdapter for LighterAdapter {
    fn exchange(&self) -> &'static str {
        "lighter"
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRate>> {
        let resp: FundingResponse = self
            .client
            .get(FUNDING_API)
            .header("Accept", "application/json")
            .send()
            .await
            .context("GET lighter funding rates")?
            .error_for_status()
            .context("lighter funding status")?
            .json()
            .await
            .context("parse lighter funding rates")?;

        let rates = parse_funding(resp);
        debug!(count = rates.len(), "Fetched lighter funding rates");
        Ok(rates)
    }
}

#[async_trait]
impl AccountAdapter for LighterAdapter {
    fn exchange(&self) -> &'static str {
        "lighter"
    }

    async fn fetch_account(&self, address: &str, label: &str) -> Result<AccountData> {
        let resp: AccountResponse = self
            .client
            .get(ACCOUNT_API)
            .query(&[("by", "l1_address"), ("value", address)])
            .send()
            .await
            .with_context(|| format!("GET lighter account {label}"))?
            .error_for_status()
            .context("lighter account status")?
            .json()
            .await
            .context("parse lighter account")?;

        let data = parse_account(resp)?;
        debug!(
            label,
            account_value = data.account_value,
            positions = data.positions.len(),
            "Fetched lighter account"
        );
        Ok(data)
    }
}
