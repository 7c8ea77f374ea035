//! JLP hedge calculator: derives the short legs needed to hedge a JLP
//! holding from the pool's custody accounts.
//!
//! Per custody: `hedge = (owned - locked + short_oi + fees × 0.75) /
//! total_supply × jlp_amount`. Stablecoin custodies carry no price exposure
//! and are skipped.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::solana::{read_u64_le, SolanaRpc};
use super::HedgeAdapter;
use crate::models::HedgePosition;

const JLP_MINT: &str = "27G8MtK7VtTcCHkpASjSDdkWWYfoqT6ggEuKidVJidD4";

/// Custody assets block: fees, owned, locked, then short sizes/prices.
const ASSETS_OFFSET: usize = 214;

/// Share of accrued fees belonging to LPs.
const FEES_USER_SHARE: f64 = 0.75;

const CUSTODY_ACCOUNTS: [(&str, &str, u32); 5] = [
    ("SOL", "7xS2gz2bTp3fwCC7knJvUWTEU9Tycczu6VhJYKgi1wdz", 9),
    ("ETH", "AQCGyheWPLeo6Qp9WpYS9m3Qj479t7R636N9ey1rEjEn", 8),
    ("WBTC", "5Pv3gM9JrFFH883SWAhvJC9RPYmo8UNxuFtv5bMMALkm", 8),
    ("USDC", "G18jKKXQwBbrHeiK3C9MRXhkHsLHf7XgCSisykV46EZa", 6),
    ("USDT", "4vkNeXiYEUizLdrpdPS1eC2mccyM4NUPRtERrk6ZETkk", 6),
];

const STABLECOINS: [&str; 2] = ["USDC", "USDT"];

pub struct JlpHedgeAdapter {
    rpc: SolanaRpc,
}

impl JlpHedgeAdapter {
    pub fn new(rpc_url: &str) -> Self {
        JlpHedgeAdapter {
            rpc: SolanaRpc::new(rpc_url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct JlpExposure {
    pub fees: f64,
    pub owned: f64,
    pub locked: f64,
    pub short_oi: f64,
}

impl JlpExposure {
    pub(crate) fn net(&self) -> f64 {
        self.owned - self.locked + self.short_oi + self.fees
    }
}

/// Decode the assets block: fees, owned, locked, then (one u64 later) the
/// short sizes and prices.
pub(crate) fn parse_custody(data: &[u8], decimals: u32) -> Result<JlpExposure> {
    let raw_fees = read_u64_le(data, ASSETS_OFFSET)?;
    let raw_owned = read_u64_le(data, ASSETS_OFFSET + 8)?;
    let raw_locked = read_u64_le(data, ASSETS_OFFSET + 16)?;
    let raw_short_sizes = read_u64_le(data, ASSETS_OFFSET + 32)?;
    let raw_short_prices = read_u64_le(data, ASSETS_OFFSET + 40)?;

    if raw_locked > raw_owned {
        bail!("invalid custody data: locked > owned");
    }

    let scale = 10f64.powi(decimals as i32);
    let short_oi = if raw_short_prices > 0 {
        raw_short_sizes as f64 / raw_short_prices as f64
    } else {
        0.0
    };

    Ok(JlpExposure {
        fees: (raw_fees as f64 / scale) * FEES_USER_SHARE,
        owned: raw_owned as f64 / scale,
        locked: raw_locked as f64 / scale,
        short_oi,
    })
}

#[async_trait]
impl HedgeAdapter for JlpHedgeAdapter {
    fn protocol(&self) -> &'static str {
        "jlp"
    }

    async fn fetch_hedge(&self, lp_amount: f64) -> Result<BTreeMap<String, HedgePosition>> {
        let total_supply = self
            .rpc
            .token_supply(JLP_MINT)
            .await
            .context("fetch JLP supply")?;
        if total_supply <= 0.0 {
            bail!("invalid JLP total supply: {total_supply}");
        }

        let mut positions = BTreeMap::new();
        for (symbol, custody_addr, decimals) in CUSTODY_ACCOUNTS {
            if STABLECOINS.contains(&symbol) {
                continue;
            }

            let data = self
                .rpc
                .account_data(custody_addr)
                .await
                .with_context(|| format!("fetch JLP custody {symbol}"))?;
            let exposure = parse_custody(&data, decimals)?;

            let per_token = exposure.net() / total_supply;
            let display_symbol = if symbol == "WBTC" { "BTC" } else { symbol };
            positions.insert(
                display_symbol.to_string(),
                HedgePosition {
                    amount: per_token * lp_amount,
                    per_token,
                },
            );
        }

        Ok(positions)
    }
}
