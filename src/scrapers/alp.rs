//! ALP hedge calculator: derives the short legs needed to hedge an ALP
//! holding from the pool's custody accounts.
//!
//! Per custody: `hedge = (owned - locked + short_oi) / total_supply ×
//! alp_amount`. JITOSOL exposure is converted to SOL via the pool oracle's
//! price ratio, and WBTC is reported as BTC.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::solana::{read_u64_le, SolanaRpc};
use super::HedgeAdapter;
use crate::models::HedgePosition;

const ALP_MINT: &str = "4yCLi5yWGzpTWMQ1iWHG5CrGYAdBkhyEdsuSugjDUqwj";
const ORACLE_ACCOUNT: &str = "GEm9TZP7BL8rTz1JDy6X74PL595zr1putA9BXC8ehDmU";

/// Custody layout: assets block then the short-position block.
const ASSETS_OFFSET: usize = 368;
const SHORT_POSITION_OFFSET: usize = 600;

const CUSTODY_ACCOUNTS: [(&str, &str, u32); 3] = [
    ("BONK", "9n5qQNwjnYH9763vF9LForC37XZhb7pDsMGBDKWLpump", 5),
    ("JITOSOL", "DzKfaYgdbuM8cHaJRrFF7EqB6fJ7Y8sjYLBmpYiH8NrW", 9),
    ("WBTC", "3FJuhXYYPn2PTpLBRzG8Ci8SDfDdJtGpTHS1g9k22nqr", 8),
];

/// Oracle account: 8-byte header then one u64 price (10 decimals) per slot.
const ORACLE_SYMBOL_OFFSETS: [(&str, usize); 4] =
    [("JITOSOL", 0), ("SOL", 1), ("BONK", 2), ("WBTC", 3)];

pub struct AlpHedgeAdapter {
    rpc: SolanaRpc,
}

impl AlpHedgeAdapter {
    pub fn new(rpc_url: &str) -> Self {
        AlpHedgeAdapter {
            rpc: SolanaRpc::new(rpc_url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CustodyExposure {
    pub owned: f64,
    pub locked: f64,
    pub short_oi: f64,
}

impl CustodyExposure {
    pub(crate) fn net(&self) -> f64 {
        self.owned - self.locked + self.short_oi
    }
}

/// Decode the assets and short-position fields out of a custody account.
pub(crate) fn parse_custody(data: &[u8], decimals: u32) -> Result<CustodyExposure> {
    let raw_owned = read_u64_le(data, ASSETS_OFFSET)?;
    let raw_locked = read_u64_le(data, ASSETS_OFFSET + 8)?;
    if raw_locked > raw_owned {
        bail!("invalid custody data: locked > owned");
    }

    let raw_short_sizes = read_u64_le(data, SHORT_POSITION_OFFSET)?;
    let raw_short_prices = read_u64_le(data, SHORT_POSITION_OFFSET + 8)?;

    let scale = 10f64.powi(decimals as i32);
    let short_oi = if raw_short_prices > 0 {
        raw_short_sizes as f64 / raw_short_prices as f64
    } else {
        0.0
    };

    Ok(CustodyExposure {
        owned: raw_owned as f64 / scale,
        locked: raw_locked as f64 / scale,
        short_oi,
    })
}

/// Oracle prices keyed by symbol; stored with 10 decimals after the header.
pub(crate) fn parse_oracle_prices(data: &[u8]) -> Result<BTreeMap<String, f64>> {
    let mut prices = BTreeMap::new();
    for (symbol, slot) in ORACLE_SYMBOL_OFFSETS {
        let raw = read_u64_le(data, 8 + slot * 8)?;
        prices.insert(symbol.to_string(), raw as f64 / 1e10);
    }
    Ok(prices)
}

#[async_trait]
impl HedgeAdapter for AlpHedgeAdapter {
    fn protocol(&self) -> &'static str {
        "alp"
    }

    async fn fetch_hedge(&self, lp_amount: f64) -> Result<BTreeMap<String, HedgePosition>> {
        let oracle_data = self
            .rpc
            .account_data(ORACLE_ACCOUNT)
            .await
            .context("fetch ALP oracle account")?;
        let prices = parse_oracle_prices(&oracle_data)?;

        let total_supply = self
            .rpc
            .token_supply(ALP_MINT)
            .await
            .context("fetch ALP supply")?;
        if total_supply <= 0.0 {
            bail!("invalid ALP total supply: {total_supply}");
        }

        let mut positions = BTreeMap::new();
        for (symbol, custody_addr, decimals) in CUSTODY_ACCOUNTS {
            let data = self
                .rpc
                .account_data(custody_addr)
                .await
                .with_context(|| format!("fetch ALP custody {symbol}"))?;
            let exposure = parse_custody(&data, decimals)?;

            let per_token = exposure.net() / total_supply;
            let amount = per_token * lp_amount;

            if symbol == "JITOSOL" {
                // Hedged on SOL perps: convert through the oracle price ratio.
                let jitosol = prices.get("JITOSOL").copied().unwrap_or(0.0);
                let sol = prices.get("SOL").copied().unwrap_or(0.0);
                if sol > 0.0 {
                    let sol_amount = amount * (jitosol / sol);
                    debug!(jitosol_amount = amount, sol_amount, "JITOSOL -> SOL");
                    positions.insert(
                        "SOL".to_string(),
                        HedgePosition {
                            amount: sol_amount,
                            per_token: sol_amount / lp_amount,
                        },
                    );
                }
            } else {
                let display_symbol = if symbol == "WBTC" { "BTC" } else { symbol };
                positions.insert(
                    display_symbol.to_string(),
                    HedgePosition { amount, per_token },
                );
            }
        }

        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custody_bytes(owned: u64, locked: u64, short_sizes: u64, short_prices: u64) -> Vec<u8> {
        let mut data = vec![0u8; SHORT_POSITION_OFFSET + 16];
        data[ASSETS_OFFSET..ASSETS_OFFSET + 8].copy_from_slice(&owned.to_le_bytes());
        data[ASSETS_OFFSET + 8..ASSETS_OFFSET + 16].copy_from_slice(&locked.to_le_bytes());
        data[SHORT_POSITION_OFFSET..SHORT_POSITION_OFFSET + 8]
            .copy_from_slice(&short_sizes.to_le_bytes());
        data[SHORT_POSITION_OFFSET + 8..SHORT_POSITION_OFFSET + 16]
            .copy_from_slice(&short_prices.to_le_bytes());
        data
    }

    #[test]
    fn custody_exposure_decodes_and_nets() {
        // 100.0 owned, 25.0 locked at 8 decimals; shorts 50/20 -> 2.5 OI.
        let data = custody_bytes(10_000_000_000, 2_500_000_000, 50, 20);
        let exposure = parse_custody(&data, 8).unwrap();

        assert_eq!(exposure.owned, 100.0);
        assert_eq!(exposure.locked, 25.0);
        assert_eq!(exposure.short_oi, 2.5);
        assert_eq!(exposure.net(), 77.5);
    }

    #[test]
    fn zero_short_prices_means_zero_oi() {
        let data = custody_bytes(1_000, 0, 999, 0);
        let exposure = parse_custody(&data, 2).unwrap();
        assert_eq!(exposure.short_oi, 0.0);
    }

    #[test]
    fn locked_exceeding_owned_is_rejected() {
        let data = custody_bytes(100, 200, 0, 0);
        assert!(parse_custody(&data, 2).is_err());
    }

    #[test]
    fn short_custody_data_is_rejected() {
        assert!(parse_custody(&[0u8; 64], 2).is_err());
    }

    #[test]
    fn oracle_prices_decode_per_slot() {
        let mut data = vec![0u8; 8 + 4 * 8];
        // JITOSOL slot 0 at 250.0, SOL slot 1 at 200.0 (10-decimal fixed).
        data[8..16].copy_from_slice(&2_500_000_000_000u64.to_le_bytes());
        data[16..24].copy_from_slice(&2_000_000_000_000u64.to_le_bytes());

        let prices = parse_oracle_prices(&data).unwrap();
        assert_eq!(prices["JITOSOL"], 250.0);
        assert_eq!(prices["SOL"], 200.0);
        assert_eq!(prices["BONK"], 0.0);
    }
}
