//! Funding-rate and spot-price series.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use super::{from_ts, to_ts, Store};
use crate::models::{FundingRate, NormalizedRate, SpotPrice, SpotQuote};

impl Store {
    /// Persist a normalized funding batch for one exchange. Entries missing a
    /// rate or annualized figure are skipped (malformed upstream records must
    /// not poison the rest of the batch). Returns the number stored.
    pub fn insert_funding_rates(&self, exchange: &str, rates: &[NormalizedRate]) -> Result<usize> {
        let now = to_ts(Utc::now());
        let mut conn = self.conn();
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let mut stored = 0usize;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO funding_rates (exchange, symbol, rate, annualized_rate, \
                                            mark_price, next_funding_time, timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for entry in rates {
                let (rate, annualized) = match (entry.rate_8h, entry.annualized_rate) {
                    (Some(r), Some(a)) => (r, a),
                    _ => {
                        tracing::warn!(
                            exchange,
                            symbol = %entry.symbol,
                            "Skipping funding entry without rate"
                        );
                        continue;
                    }
                };
                if entry.symbol.is_empty() {
                    continue;
                }

                stmt.execute(params![
                    exchange.to_lowercase(),
                    entry.symbol.to_uppercase(),
                    rate,
                    annualized,
                    entry.mark_price,
                    entry.next_funding_time.map(to_ts),
                    now,
                ])?;
                stored += 1;
            }
        }

        tx.commit().context("Failed to commit funding batch")?;
        Ok(stored)
    }

    pub fn latest_funding(&self, exchange: &str, symbol: &str) -> Result<Option<FundingRate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, exchange, symbol, rate, annualized_rate, mark_price, \
                    next_funding_time, timestamp \
             FROM funding_rates WHERE exchange = ?1 AND symbol = ?2 \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
        )?;

        let mut rows = stmt.query_map(
            params![exchange.to_lowercase(), symbol.to_uppercase()],
            row_to_funding,
        )?;
        Ok(rows.next().transpose()?)
    }

    /// Persist a spot batch for one exchange.
    pub fn insert_spot_prices(&self, exchange: &str, quotes: &[SpotQuote]) -> Result<usize> {
        let now = to_ts(Utc::now());
        let mut conn = self.conn();
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let mut stored = 0usize;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO spot_prices (exchange, symbol, price, volume_24h, timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for quote in quotes {
                if quote.symbol.is_empty() {
                    continue;
                }
                stmt.execute(params![
                    exchange.to_lowercase(),
                    quote.symbol.to_uppercase(),
                    quote.price,
                    quote.volume_24h,
                    now,
                ])?;
                stored += 1;
            }
        }

        tx.commit().context("Failed to commit spot batch")?;
        Ok(stored)
    }

    pub fn latest_spot(&self, exchange: &str, symbol: &str) -> Result<Option<SpotPrice>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, exchange, symbol, price, volume_24h, timestamp \
             FROM spot_prices WHERE exchange = ?1 AND symbol = ?2 \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
        )?;

        let mut rows = stmt.query_map(
            params![exchange.to_lowercase(), symbol.to_uppercase()],
            row_to_spot,
        )?;
        Ok(rows.next().transpose()?)
    }
}

fn row_to_funding(row: &Row<'_>) -> rusqlite::Result<FundingRate> {
    Ok(FundingRate {
        id: row.get(0)?,
        exchange: row.get(1)?,
        symbol: row.get(2)?,
        rate: row.get(3)?,
        annualized_rate: row.get(4)?,
        mark_price: row.get(5)?,
        next_funding_time: row.get::<_, Option<i64>>(6)?.map(from_ts),
        timestamp: from_ts(row.get(7)?),
    })
}

fn row_to_spot(row: &Row<'_>) -> rusqlite::Result<SpotPrice> {
    Ok(SpotPrice {
        id: row.get(0)?,
        exchange: row.get(1)?,
        symbol: row.get(2)?,
        price: row.get(3)?,
        volume_24h: row.get(4)?,
        timestamp: from_ts(row.get(5)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_store;

    #[test]
    fn funding_batch_skips_rateless_entries() {
        let (_dir, store) = temp_store();

        let mut good = NormalizedRate::new("Lighter", "btc");
        good.rate_8h = Some(0.0001);
        good.annualized_rate = Some(10.95);
        let bad = NormalizedRate::new("Lighter", "ETH"); // no rate

        let stored = store.insert_funding_rates("Lighter", &[good, bad]).unwrap();
        assert_eq!(stored, 1);

        // Exchange lowered, symbol uppered on the way in; lookups normalize too.
        let latest = store.latest_funding("LIGHTER", "btc").unwrap().unwrap();
        assert_eq!(latest.exchange, "lighter");
        assert_eq!(latest.symbol, "BTC");
        assert!((latest.annualized_rate - 10.95).abs() < 1e-9);
    }

    #[test]
    fn spot_latest_returns_newest() {
        let (_dir, store) = temp_store();

        store
            .insert_spot_prices(
                "binance",
                &[SpotQuote {
                    symbol: "SOL".to_string(),
                    price: 150.0,
                    volume_24h: Some(1e9),
                }],
            )
            .unwrap();
        store
            .insert_spot_prices(
                "binance",
                &[SpotQuote {
                    symbol: "SOL".to_string(),
                    price: 151.5,
                    volume_24h: None,
                }],
            )
            .unwrap();

        let latest = store.latest_spot("binance", "SOL").unwrap().unwrap();
        assert_eq!(latest.price, 151.5);
        assert!(store.latest_spot("binance", "DOGE").unwrap().is_none());
    }
}
