//! Concrete poll tasks wrapping the adapters and the engines.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::PollTask;
use crate::alerts::{AlertEngine, HeartbeatChecker};
use crate::config::AccountRef;
use crate::formula::FormulaEngine;
use crate::models::{NewSample, NormalizedRate};
use crate::scrapers::{AccountAdapter, HedgeAdapter, RateAdapter, SpotAdapter};
use crate::store::Store;

/// Batches with volume data are capped to this many entries.
pub const TOP_N_LIMIT: usize = 50;

fn volume_key(rate: &NormalizedRate) -> f64 {
    rate.turnover_24h.or(rate.volume_24h).unwrap_or(0.0)
}

/// Keep the top `limit` entries by turnover (falling back to volume) when the
/// batch carries volume data and exceeds the cap; pass through unchanged
/// otherwise. The sort is stable, so ties keep their input order.
pub fn filter_top_by_volume(rates: Vec<NormalizedRate>, limit: usize) -> Vec<NormalizedRate> {
    if rates.len() <= limit {
        return rates;
    }
    let has_volume = rates
        .iter()
        .any(|r| r.volume_24h.is_some() || r.turnover_24h.is_some());
    if !has_volume {
        return rates;
    }

    let mut rates = rates;
    rates.sort_by(|a, b| {
        volume_key(b)
            .partial_cmp(&volume_key(a))
            .unwrap_or(Ordering::Equal)
    });
    rates.truncate(limit);
    rates
}

/// One funding poller per exchange adapter.
pub struct FundingPoller {
    adapter: Arc<dyn RateAdapter>,
    store: Arc<Store>,
    interval: Duration,
}

impl FundingPoller {
    pub fn new(adapter: Arc<dyn RateAdapter>, store: Arc<Store>, interval: Duration) -> Self {
        FundingPoller {
            adapter,
            store,
            interval,
        }
    }
}

#[async_trait]
impl PollTask for FundingPoller {
    fn name(&self) -> String {
        format!("{} funding", self.adapter.exchange())
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        let exchange = self.adapter.exchange();
        let rates = self.adapter.fetch_snapshot().await?;

        if rates.is_empty() {
            warn!(exchange, "No funding rates fetched");
            return Ok(());
        }

        let fetched = rates.len();
        let filtered = filter_top_by_volume(rates, TOP_N_LIMIT);
        if filtered.len() < fetched {
            info!(
                exchange,
                fetched,
                kept = filtered.len(),
                "Filtered to top {} by volume",
                TOP_N_LIMIT
            );
        }

        let stored = self.store.insert_funding_rates(exchange, &filtered)?;
        info!(exchange, stored, "Stored funding rates");
        Ok(())
    }
}

/// One spot poller per exchange adapter.
pub struct SpotPoller {
    adapter: Arc<dyn SpotAdapter>,
    store: Arc<Store>,
    interval: Duration,
}

impl SpotPoller {
    pub fn new(adapter: Arc<dyn SpotAdapter>, store: Arc<Store>, interval: Duration) -> Self {
        SpotPoller {
            adapter,
            store,
            interval,
        }
    }
}

#[async_trait]
impl PollTask for SpotPoller {
    fn name(&self) -> String {
        format!("{} spot", self.adapter.exchange())
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        let exchange = self.adapter.exchange();
        let quotes = self.adapter.fetch_spot().await?;

        if quotes.is_empty() {
            warn!(exchange, "No spot prices fetched");
            return Ok(());
        }

        let stored = self.store.insert_spot_prices(exchange, &quotes)?;
        debug!(exchange, stored, "Stored spot prices");
        Ok(())
    }
}

/// Polls configured on-chain accounts and lands balances/positions in the
/// sample series so formulas can reference them like any webhook source.
pub struct AccountPoller {
    adapter: Arc<dyn AccountAdapter>,
    store: Arc<Store>,
    accounts: Vec<AccountRef>,
    interval: Duration,
}

impl AccountPoller {
    pub fn new(
        adapter: Arc<dyn AccountAdapter>,
        store: Arc<Store>,
        accounts: Vec<AccountRef>,
        interval: Duration,
    ) -> Self {
        AccountPoller {
            adapter,
            store,
            accounts,
            interval,
        }
    }

    fn store_account(&self, label: &str, data: &crate::models::AccountData) -> Result<()> {
        self.store.insert_sample(&NewSample::value_only(
            &format!("{label}_account_value"),
            &format!("{label} Account Value"),
            data.account_value,
            Some("$"),
        ))?;

        for (symbol, size) in &data.positions {
            self.store.insert_sample(&NewSample::value_only(
                &format!("{label}_{symbol}_position"),
                &format!("{label} {symbol} Position"),
                *size,
                Some(symbol),
            ))?;
        }

        info!(
            label,
            account_value = data.account_value,
            positions = data.positions.len(),
            "Stored account snapshot"
        );
        Ok(())
    }
}

#[async_trait]
impl PollTask for AccountPoller {
    fn name(&self) -> String {
        format!("{} accounts", self.adapter.exchange())
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        for account in &self.accounts {
            match self
                .adapter
                .fetch_account(&account.address, &account.label)
                .await
            {
                Ok(data) => {
                    if let Err(e) = self.store_account(&account.label, &data) {
                        warn!(label = %account.label, error = %e, "Failed to store account data");
                    }
                }
                // One sick account must not starve its siblings.
                Err(e) => warn!(label = %account.label, error = %e, "Account fetch failed"),
            }
        }
        Ok(())
    }
}

/// Recomputes the hedge legs required for a configured LP holding and lands
/// them in the sample series as `{protocol}_hedge_{SYMBOL}` rows, so they can
/// be charted and referenced like any webhook source.
pub struct HedgePoller {
    adapter: Arc<dyn HedgeAdapter>,
    store: Arc<Store>,
    lp_amount: f64,
    interval: Duration,
}

impl HedgePoller {
    pub fn new(
        adapter: Arc<dyn HedgeAdapter>,
        store: Arc<Store>,
        lp_amount: f64,
        interval: Duration,
    ) -> Self {
        HedgePoller {
            adapter,
            store,
            lp_amount,
            interval,
        }
    }
}

#[async_trait]
impl PollTask for HedgePoller {
    fn name(&self) -> String {
        format!("{} hedge calculator", self.adapter.protocol())
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        let protocol = self.adapter.protocol();

        if self.lp_amount <= 0.0 {
            debug!(protocol, "LP amount is 0, skipping hedge calculation");
            return Ok(());
        }

        let positions = self.adapter.fetch_hedge(self.lp_amount).await?;
        if positions.is_empty() {
            warn!(protocol, "No hedge positions calculated");
            return Ok(());
        }

        let upper = protocol.to_uppercase();
        let mut stored = 0usize;
        for (symbol, position) in &positions {
            self.store.insert_sample(&NewSample::value_only(
                &format!("{protocol}_hedge_{symbol}"),
                &format!("{upper} {symbol} Hedge"),
                position.amount,
                Some(symbol),
            ))?;
            stored += 1;

            info!(
                protocol,
                symbol = %symbol,
                amount = format!("{:+.8}", position.amount),
                per_token = format!("{:.10}", position.per_token),
                "Hedge position"
            );
        }

        info!(protocol, stored, "Stored hedge positions");
        Ok(())
    }
}

/// Periodic safety-net recompute of every enabled monitor, independent of
/// event-driven recomputes.
pub struct RecomputeSweep {
    engine: Arc<FormulaEngine>,
    interval: Duration,
}

impl RecomputeSweep {
    pub fn new(engine: Arc<FormulaEngine>, interval: Duration) -> Self {
        RecomputeSweep { engine, interval }
    }
}

#[async_trait]
impl PollTask for RecomputeSweep {
    fn name(&self) -> String {
        "monitor recompute".to_string()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        let computed = self.engine.recompute_all();
        debug!(computed, "Recompute sweep finished");
        Ok(())
    }
}

pub struct AlertTick {
    engine: Arc<AlertEngine>,
    interval: Duration,
}

impl AlertTick {
    pub fn new(engine: Arc<AlertEngine>, interval: Duration) -> Self {
        AlertTick { engine, interval }
    }
}

#[async_trait]
impl PollTask for AlertTick {
    fn name(&self) -> String {
        "alert checker".to_string()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        self.engine.tick(Utc::now()).await
    }
}

pub struct HeartbeatTick {
    checker: Arc<HeartbeatChecker>,
    interval: Duration,
}

impl HeartbeatTick {
    pub fn new(checker: Arc<HeartbeatChecker>, interval: Duration) -> Self {
        HeartbeatTick { checker, interval }
    }
}

#[async_trait]
impl PollTask for HeartbeatTick {
    fn name(&self) -> String {
        "heartbeat checker".to_string()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        self.checker.tick(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HedgePosition;
    use crate::store::test_util::temp_store;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    fn rate(symbol: &str, turnover: Option<f64>, volume: Option<f64>) -> NormalizedRate {
        let mut r = NormalizedRate::new("test", symbol);
        r.rate_8h = Some(0.0001);
        r.annualized_rate = Some(10.95);
        r.turnover_24h = turnover;
        r.volume_24h = volume;
        r
    }

    #[test]
    fn top_n_keeps_largest_by_turnover() {
        // 80 entries with distinct turnover, limit 50: the 50 largest survive.
        let rates: Vec<NormalizedRate> = (0..80)
            .map(|i| rate(&format!("S{i}"), Some(i as f64), None))
            .collect();

        let filtered = filter_top_by_volume(rates, 50);
        assert_eq!(filtered.len(), 50);
        let min_kept = filtered
            .iter()
            .map(|r| r.turnover_24h.unwrap())
            .fold(f64::INFINITY, f64::min);
        assert_eq!(min_kept, 30.0);
    }

    #[test]
    fn top_n_ties_break_by_input_order() {
        let mut rates: Vec<NormalizedRate> = (0..4)
            .map(|i| rate(&format!("T{i}"), Some(1.0), None))
            .collect();
        rates.push(rate("BIG", Some(2.0), None));

        let filtered = filter_top_by_volume(rates, 3);
        assert_eq!(filtered.len(), 3);
        assert_eq!(filtered[0].symbol, "BIG");
        // Stable sort: among equal turnovers, earlier input wins.
        assert_eq!(filtered[1].symbol, "T0");
        assert_eq!(filtered[2].symbol, "T1");
    }

    #[test]
    fn batches_without_volume_pass_through() {
        let rates: Vec<NormalizedRate> =
            (0..80).map(|i| rate(&format!("S{i}"), None, None)).collect();
        assert_eq!(filter_top_by_volume(rates, 50).len(), 80);
    }

    #[test]
    fn small_batches_pass_through() {
        let rates = vec![rate("A", Some(5.0), None)];
        assert_eq!(filter_top_by_volume(rates, 50).len(), 1);
    }

    struct FakeHedgeAdapter;

    #[async_trait]
    impl HedgeAdapter for FakeHedgeAdapter {
        fn protocol(&self) -> &'static str {
            "alp"
        }

        async fn fetch_hedge(
            &self,
            lp_amount: f64,
        ) -> Result<BTreeMap<String, HedgePosition>> {
            let mut positions = BTreeMap::new();
            positions.insert(
                "SOL".to_string(),
                HedgePosition {
                    amount: lp_amount * 0.01,
                    per_token: 0.01,
                },
            );
            positions.insert(
                "BTC".to_string(),
                HedgePosition {
                    amount: lp_amount * 0.0001,
                    per_token: 0.0001,
                },
            );
            Ok(positions)
        }
    }

    #[tokio::test]
    async fn hedge_poller_lands_samples_per_leg() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        let poller = HedgePoller::new(
            Arc::new(FakeHedgeAdapter),
            store.clone(),
            1000.0,
            Duration::from_secs(60),
        );

        poller.tick().await.unwrap();

        let sol = store.latest_sample("alp_hedge_SOL").unwrap().unwrap();
        assert!((sol.value.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(sol.unit.as_deref(), Some("SOL"));
        let btc = store.latest_sample("alp_hedge_BTC").unwrap().unwrap();
        assert!((btc.value.unwrap() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn hedge_poller_skips_when_holdings_are_zero() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        let poller = HedgePoller::new(
            Arc::new(FakeHedgeAdapter),
            store.clone(),
            0.0,
            Duration::from_secs(60),
        );

        poller.tick().await.unwrap();
        assert!(store.latest_sample("alp_hedge_SOL").unwrap().is_none());
    }

    #[test]
    fn volume_falls_back_when_turnover_missing() {
        let mut rates = vec![
            rate("LOW", None, Some(1.0)),
            rate("HIGH", None, Some(10.0)),
            rate("MID", Some(5.0), None),
        ];
        rates.extend((0..60).map(|i| rate(&format!("Z{i}"), None, None)));

        let filtered = filter_top_by_volume(rates, 2);
        assert_eq!(filtered[0].symbol, "HIGH");
        assert_eq!(filtered[1].symbol, "MID");
    }
}
