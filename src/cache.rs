//! Snapshot cache: the merged latest funding batch across every
//! rate-producing adapter, TTL-bounded with single-flight refresh.
//!
//! Readers clone the published batch under a short parking_lot lock; the
//! refresh itself is serialized by an async mutex. A waiter that queued
//! behind an in-flight refresh adopts its result instead of refetching, so
//! concurrent `get` calls — forced or not — cost one upstream round per
//! adapter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::NormalizedRate;
use crate::scrapers::{RateAdapter, SpotUniverseSource};

pub const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotBatch {
    pub rates: Vec<NormalizedRate>,
    pub last_updated: DateTime<Utc>,
}

pub struct SnapshotCache {
    sources: Vec<Arc<dyn RateAdapter>>,
    universe: Arc<dyn SpotUniverseSource>,
    ttl: Duration,
    published: RwLock<Option<SnapshotBatch>>,
    refresh_gate: Mutex<()>,
}

impl SnapshotCache {
    pub fn new(
        sources: Vec<Arc<dyn RateAdapter>>,
        universe: Arc<dyn SpotUniverseSource>,
    ) -> Self {
        SnapshotCache {
            sources,
            universe,
            ttl: CACHE_TTL,
            published: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    fn fresh_batch(&self) -> Option<SnapshotBatch> {
        let published = self.published.read();
        let batch = published.as_ref()?;
        let age = Utc::now().signed_duration_since(batch.last_updated);
        if age.to_std().map(|age| age <= self.ttl).unwrap_or(true) {
            Some(batch.clone())
        } else {
            None
        }
    }

    /// Get the merged batch, refreshing when forced or past the TTL.
    pub async fn get(&self, force_refresh: bool) -> Result<SnapshotBatch> {
        if !force_refresh {
            if let Some(batch) = self.fresh_batch() {
                return Ok(batch);
            }
        }

        let entered = Utc::now();
        let _gate = self.refresh_gate.lock().await;

        // Another caller may have completed a refresh while we waited on the
        // gate; adopting it preserves one-round-per-adapter under concurrency.
        {
            let published = self.published.read();
            if let Some(batch) = published.as_ref() {
                if batch.last_updated >= entered {
                    return Ok(batch.clone());
                }
            }
        }
        if !force_refresh {
            if let Some(batch) = self.fresh_batch() {
                return Ok(batch);
            }
        }

        let batch = self.refresh().await?;
        *self.published.write() = Some(batch.clone());
        Ok(batch)
    }

    /// Fan out to every adapter plus the Binance spot universe in parallel,
    /// then merge. A failing adapter contributes nothing this round; the
    /// whole refresh only fails when every adapter does and there is no
    /// previous batch to fall back to.
    async fn refresh(&self) -> Result<SnapshotBatch> {
        let started = std::time::Instant::now();

        let fetches = self.sources.iter().map(|source| {
            let source = source.clone();
            async move { (source.exchange(), source.fetch_snapshot().await) }
        });
        let universe_fetch = self.universe.fetch_symbols();

        let (results, universe) = tokio::join!(join_all(fetches), universe_fetch);

        let spot_symbols = match universe {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!(error = %e, "Binance spot universe fetch failed, flags default to false");
                Default::default()
            }
        };

        let mut rates = Vec::new();
        let mut failures = 0usize;
        for (exchange, result) in results {
            match result {
                Ok(batch) => {
                    debug!(exchange, count = batch.len(), "Snapshot source fetched");
                    rates.extend(batch);
                }
                Err(e) => {
                    failures += 1;
                    warn!(exchange, error = %e, "Snapshot source failed");
                }
            }
        }

        if failures == self.sources.len() && !self.sources.is_empty() {
            let stale = self.published.read().clone();
            match stale {
                Some(batch) => {
                    warn!("All snapshot sources failed, serving previous batch");
                    return Ok(batch);
                }
                None => bail!("all snapshot sources failed"),
            }
        }

        for rate in &mut rates {
            rate.has_binance_spot = spot_symbols.contains(&rate.symbol.to_uppercase());
        }

        info!(
            rates = rates.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refreshed funding snapshot"
        );

        Ok(SnapshotBatch {
            rates,
            last_updated: Utc::now(),
        })
    }
}
