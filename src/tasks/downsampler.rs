//! Database downsampler: periodically thins historical rows per a
//! multi-tier retention policy to keep the database file small while
//! preserving long-term trends.
//!
//! Retention policy:
//! - funding rates, important pairs: 24h full, 1-7d one per 5min,
//!   7-30d one per 10min, older one per 15min
//! - funding rates, everything else: 1h full, 1-8h one per 5min, older deleted
//! - spot prices: 1h full, 1-48h one per 5min, older deleted
//! - samples and monitor values: the important-pair long-term policy
//!
//! Every run snapshots the file, backs it up first (a failed backup aborts
//! the run), VACUUMs when anything was deleted, and prunes old backups.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use super::PollTask;
use crate::store::{DownsampleWindow, FundingScope, SeriesTable, Store};

#[derive(Debug, Clone)]
pub struct DownsamplerConfig {
    pub interval: StdDuration,
    pub keep_backups: usize,
    /// (exchange, symbol) pairs kept on the long-term policy.
    pub important_pairs: Vec<(String, String)>,
}

impl Default for DownsamplerConfig {
    fn default() -> Self {
        DownsamplerConfig {
            interval: StdDuration::from_secs(7200),
            keep_backups: 3,
            important_pairs: vec![
                ("lighter".to_string(), "BTC".to_string()),
                ("lighter".to_string(), "ETH".to_string()),
                ("lighter".to_string(), "SOL".to_string()),
            ],
        }
    }
}

pub struct Downsampler {
    store: Arc<Store>,
    config: DownsamplerConfig,
}

impl Downsampler {
    pub fn new(store: Arc<Store>, config: DownsamplerConfig) -> Self {
        Downsampler { store, config }
    }

    /// One full maintenance pass. Public so tests can drive it directly.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<()> {
        let initial_size = self.store.file_size()?;
        info!(
            size_mb = initial_size / 1024 / 1024,
            "Starting database downsampling"
        );

        let backup_path = self.backup_path(now);
        if let Err(e) = self.store.backup_to(&backup_path) {
            error!(error = %e, "Backup failed, aborting downsampling");
            return Err(e);
        }

        let mut total_deleted = 0usize;
        total_deleted += self.downsample_spot(now)?;
        total_deleted += self.downsample_funding(now)?;
        total_deleted += self.downsample_long_term(SeriesTable::MonitorValues, now)?;
        total_deleted += self.downsample_long_term(SeriesTable::Samples, now)?;

        if total_deleted > 0 {
            info!(total_deleted, "Running VACUUM to reclaim space");
            self.store.vacuum()?;

            let final_size = self.store.file_size()?;
            let freed = initial_size.saturating_sub(final_size);
            info!(
                deleted = total_deleted,
                freed_kb = freed / 1024,
                final_mb = final_size / 1024 / 1024,
                "Downsampling completed"
            );

            self.cleanup_old_backups();
        } else {
            info!("No data to downsample");
            // The backup buys nothing when the run was a no-op.
            if let Err(e) = std::fs::remove_file(&backup_path) {
                warn!(error = %e, "Failed to remove unnecessary backup");
            }
        }

        Ok(())
    }

    /// Spot prices: 1h full precision, 1-48h one per 5 minutes, older gone.
    fn downsample_spot(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut deleted = self.store.thin_series(
            SeriesTable::SpotPrices,
            &DownsampleWindow {
                start: now - Duration::hours(48),
                end: now - Duration::hours(1),
                interval_s: 300,
            },
            FundingScope::All,
        )?;
        deleted += self.store.delete_series_before(
            SeriesTable::SpotPrices,
            now - Duration::hours(48),
            FundingScope::All,
        )?;
        Ok(deleted)
    }

    /// Funding rates: important pairs follow the long-term tiers; the rest
    /// keep one hour of full precision, thin to 1-8h, and vanish past 8h.
    fn downsample_funding(&self, now: DateTime<Utc>) -> Result<usize> {
        let pairs = &self.config.important_pairs;
        let mut deleted = 0usize;

        for window in long_term_windows(now) {
            deleted += self.store.thin_series(
                SeriesTable::FundingRates,
                &window,
                FundingScope::Important(pairs),
            )?;
        }

        deleted += self.store.thin_series(
            SeriesTable::FundingRates,
            &DownsampleWindow {
                start: now - Duration::hours(8),
                end: now - Duration::hours(1),
                interval_s: 300,
            },
            FundingScope::Other(pairs),
        )?;
        deleted += self.store.delete_series_before(
            SeriesTable::FundingRates,
            now - Duration::hours(8),
            FundingScope::Other(pairs),
        )?;

        Ok(deleted)
    }

    fn downsample_long_term(&self, table: SeriesTable, now: DateTime<Utc>) -> Result<usize> {
        let mut deleted = 0usize;
        for window in long_term_windows(now) {
            deleted += self.store.thin_series(table, &window, FundingScope::All)?;
        }
        Ok(deleted)
    }

    fn backup_path(&self, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.format("%Y%m%d-%H%M%S");
        PathBuf::from(format!("{}.backup-{stamp}", self.store.path().display()))
    }

    /// Keep only the most recent N backup files next to the database.
    fn cleanup_old_backups(&self) {
        let db_path = self.store.path();
        let Some(parent) = db_path.parent() else {
            return;
        };
        let Some(db_name) = db_path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let prefix = format!("{db_name}.backup-");

        let mut backups: Vec<PathBuf> = match std::fs::read_dir(parent) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(&prefix))
                        .unwrap_or(false)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list backups");
                return;
            }
        };

        if backups.len() <= self.config.keep_backups {
            return;
        }

        // Timestamped names sort chronologically.
        backups.sort();
        let excess = backups.len() - self.config.keep_backups;
        for backup in backups.into_iter().take(excess) {
            match std::fs::remove_file(&backup) {
                Ok(()) => info!(backup = %backup.display(), "Removed old backup"),
                Err(e) => warn!(backup = %backup.display(), error = %e, "Failed to remove backup"),
            }
        }
    }
}

/// The long-term tiers shared by important funding pairs, samples and
/// monitor values: last 24h untouched, then 5/10/15-minute buckets.
fn long_term_windows(now: DateTime<Utc>) -> [DownsampleWindow; 3] {
    [
        DownsampleWindow {
            start: now - Duration::days(7),
            end: now - Duration::days(1),
            interval_s: 300,
        },
        DownsampleWindow {
            start: now - Duration::days(30),
            end: now - Duration::days(7),
            interval_s: 600,
        },
        DownsampleWindow {
            start: DateTime::<Utc>::UNIX_EPOCH,
            end: now - Duration::days(30),
            interval_s: 900,
        },
    ]
}

#[async_trait]
impl PollTask for Downsampler {
    fn name(&self) -> String {
        "database downsampler".to_string()
    }

    fn interval(&self) -> std::time::Duration {
        self.config.interval
    }

    async fn tick(&self) -> Result<()> {
        self.run_once(Utc::now())
            .context("database downsampling failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_store;
    use rusqlite::params;

    fn seed_spot_at(store: &Store, ts: DateTime<Utc>) {
        let conn = store.conn();
        conn.execute(
            "INSERT INTO spot_prices (exchange, symbol, price, volume_24h, timestamp) \
             VALUES ('binance', 'BTC', 1.0, NULL, ?1)",
            params![ts.timestamp()],
        )
        .unwrap();
    }

    #[test]
    fn spot_retention_matches_policy() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        let now = Utc::now();

        // 10k samples spread evenly over the last 72h (one every ~26s).
        let span_s = 72 * 3600i64;
        for i in 0..10_000 {
            let offset = i * span_s / 10_000;
            seed_spot_at(&store, now - Duration::seconds(offset));
        }

        let downsampler = Downsampler::new(store.clone(), DownsamplerConfig::default());
        downsampler.run_once(now).unwrap();

        // Everything older than 48h is gone.
        let oldest: i64 = {
            let conn = store.conn();
            conn.query_row("SELECT MIN(timestamp) FROM spot_prices", [], |r| r.get(0))
                .unwrap()
        };
        assert!(oldest >= (now - Duration::hours(48)).timestamp());

        // The last hour is untouched: one sample every ~26s over 1h.
        let last_hour: i64 = {
            let conn = store.conn();
            conn.query_row(
                "SELECT COUNT(*) FROM spot_prices WHERE timestamp >= ?1",
                params![(now - Duration::hours(1)).timestamp()],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert!(last_hour >= 130, "last hour thinned: {last_hour}");

        // The 1-48h band is reduced to at most one row per 5min bucket
        // (plus one for a straddled edge bucket).
        let middle: i64 = {
            let conn = store.conn();
            conn.query_row(
                "SELECT COUNT(*) FROM spot_prices WHERE timestamp < ?1",
                params![(now - Duration::hours(1)).timestamp()],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert!(middle <= 566, "middle band too dense: {middle}");

        // Idempotence: a second run deletes nothing.
        let before: i64 = store.count_rows(SeriesTable::SpotPrices).unwrap();
        downsampler.run_once(now).unwrap();
        assert_eq!(store.count_rows(SeriesTable::SpotPrices).unwrap(), before);
    }

    #[test]
    fn backups_are_pruned_to_keep_count() {
        let (dir, store) = temp_store();
        let store = Arc::new(store);
        seed_spot_at(&store, Utc::now() - Duration::hours(100));

        let downsampler = Downsampler::new(store.clone(), DownsamplerConfig::default());

        // Several runs, each deleting at least one row so backups persist.
        for i in 0..5 {
            seed_spot_at(&store, Utc::now() - Duration::hours(100));
            downsampler
                .run_once(Utc::now() + Duration::seconds(i))
                .unwrap();
        }

        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup-"))
            .count();
        assert!(backups <= 3, "expected at most 3 backups, found {backups}");
    }

    #[test]
    fn important_funding_pairs_survive_the_aggressive_cutoff() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        let now = Utc::now();

        let insert = |exchange: &str, symbol: &str, age_hours: i64| {
            let conn = store.conn();
            conn.execute(
                "INSERT INTO funding_rates (exchange, symbol, rate, annualized_rate, timestamp) \
                 VALUES (?1, ?2, 0.0001, 10.95, ?3)",
                params![exchange, symbol, (now - Duration::hours(age_hours)).timestamp()],
            )
            .unwrap();
        };

        insert("lighter", "BTC", 12); // important, inside 24h full window
        insert("grvt", "DOGE", 12); // not important, past the 8h cutoff

        let downsampler = Downsampler::new(store.clone(), DownsamplerConfig::default());
        downsampler.run_once(now).unwrap();

        assert!(store.latest_funding("lighter", "BTC").unwrap().is_some());
        assert!(store.latest_funding("grvt", "DOGE").unwrap().is_none());
    }
}
