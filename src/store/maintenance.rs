//! Retention support for the downsampler: bucketed thinning, bulk deletes,
//! file backup and compaction.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, types::Value};

use super::{to_ts, Store};

/// A half-open `[start, end)` window thinned to one row per `interval_s`
/// bucket. Buckets are absolute (`ts / interval_s`), so re-running on
/// unchanged data deletes nothing.
#[derive(Debug, Clone, Copy)]
pub struct DownsampleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval_s: i64,
}

/// Time-series tables the downsampler is allowed to touch. A closed set so
/// no table name is ever interpolated from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesTable {
    Samples,
    FundingRates,
    SpotPrices,
    MonitorValues,
}

impl SeriesTable {
    fn name(self) -> &'static str {
        match self {
            SeriesTable::Samples => "samples",
            SeriesTable::FundingRates => "funding_rates",
            SeriesTable::SpotPrices => "spot_prices",
            SeriesTable::MonitorValues => "monitor_values",
        }
    }

    fn time_column(self) -> &'static str {
        match self {
            SeriesTable::Samples => "timestamp",
            SeriesTable::FundingRates => "timestamp",
            SeriesTable::SpotPrices => "timestamp",
            SeriesTable::MonitorValues => "computed_at",
        }
    }
}

/// Row scope for funding-rate maintenance: the "important" pairs keep the
/// long-term policy, everything else gets the aggressive one.
#[derive(Debug, Clone, Copy)]
pub enum FundingScope<'a> {
    All,
    Important(&'a [(String, String)]),
    Other(&'a [(String, String)]),
}

impl FundingScope<'_> {
    /// SQL fragment plus its bind values. `Important` with no pairs matches
    /// nothing; `Other` with no pairs matches everything.
    fn clause(&self) -> (String, Vec<Value>) {
        let pair_clause = |pairs: &[(String, String)]| {
            let parts: Vec<&str> = pairs.iter().map(|_| "(exchange = ? AND symbol = ?)").collect();
            let args = pairs
                .iter()
                .flat_map(|(e, s)| {
                    [Value::Text(e.to_lowercase()), Value::Text(s.to_uppercase())]
                })
                .collect::<Vec<_>>();
            (parts.join(" OR "), args)
        };

        match self {
            FundingScope::All => (String::new(), Vec::new()),
            FundingScope::Important(pairs) => {
                if pairs.is_empty() {
                    return (" AND 0".to_string(), Vec::new());
                }
                let (clause, args) = pair_clause(pairs);
                (format!(" AND ({})", clause), args)
            }
            FundingScope::Other(pairs) => {
                if pairs.is_empty() {
                    return (String::new(), Vec::new());
                }
                let (clause, args) = pair_clause(pairs);
                (format!(" AND NOT ({})", clause), args)
            }
        }
    }
}

impl Store {
    pub fn file_size(&self) -> Result<u64> {
        let meta = std::fs::metadata(self.path())
            .with_context(|| format!("Failed to stat database at {:?}", self.path()))?;
        Ok(meta.len())
    }

    /// Flush the WAL into the main file and copy it aside. The copy is the
    /// downsampler's safety net; a failed backup aborts the whole run.
    pub fn backup_to(&self, backup_path: &Path) -> Result<()> {
        {
            let conn = self.conn();
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
                .context("WAL checkpoint before backup failed")?;
        }
        std::fs::copy(self.path(), backup_path)
            .with_context(|| format!("Failed to copy database to {:?}", backup_path))?;
        Ok(())
    }

    pub fn count_rows(&self, table: SeriesTable) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table.name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Thin a window to one row per bucket, keeping the smallest primary key
    /// in each. Returns the number of rows deleted.
    pub fn thin_series(
        &self,
        table: SeriesTable,
        window: &DownsampleWindow,
        scope: FundingScope<'_>,
    ) -> Result<usize> {
        let t = table.name();
        let tc = table.time_column();
        let (scope_sql, scope_args) = scope.clause();

        let sql = format!(
            "DELETE FROM {t} WHERE id IN ( \
                SELECT id FROM {t} \
                WHERE {tc} >= ? AND {tc} < ?{scope_sql} \
                AND id NOT IN ( \
                    SELECT MIN(id) FROM {t} \
                    WHERE {tc} >= ? AND {tc} < ?{scope_sql} \
                    GROUP BY {tc} / ? \
                ) \
            )"
        );

        let mut args: Vec<Value> = Vec::new();
        args.push(Value::Integer(to_ts(window.start)));
        args.push(Value::Integer(to_ts(window.end)));
        args.extend(scope_args.iter().cloned());
        args.push(Value::Integer(to_ts(window.start)));
        args.push(Value::Integer(to_ts(window.end)));
        args.extend(scope_args);
        args.push(Value::Integer(window.interval_s));

        let conn = self.conn();
        let deleted = conn.execute(&sql, params_from_iter(args))?;
        Ok(deleted)
    }

    /// Drop every row older than `cutoff` within the scope.
    pub fn delete_series_before(
        &self,
        table: SeriesTable,
        cutoff: DateTime<Utc>,
        scope: FundingScope<'_>,
    ) -> Result<usize> {
        let (scope_sql, scope_args) = scope.clause();
        let sql = format!(
            "DELETE FROM {} WHERE {} < ?{}",
            table.name(),
            table.time_column(),
            scope_sql
        );

        let mut args: Vec<Value> = vec![Value::Integer(to_ts(cutoff))];
        args.extend(scope_args);

        let conn = self.conn();
        let deleted = conn.execute(&sql, params_from_iter(args))?;
        Ok(deleted)
    }

    /// Reclaim space after deletions.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("VACUUM;").context("VACUUM failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SpotQuote;
    use crate::store::test_util::temp_store;
    use chrono::Duration;
    use rusqlite::params;

    /// Insert a spot row with an explicit timestamp, bypassing the
    /// now-stamping insert used by pollers.
    fn seed_spot(store: &Store, symbol: &str, ts: DateTime<Utc>) {
        let conn = store.conn();
        conn.execute(
            "INSERT INTO spot_prices (exchange, symbol, price, volume_24h, timestamp) \
             VALUES ('binance', ?1, 1.0, NULL, ?2)",
            params![symbol, to_ts(ts)],
        )
        .unwrap();
    }

    #[test]
    fn thinning_keeps_one_row_per_bucket_and_is_idempotent() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        // 60 rows one minute apart inside a 1h window, thinned to 5-minute buckets.
        for i in 0..60 {
            seed_spot(&store, "BTC", now - Duration::hours(2) + Duration::minutes(i));
        }

        let window = DownsampleWindow {
            start: now - Duration::hours(2),
            end: now - Duration::hours(1),
            interval_s: 300,
        };
        let deleted = store
            .thin_series(SeriesTable::SpotPrices, &window, FundingScope::All)
            .unwrap();
        let remaining = store.count_rows(SeriesTable::SpotPrices).unwrap();

        assert_eq!(deleted as i64 + remaining, 60);
        // 60 minutes / 5-minute buckets: at most 13 bucket representatives
        // (window edges may straddle absolute buckets).
        assert!(remaining <= 13, "remaining = {}", remaining);

        let second = store
            .thin_series(SeriesTable::SpotPrices, &window, FundingScope::All)
            .unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn funding_scope_splits_important_from_other() {
        let (_dir, store) = temp_store();
        let conn_insert = |exchange: &str, symbol: &str, ts: DateTime<Utc>| {
            let conn = store.conn();
            conn.execute(
                "INSERT INTO funding_rates (exchange, symbol, rate, annualized_rate, timestamp) \
                 VALUES (?1, ?2, 0.0, 0.0, ?3)",
                params![exchange, symbol, to_ts(ts)],
            )
            .unwrap();
        };

        let now = Utc::now();
        let old = now - Duration::hours(10);
        conn_insert("lighter", "BTC", old);
        conn_insert("grvt", "DOGE", old);

        let important = vec![("lighter".to_string(), "BTC".to_string())];
        let deleted = store
            .delete_series_before(
                SeriesTable::FundingRates,
                now - Duration::hours(8),
                FundingScope::Other(&important),
            )
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.latest_funding("lighter", "BTC").unwrap().is_some());
        assert!(store.latest_funding("grvt", "DOGE").unwrap().is_none());
    }

    #[test]
    fn backup_copies_current_contents() {
        let (dir, store) = temp_store();
        seed_spot(&store, "ETH", Utc::now());

        let backup = dir.path().join("test.db.backup-20260101-000000");
        store.backup_to(&backup).unwrap();
        assert!(backup.exists());
        assert!(std::fs::metadata(&backup).unwrap().len() > 0);
    }
}
