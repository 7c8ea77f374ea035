//! SQLite-backed time-series store.
//!
//! One database file holds everything: append-only sample/funding/spot
//! series plus the monitor registry, cached monitor values, alert rules,
//! alert states and notification targets. WAL mode keeps readers unblocked
//! while the pollers and the webhook handler write; all writes funnel
//! through one connection guarded by a mutex.

mod alerts;
mod maintenance;
mod monitors;
mod rates;
mod samples;

pub use alerts::{AlertRuleSpec, TargetSpec};
pub use maintenance::{DownsampleWindow, FundingScope, SeriesTable};
pub use monitors::MonitorSpec;
pub use samples::{SampleOrder, SampleQuery, SourceSummary};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

/// Schema with pragmas tuned for many readers and a steady write load.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    display_name TEXT,
    value REAL,
    text TEXT,
    unit TEXT,
    decimal_places INTEGER,
    status TEXT NOT NULL DEFAULT 'active',
    timestamp INTEGER NOT NULL,
    received_at INTEGER NOT NULL,
    is_change INTEGER NOT NULL DEFAULT 0,
    change_type TEXT,
    previous_value REAL
);

CREATE INDEX IF NOT EXISTS idx_samples_source_ts
    ON samples(source_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_samples_ts
    ON samples(timestamp DESC);

CREATE TABLE IF NOT EXISTS funding_rates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    rate REAL NOT NULL,
    annualized_rate REAL NOT NULL,
    mark_price REAL,
    next_funding_time INTEGER,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_funding_exchange_symbol_ts
    ON funding_rates(exchange, symbol, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_funding_ts
    ON funding_rates(timestamp);

CREATE TABLE IF NOT EXISTS spot_prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    price REAL NOT NULL,
    volume_24h REAL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spot_exchange_symbol_ts
    ON spot_prices(exchange, symbol, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_spot_ts
    ON spot_prices(timestamp);

CREATE TABLE IF NOT EXISTS monitors (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    formula TEXT NOT NULL,
    unit TEXT,
    color TEXT,
    description TEXT,
    decimal_places INTEGER NOT NULL DEFAULT 2,
    enabled INTEGER NOT NULL DEFAULT 1,
    heartbeat_interval_s INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS monitor_values (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    monitor_id TEXT NOT NULL,
    value REAL NOT NULL,
    computed_at INTEGER NOT NULL,
    dependencies TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_monitor_values_monitor_ts
    ON monitor_values(monitor_id, computed_at DESC);

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    condition TEXT NOT NULL,
    level TEXT NOT NULL DEFAULT 'medium',
    enabled INTEGER NOT NULL DEFAULT 1,
    cooldown_s INTEGER NOT NULL DEFAULT 300,
    heartbeat_enabled INTEGER NOT NULL DEFAULT 0,
    heartbeat_interval_s INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS alert_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id TEXT NOT NULL,
    level TEXT NOT NULL,
    triggered_at INTEGER NOT NULL,
    last_notified_at INTEGER NOT NULL,
    notification_count INTEGER NOT NULL DEFAULT 1,
    resolved_at INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_alert_states_rule
    ON alert_states(rule_id, is_active, triggered_at DESC);

CREATE TABLE IF NOT EXISTS notification_targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    recipient_key TEXT NOT NULL,
    api_token TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    min_level TEXT NOT NULL DEFAULT 'low',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create data directory {:?}", parent))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(&path, flags)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let sample_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
            .unwrap_or(0);

        info!("📊 Database initialized at: {:?}", path);
        info!("📈 Existing samples in database: {}", sample_count);

        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Unix seconds for storage.
pub(crate) fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// Unix seconds back to UTC. Out-of-range values clamp to the epoch.
pub(crate) fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
