//! Monitor registry and cached monitor values.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{from_ts, to_ts, Store};
use crate::models::{Monitor, MonitorValue};

/// Monitor fields settable by the user; timestamps are managed here.
#[derive(Debug, Clone)]
pub struct MonitorSpec {
    pub id: String,
    pub name: String,
    pub formula: String,
    pub unit: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub decimal_places: i64,
    pub enabled: bool,
    pub heartbeat_interval_s: i64,
}

impl Store {
    pub fn create_monitor(&self, spec: &MonitorSpec) -> Result<Monitor> {
        let now = Utc::now();
        let conn = self.conn();

        conn.execute(
            "INSERT INTO monitors (id, name, formula, unit, color, description, decimal_places, \
                                   enabled, heartbeat_interval_s, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                spec.id,
                spec.name,
                spec.formula,
                spec.unit,
                spec.color,
                spec.description,
                spec.decimal_places,
                spec.enabled,
                spec.heartbeat_interval_s,
                to_ts(now),
                to_ts(now),
            ],
        )
        .with_context(|| format!("Failed to create monitor {}", spec.id))?;

        Ok(monitor_from_spec(spec, now, now))
    }

    /// Full-row update. Returns the updated monitor, or None if the id is
    /// unknown.
    pub fn update_monitor(&self, spec: &MonitorSpec) -> Result<Option<Monitor>> {
        let now = Utc::now();
        let created_at: Option<i64> = {
            let conn = self.conn();
            conn.query_row(
                "SELECT created_at FROM monitors WHERE id = ?1",
                [&spec.id],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(created_at) = created_at else {
            return Ok(None);
        };

        let conn = self.conn();
        conn.execute(
            "UPDATE monitors SET name = ?2, formula = ?3, unit = ?4, color = ?5, \
                    description = ?6, decimal_places = ?7, enabled = ?8, \
                    heartbeat_interval_s = ?9, updated_at = ?10 \
             WHERE id = ?1",
            params![
                spec.id,
                spec.name,
                spec.formula,
                spec.unit,
                spec.color,
                spec.description,
                spec.decimal_places,
                spec.enabled,
                spec.heartbeat_interval_s,
                to_ts(now),
            ],
        )?;

        Ok(Some(monitor_from_spec(spec, from_ts(created_at), now)))
    }

    /// Delete a monitor and its cached values. Returns false if it did not
    /// exist.
    pub fn delete_monitor(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM monitors WHERE id = ?1", [id])?;
        tx.execute("DELETE FROM monitor_values WHERE monitor_id = ?1", [id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn get_monitor(&self, id: &str) -> Result<Option<Monitor>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, formula, unit, color, description, decimal_places, enabled, \
                    heartbeat_interval_s, created_at, updated_at \
             FROM monitors WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], row_to_monitor)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_monitors(&self, enabled_only: bool) -> Result<Vec<Monitor>> {
        let conn = self.conn();
        let sql = if enabled_only {
            "SELECT id, name, formula, unit, color, description, decimal_places, enabled, \
                    heartbeat_interval_s, created_at, updated_at \
             FROM monitors WHERE enabled = 1 ORDER BY id"
        } else {
            "SELECT id, name, formula, unit, color, description, decimal_places, enabled, \
                    heartbeat_interval_s, created_at, updated_at \
             FROM monitors ORDER BY id"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let monitors = stmt
            .query_map([], row_to_monitor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(monitors)
    }

    /// Append a cached value row. The caller owns the only-on-change rule;
    /// the store records whatever it is handed.
    pub fn insert_monitor_value(
        &self,
        monitor_id: &str,
        value: f64,
        computed_at: DateTime<Utc>,
        dependencies: &[String],
    ) -> Result<MonitorValue> {
        let deps_json =
            serde_json::to_string(dependencies).context("Failed to encode dependency list")?;
        let conn = self.conn();

        conn.execute(
            "INSERT INTO monitor_values (monitor_id, value, computed_at, dependencies) \
             VALUES (?1, ?2, ?3, ?4)",
            params![monitor_id, value, to_ts(computed_at), deps_json],
        )?;

        Ok(MonitorValue {
            id: conn.last_insert_rowid(),
            monitor_id: monitor_id.to_string(),
            value,
            computed_at,
            dependencies: dependencies.to_vec(),
        })
    }

    pub fn latest_monitor_value(&self, monitor_id: &str) -> Result<Option<MonitorValue>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, monitor_id, value, computed_at, dependencies \
             FROM monitor_values WHERE monitor_id = ?1 \
             ORDER BY computed_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([monitor_id], row_to_monitor_value)?;
        Ok(rows.next().transpose()?)
    }

    pub fn monitor_value_count(&self, monitor_id: &str) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM monitor_values WHERE monitor_id = ?1",
            [monitor_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn monitor_from_spec(spec: &MonitorSpec, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Monitor {
    Monitor {
        id: spec.id.clone(),
        name: spec.name.clone(),
        formula: spec.formula.clone(),
        unit: spec.unit.clone(),
        color: spec.color.clone(),
        description: spec.description.clone(),
        decimal_places: spec.decimal_places,
        enabled: spec.enabled,
        heartbeat_interval_s: spec.heartbeat_interval_s,
        created_at,
        updated_at,
    }
}

fn row_to_monitor(row: &Row<'_>) -> rusqlite::Result<Monitor> {
    Ok(Monitor {
        id: row.get(0)?,
        name: row.get(1)?,
        formula: row.get(2)?,
        unit: row.get(3)?,
        color: row.get(4)?,
        description: row.get(5)?,
        decimal_places: row.get(6)?,
        enabled: row.get(7)?,
        heartbeat_interval_s: row.get(8)?,
        created_at: from_ts(row.get(9)?),
        updated_at: from_ts(row.get(10)?),
    })
}

fn row_to_monitor_value(row: &Row<'_>) -> rusqlite::Result<MonitorValue> {
    let deps_json: String = row.get(4)?;
    Ok(MonitorValue {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        value: row.get(2)?,
        computed_at: from_ts(row.get(3)?),
        dependencies: serde_json::from_str(&deps_json).unwrap_or_default(),
    })
}
