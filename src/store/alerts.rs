//! Alert rules, alert states and notification targets.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{from_ts, to_ts, Store};
use crate::models::{AlertLevel, AlertRule, AlertState, NotificationTarget};

/// Rule fields settable by the user.
#[derive(Debug, Clone)]
pub struct AlertRuleSpec {
    pub id: String,
    pub name: String,
    pub condition: String,
    pub level: AlertLevel,
    pub enabled: bool,
    pub cooldown_s: i64,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_s: i64,
}

#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub name: String,
    pub recipient_key: String,
    pub api_token: Option<String>,
    pub enabled: bool,
    pub min_level: AlertLevel,
}

impl Store {
    pub fn create_alert_rule(&self, spec: &AlertRuleSpec) -> Result<AlertRule> {
        let now = Utc::now();
        let conn = self.conn();

        conn.execute(
            "INSERT INTO alert_rules (id, name, condition, level, enabled, cooldown_s, \
                                      heartbeat_enabled, heartbeat_interval_s, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                spec.id,
                spec.name,
                spec.condition,
                spec.level.as_str(),
                spec.enabled,
                spec.cooldown_s,
                spec.heartbeat_enabled,
                spec.heartbeat_interval_s,
                to_ts(now),
                to_ts(now),
            ],
        )
        .with_context(|| format!("Failed to create alert rule {}", spec.id))?;

        Ok(rule_from_spec(spec, now, now))
    }

    pub fn update_alert_rule(&self, spec: &AlertRuleSpec) -> Result<Option<AlertRule>> {
        let now = Utc::now();
        let created_at: Option<i64> = {
            let conn = self.conn();
            conn.query_row(
                "SELECT created_at FROM alert_rules WHERE id = ?1",
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
            "UPDATE alert_rules SET name = ?2, condition = ?3, level = ?4, enabled = ?5, \
                    cooldown_s = ?6, heartbeat_enabled = ?7, heartbeat_interval_s = ?8, \
                    updated_at = ?9 \
             WHERE id = ?1",
            params![
                spec.id,
                spec.name,
                spec.condition,
                spec.level.as_str(),
                spec.enabled,
                spec.cooldown_s,
                spec.heartbeat_enabled,
                spec.heartbeat_interval_s,
                to_ts(now),
            ],
        )?;

        Ok(Some(rule_from_spec(spec, from_ts(created_at), now)))
    }

    pub fn delete_alert_rule(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM alert_rules WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, condition, level, enabled, cooldown_s, heartbeat_enabled, \
                    heartbeat_interval_s, created_at, updated_at \
             FROM alert_rules WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], row_to_rule)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_alert_rules(&self, enabled_only: bool) -> Result<Vec<AlertRule>> {
        let conn = self.conn();
        let sql = if enabled_only {
            "SELECT id, name, condition, level, enabled, cooldown_s, heartbeat_enabled, \
                    heartbeat_interval_s, created_at, updated_at \
             FROM alert_rules WHERE enabled = 1 ORDER BY id"
        } else {
            "SELECT id, name, condition, level, enabled, cooldown_s, heartbeat_enabled, \
                    heartbeat_interval_s, created_at, updated_at \
             FROM alert_rules ORDER BY id"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let rules = stmt
            .query_map([], row_to_rule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Latest active state for a rule, split by kind: threshold states carry
    /// a plain tier name, heartbeat states a `heartbeat_` prefix.
    pub fn active_alert_state(&self, rule_id: &str, heartbeat: bool) -> Result<Option<AlertState>> {
        let conn = self.conn();
        let sql = if heartbeat {
            "SELECT id, rule_id, level, triggered_at, last_notified_at, notification_count, \
                    resolved_at, is_active \
             FROM alert_states \
             WHERE rule_id = ?1 AND is_active = 1 AND level LIKE 'heartbeat_%' \
             ORDER BY triggered_at DESC, id DESC LIMIT 1"
        } else {
            "SELECT id, rule_id, level, triggered_at, last_notified_at, notification_count, \
                    resolved_at, is_active \
             FROM alert_states \
             WHERE rule_id = ?1 AND is_active = 1 AND level NOT LIKE 'heartbeat_%' \
             ORDER BY triggered_at DESC, id DESC LIMIT 1"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query_map([rule_id], row_to_state)?;
        Ok(rows.next().transpose()?)
    }

    pub fn create_alert_state(
        &self,
        rule_id: &str,
        level: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertState> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO alert_states (rule_id, level, triggered_at, last_notified_at, \
                                       notification_count, is_active) \
             VALUES (?1, ?2, ?3, ?4, 1, 1)",
            params![rule_id, level, to_ts(now), to_ts(now)],
        )?;

        Ok(AlertState {
            id: conn.last_insert_rowid(),
            rule_id: rule_id.to_string(),
            level: level.to_string(),
            triggered_at: now,
            last_notified_at: now,
            notification_count: 1,
            resolved_at: None,
            is_active: true,
        })
    }

    /// Bump an active state after a re-notification.
    pub fn touch_alert_state(&self, state_id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE alert_states SET last_notified_at = ?2, \
                    notification_count = notification_count + 1 \
             WHERE id = ?1",
            params![state_id, to_ts(now)],
        )?;
        Ok(())
    }

    /// Resolve every active state of the given kind for a rule. Returns how
    /// many were closed.
    pub fn resolve_alert_states(
        &self,
        rule_id: &str,
        heartbeat: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn();
        let sql = if heartbeat {
            "UPDATE alert_states SET is_active = 0, resolved_at = ?2 \
             WHERE rule_id = ?1 AND is_active = 1 AND level LIKE 'heartbeat_%'"
        } else {
            "UPDATE alert_states SET is_active = 0, resolved_at = ?2 \
             WHERE rule_id = ?1 AND is_active = 1 AND level NOT LIKE 'heartbeat_%'"
        };
        let resolved = conn.execute(sql, params![rule_id, to_ts(now)])?;
        Ok(resolved)
    }

    pub fn create_target(&self, spec: &TargetSpec) -> Result<NotificationTarget> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO notification_targets (name, recipient_key, api_token, enabled, \
                                               min_level, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                spec.name,
                spec.recipient_key,
                spec.api_token,
                spec.enabled,
                spec.min_level.as_str(),
                to_ts(now),
                to_ts(now),
            ],
        )?;

        Ok(NotificationTarget {
            id: conn.last_insert_rowid(),
            name: spec.name.clone(),
            recipient_key: spec.recipient_key.clone(),
            api_token: spec.api_token.clone(),
            enabled: spec.enabled,
            min_level: spec.min_level,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_target(&self, id: i64, spec: &TargetSpec) -> Result<Option<NotificationTarget>> {
        let now = Utc::now();
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE notification_targets SET name = ?2, recipient_key = ?3, api_token = ?4, \
                    enabled = ?5, min_level = ?6, updated_at = ?7 \
             WHERE id = ?1",
            params![
                id,
                spec.name,
                spec.recipient_key,
                spec.api_token,
                spec.enabled,
                spec.min_level.as_str(),
                to_ts(now),
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        drop(conn);
        self.get_target(id)
    }

    pub fn delete_target(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM notification_targets WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn get_target(&self, id: i64) -> Result<Option<NotificationTarget>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, recipient_key, api_token, enabled, min_level, created_at, updated_at \
             FROM notification_targets WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], row_to_target)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_targets(&self, enabled_only: bool) -> Result<Vec<NotificationTarget>> {
        let conn = self.conn();
        let sql = if enabled_only {
            "SELECT id, name, recipient_key, api_token, enabled, min_level, created_at, updated_at \
             FROM notification_targets WHERE enabled = 1 ORDER BY id"
        } else {
            "SELECT id, name, recipient_key, api_token, enabled, min_level, created_at, updated_at \
             FROM notification_targets ORDER BY id"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let targets = stmt
            .query_map([], row_to_target)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }
}

fn rule_from_spec(spec: &AlertRuleSpec, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> AlertRule {
    AlertRule {
        id: spec.id.clone(),
        name: spec.name.clone(),
        condition: spec.condition.clone(),
        level: spec.level,
        enabled: spec.enabled,
        cooldown_s: spec.cooldown_s,
        heartbeat_enabled: spec.heartbeat_enabled,
        heartbeat_interval_s: spec.heartbeat_interval_s,
        created_at,
        updated_at,
    }
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<AlertRule> {
    let level: String = row.get(3)?;
    Ok(AlertRule {
        id: row.get(0)?,
        name: row.get(1)?,
        condition: row.get(2)?,
        level: AlertLevel::parse(&level).unwrap_or(AlertLevel::Medium),
        enabled: row.get(4)?,
        cooldown_s: row.get(5)?,
        heartbeat_enabled: row.get(6)?,
        heartbeat_interval_s: row.get(7)?,
        created_at: from_ts(row.get(8)?),
        updated_at: from_ts(row.get(9)?),
    })
}

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<AlertState> {
    Ok(AlertState {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        level: row.get(2)?,
        triggered_at: from_ts(row.get(3)?),
        last_notified_at: from_ts(row.get(4)?),
        notification_count: row.get(5)?,
        resolved_at: row.get::<_, Option<i64>>(6)?.map(from_ts),
        is_active: row.get(7)?,
    })
}

fn row_to_target(row: &Row<'_>) -> rusqlite::Result<NotificationTarget> {
    let min_level: String = row.get(5)?;
    Ok(NotificationTarget {
        id: row.get(0)?,
        name: row.get(1)?,
        recipient_key: row.get(2)?,
        api_token: row.get(3)?,
        enabled: row.get(4)?,
        min_level: AlertLevel::parse(&min_level).unwrap_or(AlertLevel::Low),
        created_at: from_ts(row.get(6)?),
        updated_at: from_ts(row.get(7)?),
    })
}
