//! Heartbeat checker: raises an alert when a monitored metric stops
//! updating within its declared interval, and resolves it when data flows
//! again.
//!
//! Heartbeat states are stored with a `heartbeat_`-prefixed level so a rule
//! can hold a threshold alert and a staleness alert at the same time without
//! the two colliding.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{dispatch_alert, Notifier};
use crate::models::AlertRule;
use crate::store::Store;

/// First `${monitor:X}` reference in a condition.
pub fn extract_monitor_ref(condition: &str) -> Option<&str> {
    let start = condition.find("${monitor:")? + "${monitor:".len();
    let rest = &condition[start..];
    let end = rest.find('}')?;
    let id = &rest[..end];
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

pub struct HeartbeatChecker {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    dashboard_url: Option<String>,
}

impl HeartbeatChecker {
    pub fn new(
        store: Arc<Store>,
        notifier: Arc<dyn Notifier>,
        dashboard_url: Option<String>,
    ) -> Self {
        HeartbeatChecker {
            store,
            notifier,
            dashboard_url,
        }
    }

    /// Check every enabled rule with heartbeat tracking turned on.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let rules = self.store.list_alert_rules(true)?;
        let heartbeat_rules: Vec<AlertRule> = rules
            .into_iter()
            .filter(|r| r.heartbeat_enabled && r.heartbeat_interval_s > 0)
            .collect();

        if heartbeat_rules.is_empty() {
            return Ok(());
        }
        debug!(count = heartbeat_rules.len(), "Checking heartbeats");

        for rule in heartbeat_rules {
            if let Err(e) = self.check_rule(&rule, now).await {
                warn!(rule = %rule.id, error = %e, "Heartbeat check failed");
            }
        }
        Ok(())
    }

    async fn check_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<()> {
        let Some(monitor_id) = extract_monitor_ref(&rule.condition) else {
            warn!(rule = %rule.id, condition = %rule.condition, "No monitor reference in condition");
            return Ok(());
        };

        let Some(monitor) = self.store.get_monitor(monitor_id)? else {
            warn!(rule = %rule.id, monitor_id, "Monitor not found for heartbeat");
            return Ok(());
        };

        let Some(last_value) = self.store.latest_monitor_value(monitor_id)? else {
            // Never computed: nothing to be stale relative to.
            debug!(monitor_id, "No values yet, skipping heartbeat");
            return Ok(());
        };

        let elapsed = now
            .signed_duration_since(last_value.computed_at)
            .num_seconds();

        if elapsed > rule.heartbeat_interval_s {
            self.trigger(rule, &monitor.name, elapsed, now).await
        } else {
            let resolved = self.store.resolve_alert_states(&rule.id, true, now)?;
            if resolved > 0 {
                info!(rule = %rule.id, monitor_id, "Heartbeat recovered");
            }
            Ok(())
        }
    }

    async fn trigger(
        &self,
        rule: &AlertRule,
        monitor_name: &str,
        elapsed: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let active = self.store.active_alert_state(&rule.id, true)?;

        if let Some(state) = &active {
            let since_last = now
                .signed_duration_since(state.last_notified_at)
                .num_seconds();
            if since_last < rule.cooldown_s {
                debug!(rule = %rule.id, "Heartbeat alert in cooldown");
                return Ok(());
            }
        }

        let state_level = format!("heartbeat_{}", rule.level.as_str());
        let title = format!("Heartbeat: {}", rule.name);
        let message = format!(
            "No data for monitor '{}' for {}s (expected every {}s)",
            monitor_name, elapsed, rule.heartbeat_interval_s
        );

        info!(rule = %rule.id, elapsed, "💔 Heartbeat breach: {}", monitor_name);
        dispatch_alert(
            &self.store,
            self.notifier.as_ref(),
            self.dashboard_url.as_deref(),
            &state_level,
            &title,
            &message,
        )
        .await;

        match active {
            Some(state) => self.store.touch_alert_state(state.id, now)?,
            None => {
                self.store
                    .create_alert_state(&rule.id, &state_level, now)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::RecordingNotifier;
    use crate::models::AlertLevel;
    use crate::store::test_util::temp_store;
    use crate::store::{AlertRuleSpec, MonitorSpec, TargetSpec};
    use chrono::Duration;

    fn setup() -> (
        tempfile::TempDir,
        Arc<Store>,
        Arc<RecordingNotifier>,
        HeartbeatChecker,
    ) {
        let (dir, store) = temp_store();
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::default());
        let checker = HeartbeatChecker::new(store.clone(), notifier.clone(), None);

        store
            .create_monitor(&MonitorSpec {
                id: "m2".to_string(),
                name: "M2".to_string(),
                formula: "${webhook:w}".to_string(),
                unit: None,
                color: None,
                description: None,
                decimal_places: 2,
                enabled: true,
                heartbeat_interval_s: 120,
            })
            .unwrap();
        store
            .create_alert_rule(&AlertRuleSpec {
                id: "r2".to_string(),
                name: "R2".to_string(),
                condition: "${monitor:m2} > 0".to_string(),
                level: AlertLevel::High,
                enabled: true,
                cooldown_s: 300,
                heartbeat_enabled: true,
                heartbeat_interval_s: 120,
            })
            .unwrap();
        store
            .create_target(&TargetSpec {
                name: "t".to_string(),
                recipient_key: "k".to_string(),
                api_token: None,
                enabled: true,
                min_level: AlertLevel::Low,
            })
            .unwrap();

        (dir, store, notifier, checker)
    }

    #[test]
    fn monitor_ref_extraction() {
        assert_eq!(extract_monitor_ref("${monitor:m1} > 100"), Some("m1"));
        assert_eq!(
            extract_monitor_ref("abs(${monitor:a} - ${monitor:b}) > 1"),
            Some("a")
        );
        assert_eq!(extract_monitor_ref("${webhook:x} > 1"), None);
        assert_eq!(extract_monitor_ref("${monitor:}"), None);
    }

    #[tokio::test]
    async fn stale_value_triggers_heartbeat_alert() {
        let (_dir, store, notifier, checker) = setup();
        let now = Utc::now();

        // Last value 200s ago, interval 120s: breached.
        store
            .insert_monitor_value("m2", 1.0, now - Duration::seconds(200), &[])
            .unwrap();

        checker.tick(now).await.unwrap();

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, "heartbeat_high");
        assert!(sent[0].message.contains("120"));
        drop(sent);

        let state = store.active_alert_state("r2", true).unwrap().unwrap();
        assert_eq!(state.level, "heartbeat_high");
    }

    #[tokio::test]
    async fn fresh_value_resolves_active_heartbeat() {
        let (_dir, store, notifier, checker) = setup();
        let now = Utc::now();

        store
            .insert_monitor_value("m2", 1.0, now - Duration::seconds(200), &[])
            .unwrap();
        checker.tick(now).await.unwrap();
        assert!(store.active_alert_state("r2", true).unwrap().is_some());

        // New data arrives; the next tick resolves the alert.
        store.insert_monitor_value("m2", 2.0, now, &[]).unwrap();
        checker.tick(now + Duration::seconds(30)).await.unwrap();

        assert!(store.active_alert_state("r2", true).unwrap().is_none());
        assert_eq!(notifier.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn no_values_yet_means_no_alert() {
        let (_dir, _store, notifier, checker) = setup();
        checker.tick(Utc::now()).await.unwrap();
        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_cooldown_suppresses_spam() {
        let (_dir, store, notifier, checker) = setup();
        let now = Utc::now();
        store
            .insert_monitor_value("m2", 1.0, now - Duration::seconds(500), &[])
            .unwrap();

        checker.tick(now).await.unwrap();
        checker.tick(now + Duration::seconds(30)).await.unwrap();
        assert_eq!(notifier.sent.lock().len(), 1);

        checker.tick(now + Duration::seconds(301)).await.unwrap();
        assert_eq!(notifier.sent.lock().len(), 2);
    }
}
