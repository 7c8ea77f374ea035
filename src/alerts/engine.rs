//! Alert engine: evaluates rule conditions through the formula engine,
//! enforces per-rule cooldowns via persisted alert states, and dispatches
//! tier-filtered notifications.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{dispatch_alert, Notifier};
use crate::formula::FormulaEngine;
use crate::models::AlertRule;
use crate::store::Store;

/// Float equality tolerance for `==` / `!=` conditions.
const FLOAT_EQ_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Eq => (left - right).abs() < FLOAT_EQ_EPSILON,
            CmpOp::Ne => (left - right).abs() >= FLOAT_EQ_EPSILON,
        }
    }
}

/// Split a condition into `(left, op, right)` at the first comparison
/// operator outside any `${...}` reference. Returns None when no operator is
/// found or either side is empty.
pub fn split_condition(condition: &str) -> Option<(&str, CmpOp, &str)> {
    let bytes = condition.as_bytes();
    let mut inside_ref = false;
    let mut i = 0;

    while i < bytes.len() {
        if inside_ref {
            if bytes[i] == b'}' {
                inside_ref = false;
            }
            i += 1;
            continue;
        }
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            inside_ref = true;
            i += 2;
            continue;
        }

        // Byte-wise scan; only slice two-char ops on char boundaries so
        // multibyte input (unit symbols in text) can't split a codepoint.
        let two = if i + 1 < bytes.len() && condition.is_char_boundary(i + 2) {
            &condition[i..i + 2]
        } else {
            ""
        };
        let (op, width) = match two {
            ">=" => (Some(CmpOp::Ge), 2),
            "<=" => (Some(CmpOp::Le), 2),
            "==" => (Some(CmpOp::Eq), 2),
            "!=" => (Some(CmpOp::Ne), 2),
            _ => match bytes[i] {
                b'>' => (Some(CmpOp::Gt), 1),
                b'<' => (Some(CmpOp::Lt), 1),
                _ => (None, 1),
            },
        };

        if let Some(op) = op {
            let left = condition[..i].trim();
            let right = condition[i + width..].trim();
            if left.is_empty() || right.is_empty() {
                return None;
            }
            return Some((left, op, right));
        }
        i += width;
    }

    None
}

pub struct AlertEngine {
    store: Arc<Store>,
    formula: Arc<FormulaEngine>,
    notifier: Arc<dyn Notifier>,
    dashboard_url: Option<String>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<Store>,
        formula: Arc<FormulaEngine>,
        notifier: Arc<dyn Notifier>,
        dashboard_url: Option<String>,
    ) -> Self {
        AlertEngine {
            store,
            formula,
            notifier,
            dashboard_url,
        }
    }

    /// Evaluate a condition. `None` means it cannot be evaluated right now
    /// (bad syntax or an unresolved dependency) and the tick skips it
    /// silently.
    pub fn evaluate_condition(&self, condition: &str) -> Option<bool> {
        let (left_expr, op, right_expr) = match split_condition(condition) {
            Some(parts) => parts,
            None => {
                warn!(condition, "Invalid condition format");
                return None;
            }
        };

        let left = self.formula.evaluate(left_expr)?;
        let right = self.formula.evaluate(right_expr)?;
        Some(op.apply(left, right))
    }

    /// Representative value for the notification text: the condition's left
    /// side (falling back to the right).
    fn condition_value(&self, condition: &str) -> Option<f64> {
        let (left_expr, _, right_expr) = split_condition(condition)?;
        self.formula
            .evaluate(left_expr)
            .or_else(|| self.formula.evaluate(right_expr))
    }

    /// One evaluation pass over every enabled rule. Rules are processed
    /// serially, so two ticks can never interleave on the same rule.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let rules = self.store.list_alert_rules(true)?;
        debug!(count = rules.len(), "Checking alert rules");

        for rule in rules {
            match self.evaluate_condition(&rule.condition) {
                Some(true) => {
                    if let Err(e) = self.handle_triggered(&rule, now).await {
                        warn!(rule = %rule.id, error = %e, "Failed to process triggered alert");
                    }
                }
                Some(false) => {
                    if let Err(e) = self.handle_cleared(&rule, now) {
                        warn!(rule = %rule.id, error = %e, "Failed to resolve alert");
                    }
                }
                None => {
                    debug!(rule = %rule.id, "Condition unresolved, skipping");
                }
            }
        }

        Ok(())
    }

    async fn handle_triggered(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<()> {
        let active = self.store.active_alert_state(&rule.id, false)?;

        if let Some(state) = &active {
            let since_last = now
                .signed_duration_since(state.last_notified_at)
                .num_seconds();
            if since_last < rule.cooldown_s {
                debug!(
                    rule = %rule.id,
                    since_last,
                    cooldown = rule.cooldown_s,
                    "Alert in cooldown"
                );
                return Ok(());
            }
        }

        let message = match self.condition_value(&rule.condition) {
            Some(value) => format!(
                "Alert condition met: {} (current value: {})",
                rule.condition, value
            ),
            None => format!("Alert condition met: {}", rule.condition),
        };

        info!(rule = %rule.id, level = rule.level.as_str(), "🚨 Alert triggered: {}", rule.name);
        dispatch_alert(
            &self.store,
            self.notifier.as_ref(),
            self.dashboard_url.as_deref(),
            rule.level.as_str(),
            &rule.name,
            &message,
        )
        .await;

        // State advances even if every target failed, so a broken notifier
        // can't turn one breach into a notification storm later.
        match active {
            Some(state) => self.store.touch_alert_state(state.id, now)?,
            None => {
                self.store
                    .create_alert_state(&rule.id, rule.level.as_str(), now)?;
            }
        }

        Ok(())
    }

    fn handle_cleared(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<()> {
        let resolved = self.store.resolve_alert_states(&rule.id, false, now)?;
        if resolved > 0 {
            info!(rule = %rule.id, "Alert cleared: {}", rule.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::RecordingNotifier;
    use crate::models::{AlertLevel, NewSample};
    use crate::store::test_util::temp_store;
    use crate::store::{AlertRuleSpec, MonitorSpec, TargetSpec};
    use chrono::Duration;

    fn setup() -> (
        tempfile::TempDir,
        Arc<Store>,
        Arc<RecordingNotifier>,
        AlertEngine,
    ) {
        let (dir, store) = temp_store();
        let store = Arc::new(store);
        let formula = Arc::new(FormulaEngine::new(store.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = AlertEngine::new(store.clone(), formula, notifier.clone(), None);
        (dir, store, notifier, engine)
    }

    fn feed(store: &Store, source_id: &str, value: f64) {
        store
            .insert_sample(&NewSample {
                source_id: source_id.to_string(),
                value: Some(value),
                status: "active".to_string(),
                timestamp: Utc::now(),
                ..Default::default()
            })
            .unwrap();
    }

    fn monitor(store: &Store, id: &str, formula: &str) {
        store
            .create_monitor(&MonitorSpec {
                id: id.to_string(),
                name: id.to_string(),
                formula: formula.to_string(),
                unit: None,
                color: None,
                description: None,
                decimal_places: 2,
                enabled: true,
                heartbeat_interval_s: 0,
            })
            .unwrap();
    }

    fn rule(store: &Store, id: &str, condition: &str, level: AlertLevel, cooldown_s: i64) {
        store
            .create_alert_rule(&AlertRuleSpec {
                id: id.to_string(),
                name: id.to_string(),
                condition: condition.to_string(),
                level,
                enabled: true,
                cooldown_s,
                heartbeat_enabled: false,
                heartbeat_interval_s: 0,
            })
            .unwrap();
    }

    fn target(store: &Store, name: &str, min_level: AlertLevel) {
        store
            .create_target(&TargetSpec {
                name: name.to_string(),
                recipient_key: "key".to_string(),
                api_token: None,
                enabled: true,
                min_level,
            })
            .unwrap();
    }

    #[test]
    fn condition_splitting() {
        let (left, op, right) = split_condition("${monitor:m1} > 100").unwrap();
        assert_eq!(left, "${monitor:m1}");
        assert_eq!(op, CmpOp::Gt);
        assert_eq!(right, "100");

        let (left, op, right) =
            split_condition("abs(${monitor:spread}) >= ${monitor:threshold}").unwrap();
        assert_eq!(left, "abs(${monitor:spread})");
        assert_eq!(op, CmpOp::Ge);
        assert_eq!(right, "${monitor:threshold}");

        let (_, op, _) = split_condition("${monitor:a} != 0").unwrap();
        assert_eq!(op, CmpOp::Ne);

        // Operators inside references must not split the condition.
        assert!(split_condition("${monitor:a>b}").is_none());
        assert!(split_condition("${monitor:a} + 1").is_none());
        assert!(split_condition("> 100").is_none());

        // Multibyte input must not panic the scanner.
        assert!(split_condition("€€€").is_none());
        let (left, _, right) = split_condition("${monitor:eur} > 10€").unwrap();
        assert_eq!(left, "${monitor:eur}");
        assert_eq!(right, "10€");
    }

    #[test]
    fn float_equality_uses_epsilon() {
        assert!(CmpOp::Eq.apply(1.0, 1.0 + 1e-12));
        assert!(!CmpOp::Eq.apply(1.0, 1.0 + 1e-9));
        assert!(CmpOp::Ne.apply(1.0, 1.1));
        assert!(!CmpOp::Ne.apply(1.0, 1.0));
    }

    #[tokio::test]
    async fn triggered_rule_notifies_and_creates_state() {
        let (_dir, store, notifier, engine) = setup();
        feed(&store, "pricing", 150.0);
        monitor(&store, "m1", "${webhook:pricing}");
        rule(&store, "r1", "${monitor:m1} > 100", AlertLevel::High, 300);
        target(&store, "t1", AlertLevel::Medium);

        engine.tick(Utc::now()).await.unwrap();

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, "high");
        assert!(sent[0].message.contains("150"));
        drop(sent);

        let state = store.active_alert_state("r1", false).unwrap().unwrap();
        assert_eq!(state.level, "high");
        assert_eq!(state.notification_count, 1);
    }

    #[tokio::test]
    async fn cooldown_suppresses_renotification() {
        let (_dir, store, notifier, engine) = setup();
        feed(&store, "pricing", 150.0);
        monitor(&store, "m1", "${webhook:pricing}");
        rule(&store, "r1", "${monitor:m1} > 100", AlertLevel::High, 300);
        target(&store, "t1", AlertLevel::Low);

        let t0 = Utc::now();
        engine.tick(t0).await.unwrap();
        engine.tick(t0 + Duration::seconds(60)).await.unwrap();
        assert_eq!(notifier.sent.lock().len(), 1);

        // Past the cooldown the same active state re-notifies and counts up.
        engine.tick(t0 + Duration::seconds(301)).await.unwrap();
        assert_eq!(notifier.sent.lock().len(), 2);
        let state = store.active_alert_state("r1", false).unwrap().unwrap();
        assert_eq!(state.notification_count, 2);
    }

    #[tokio::test]
    async fn cleared_condition_resolves_state() {
        let (_dir, store, notifier, engine) = setup();
        feed(&store, "pricing", 150.0);
        monitor(&store, "m1", "${webhook:pricing}");
        rule(&store, "r1", "${monitor:m1} > 100", AlertLevel::Medium, 300);
        target(&store, "t1", AlertLevel::Low);

        let t0 = Utc::now();
        engine.tick(t0).await.unwrap();
        assert!(store.active_alert_state("r1", false).unwrap().is_some());

        feed(&store, "pricing", 50.0);
        engine.tick(t0 + Duration::seconds(30)).await.unwrap();

        let state = store.active_alert_state("r1", false).unwrap();
        assert!(state.is_none());
        assert_eq!(notifier.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn unresolved_condition_is_skipped_silently() {
        let (_dir, store, notifier, engine) = setup();
        monitor(&store, "m1", "${webhook:never}");
        rule(&store, "r1", "${monitor:m1} > 100", AlertLevel::High, 300);
        target(&store, "t1", AlertLevel::Low);

        engine.tick(Utc::now()).await.unwrap();
        assert!(notifier.sent.lock().is_empty());
        assert!(store.active_alert_state("r1", false).unwrap().is_none());
    }

    #[tokio::test]
    async fn targets_filter_by_min_level() {
        let (_dir, store, notifier, engine) = setup();
        feed(&store, "pricing", 150.0);
        monitor(&store, "m1", "${webhook:pricing}");
        rule(&store, "r1", "${monitor:m1} > 100", AlertLevel::Medium, 300);
        target(&store, "low_bar", AlertLevel::Low);
        target(&store, "high_bar", AlertLevel::Critical);

        engine.tick(Utc::now()).await.unwrap();

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target_name, "low_bar");
    }

    #[tokio::test]
    async fn at_most_one_active_state_per_rule() {
        let (_dir, store, _notifier, engine) = setup();
        feed(&store, "pricing", 150.0);
        monitor(&store, "m1", "${webhook:pricing}");
        rule(&store, "r1", "${monitor:m1} > 100", AlertLevel::High, 0);
        target(&store, "t1", AlertLevel::Low);

        let t0 = Utc::now();
        // Zero cooldown: every tick re-notifies, but the state row is reused.
        engine.tick(t0).await.unwrap();
        engine.tick(t0 + Duration::seconds(1)).await.unwrap();
        engine.tick(t0 + Duration::seconds(2)).await.unwrap();

        let state = store.active_alert_state("r1", false).unwrap().unwrap();
        assert_eq!(state.notification_count, 3);

        // Resolve reports how many rows it flipped: exactly the one state.
        assert_eq!(store.resolve_alert_states("r1", false, t0).unwrap(), 1);
    }
}
