//! Alerting: tiered rule evaluation, cooldown bookkeeping, heartbeat
//! staleness checks and push-notification dispatch.

pub mod engine;
pub mod heartbeat;
pub mod notifier;

pub use engine::AlertEngine;
pub use heartbeat::HeartbeatChecker;
pub use notifier::{Notifier, PushoverNotifier};

use tracing::{info, warn};

use crate::models::base_level;
use crate::store::Store;

/// Fan a notification out to every enabled target whose `min_level` admits
/// the alert's tier. Individual target failures are logged and skipped; the
/// alert state advances regardless. Returns how many sends succeeded.
pub(crate) async fn dispatch_alert(
    store: &Store,
    notifier: &dyn Notifier,
    dashboard_url: Option<&str>,
    state_level: &str,
    title: &str,
    message: &str,
) -> usize {
    let Some(level) = base_level(state_level) else {
        warn!(state_level, "Unknown alert level, nothing dispatched");
        return 0;
    };

    let targets = match store.list_targets(true) {
        Ok(targets) => targets,
        Err(e) => {
            warn!(error = %e, "Failed to list notification targets");
            return 0;
        }
    };

    let mut sent = 0usize;
    for target in targets.iter().filter(|t| level >= t.min_level) {
        match notifier
            .send(target, state_level, title, message, dashboard_url)
            .await
        {
            Ok(()) => {
                info!(target = %target.name, title, "🚨 Notification sent");
                sent += 1;
            }
            Err(e) => {
                warn!(target = %target.name, error = %e, "Notification failed");
            }
        }
    }
    sent
}
