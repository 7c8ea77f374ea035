//! Push-notification contract and the Pushover implementation.
//!
//! The rest of the system only knows `send(target, level, title, message,
//! url)`; tier-specific priority, sound and retry/expire semantics live
//! entirely in here.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::models::{base_level, AlertLevel, NotificationTarget};
use crate::scrapers::default_client;

const PUSHOVER_API: &str = "https://api.pushover.net/1/messages.json";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification. `level` may carry a `heartbeat_` prefix;
    /// implementations dispatch on the base tier.
    async fn send(
        &self,
        target: &NotificationTarget,
        level: &str,
        title: &str,
        message: &str,
        url: Option<&str>,
    ) -> Result<()>;
}

pub struct PushoverNotifier {
    client: Client,
    default_token: Option<String>,
}

impl PushoverNotifier {
    pub fn new(default_token: Option<String>) -> Self {
        PushoverNotifier {
            client: default_client(),
            default_token,
        }
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn send(
        &self,
        target: &NotificationTarget,
        level: &str,
        title: &str,
        message: &str,
        url: Option<&str>,
    ) -> Result<()> {
        let tier = base_level(level).unwrap_or(AlertLevel::Medium);
        let Some(token) = target.api_token.clone().or_else(|| self.default_token.clone()) else {
            bail!("no API token configured for target '{}'", target.name);
        };

        let mut form: Vec<(&str, String)> = vec![
            ("token", token),
            ("user", target.recipient_key.clone()),
            ("message", message.to_string()),
            ("title", title.to_string()),
            ("priority", tier.priority().to_string()),
            ("sound", tier.sound().to_string()),
        ];

        // Emergency priority requires a retry/expire window.
        if let Some((retry, expire)) = tier.retry_expire() {
            form.push(("retry", retry.to_string()));
            form.push(("expire", expire.to_string()));
        }

        if let Some(url) = url {
            form.push(("url", url.to_string()));
            form.push(("url_title", "View Dashboard".to_string()));
        }

        let resp = self
            .client
            .post(PUSHOVER_API)
            .form(&form)
            .send()
            .await
            .context("POST pushover message")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("pushover rejected notification: {} {}", status, body);
        }

        Ok(())
    }
}

/// Test double that records every send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: parking_lot::Mutex<Vec<SentNotification>>,
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub target_name: String,
    pub level: String,
    pub title: String,
    pub message: String,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        target: &NotificationTarget,
        level: &str,
        title: &str,
        message: &str,
        _url: Option<&str>,
    ) -> Result<()> {
        self.sent.lock().push(SentNotification {
            target_name: target.name.clone(),
            level: level.to_string(),
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}
