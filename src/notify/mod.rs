//! Owner notifications.
//!
//! The engine pushes plain-text status messages to owners through the
//! `Notifier` trait; it does not care about the transport. The shipped
//! implementation posts to the Telegram Bot API (the chat surface the
//! service fronts). `NullNotifier` is for tests and headless runs.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Delivers a message to owner X. Implementations must not block the
/// engine on delivery problems beyond their own request timeout.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner: i64, text: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Pushes messages through the Telegram Bot API.
pub struct TelegramNotifier {
    http: Client,
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, bot_token })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, owner: i64, text: &str) -> Result<()> {
        let url = format!("{TELEGRAM_API}/bot{}/sendMessage", self.bot_token);
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "chat_id": owner, "text": text }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(owner, %status, "Telegram send failed");
            return Err(Error::Transport(format!(
                "telegram sendMessage {status}: {body}"
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Null sink
// ---------------------------------------------------------------------------

/// Logs messages instead of delivering them.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, owner: i64, text: &str) -> Result<()> {
        debug!(owner, text, "Notification (null sink)");
        Ok(())
    }
}
