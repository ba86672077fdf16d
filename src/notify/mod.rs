//! Notification sink: where human-readable status lines go
//!
//! Delivery is fire-and-forget from the caller's point of view: a sink logs
//! its own failures and never hands an error back to the orchestrator.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{defaults, NotifyConfig};
use crate::runner::truncate_chars;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one message. Failures are logged, never returned.
    async fn send(&self, text: &str);
}

/// Writes messages to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, text: &str) {
        info!(target: "hostwarden::notify", "{text}");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Built with the URL stripped: it carries the bot token.
    #[error("request failed: {0}")]
    Http(reqwest::Error),
    #[error("Bot API rejected message: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Sends messages to one Telegram chat through the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramSink {
    client: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: TELEGRAM_API.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Point at a different Bot API host.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": truncate_chars(text, defaults::NOTIFY_MAX_CHARS),
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(defaults::NOTIFY_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.without_url()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: truncate_chars(&body, 200),
            })
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, text: &str) {
        if let Err(e) = self.deliver(text).await {
            warn!(error = %e, "Notification delivery failed");
        }
    }
}

/// Telegram when both token and chat id are configured, otherwise the log.
pub fn sink_from_config(config: &NotifyConfig) -> Arc<dyn NotificationSink> {
    match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat)) => Arc::new(TelegramSink::new(token.clone(), chat.clone())),
        _ => {
            info!("Telegram not configured, notifications go to the log");
            Arc::new(LogSink)
        }
    }
}
