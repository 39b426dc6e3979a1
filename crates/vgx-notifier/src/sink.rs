//! Outbound delivery boundary. `TelegramSink` posts to the Bot API the same
//! way the original urllib client did; `NullSink` is for when no messenger
//! is configured — it logs and reports success so a deployment without
//! Telegram credentials never piles up FAILED rows at the retry ceiling.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug)]
pub enum TelegramError {
    Transport(String),
    Api { status: u16, body: String },
}

impl fmt::Display for TelegramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelegramError::Transport(msg) => write!(f, "telegram transport error: {msg}"),
            TelegramError::Api { status, body } => write!(f, "telegram api error {status}: {body}"),
        }
    }
}

impl std::error::Error for TelegramError {}

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Logs the message via `tracing` and always reports success.
pub struct NullSink;

#[async_trait]
impl MessageSink for NullSink {
    async fn send(&self, text: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(text, "notifier: no messenger configured, logging only");
        Ok(())
    }
}

pub struct TelegramSink {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { http, bot_token: bot_token.into(), chat_id: chat_id.into() }
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(&self, text: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let resp = self
            .http
            .post(&url)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await
            .map_err(|e| TelegramError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Box::new(TelegramError::Api { status: status.as_u16(), body }));
        }
        Ok(())
    }
}
