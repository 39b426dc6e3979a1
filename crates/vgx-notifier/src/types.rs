/// Runtime configuration for the notifier service.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Attempts ceiling; once reached a FAILED row is no longer due for retry.
    pub max_attempts: u32,
    pub retry_loop_interval_secs: u64,
    pub http_timeout_secs: u64,
}

impl NotifierConfig {
    pub fn sane_defaults() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            max_attempts: 8,
            retry_loop_interval_secs: 5,
            http_timeout_secs: 10,
        }
    }

    /// Mirrors the original deployment's fallback: with no bot token/chat id
    /// configured, the notifier records notifications but never dials out.
    pub fn telegram_enabled(&self) -> bool {
        self.telegram_bot_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.telegram_chat_id.as_deref().is_some_and(|c| !c.is_empty())
    }
}
