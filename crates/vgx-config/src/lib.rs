use std::env;

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Typed runtime configuration, loaded once from environment variables at
/// process start. Every field here corresponds to a `VGX_*` variable.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub exchange_base_url: String,
    pub exchange_ws_public_url: String,
    pub exchange_ws_private_url: String,
    pub exchange_api_key: String,
    pub exchange_api_secret: String,
    pub symbols: Vec<String>,
    pub auto_timeframes: Vec<String>,
    pub min_confirmations: u32,
    pub gap_tolerance_bars: u32,
    pub max_concurrent_positions: u32,
    /// Fraction of equity risked per trade: raw_qty = equity*risk_pct / unit_risk.
    pub risk_pct: f64,
    pub qty_step: f64,
    pub min_qty: f64,
    pub risk_daily_loss_limit_pct: f64,
    pub risk_max_drawdown_pct: f64,
    pub cooldown_secs: u64,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub notifier_max_attempts: u32,
    pub notifier_retry_interval_secs: u64,
    pub daemon_bind_addr: String,
    pub execution_mode: ExecutionMode,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Live,
    Paper,
    Backtest,
}

impl std::str::FromStr for ExecutionMode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LIVE" => Ok(ExecutionMode::Live),
            "PAPER" => Ok(ExecutionMode::Paper),
            "BACKTEST" => Ok(ExecutionMode::Backtest),
            other => anyhow::bail!("unknown VGX_EXECUTION_MODE: {other}"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    /// Reads all `VGX_*` variables, applying the defaults listed in the
    /// configuration spec. Required variables (database/redis/exchange
    /// credentials) missing at LIVE startup are a fatal-startup error;
    /// everything else falls back to its documented default.
    pub fn from_env() -> Result<Self> {
        let execution_mode: ExecutionMode = env_or("VGX_EXECUTION_MODE", "PAPER").parse()?;

        let database_url = env::var("VGX_DATABASE_URL")
            .context("VGX_DATABASE_URL is required")?;
        let redis_url = env_or("VGX_REDIS_URL", "redis://127.0.0.1:6379");

        let exchange_api_key = env::var("VGX_EXCHANGE_API_KEY").unwrap_or_default();
        let exchange_api_secret = env::var("VGX_EXCHANGE_API_SECRET").unwrap_or_default();
        if execution_mode == ExecutionMode::Live
            && (exchange_api_key.is_empty() || exchange_api_secret.is_empty())
        {
            anyhow::bail!("VGX_EXCHANGE_API_KEY / VGX_EXCHANGE_API_SECRET are required in LIVE mode");
        }

        Ok(Self {
            database_url,
            redis_url,
            exchange_base_url: env_or("VGX_EXCHANGE_BASE_URL", "https://api.bybit.com"),
            exchange_ws_public_url: env_or(
                "VGX_EXCHANGE_WS_PUBLIC_URL",
                "wss://stream.bybit.com/v5/public/linear",
            ),
            exchange_ws_private_url: env_or(
                "VGX_EXCHANGE_WS_PRIVATE_URL",
                "wss://stream.bybit.com/v5/private",
            ),
            exchange_api_key,
            exchange_api_secret,
            symbols: env_list("VGX_SYMBOLS", &["BTCUSDT"]),
            auto_timeframes: env_list("VGX_AUTO_TIMEFRAMES", &["1h", "4h", "1d"]),
            min_confirmations: env_or("VGX_MIN_CONFIRMATIONS", "2").parse()?,
            gap_tolerance_bars: env_or("VGX_GAP_TOLERANCE_BARS", "0").parse()?,
            max_concurrent_positions: env_or("VGX_MAX_CONCURRENT_POSITIONS", "5").parse()?,
            risk_pct: env_or("VGX_RISK_PCT", "0.01").parse()?,
            qty_step: env_or("VGX_QTY_STEP", "0.001").parse()?,
            min_qty: env_or("VGX_MIN_QTY", "0.001").parse()?,
            risk_daily_loss_limit_pct: env_or("VGX_RISK_DAILY_LOSS_LIMIT_PCT", "3.0").parse()?,
            risk_max_drawdown_pct: env_or("VGX_RISK_MAX_DRAWDOWN_PCT", "10.0").parse()?,
            cooldown_secs: env_or("VGX_COOLDOWN_SECS", "900").parse()?,
            telegram_bot_token: env::var("VGX_TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("VGX_TELEGRAM_CHAT_ID").ok(),
            notifier_max_attempts: env_or("VGX_NOTIFIER_MAX_ATTEMPTS", "8").parse()?,
            notifier_retry_interval_secs: env_or("VGX_NOTIFIER_RETRY_INTERVAL_SECS", "5").parse()?,
            daemon_bind_addr: env_or("VGX_DAEMON_ADDR", "127.0.0.1:8080"),
            execution_mode,
            log_level: env_or("VGX_LOG_LEVEL", "info"),
        })
    }

    /// Canonicalizes the config's JSON view (stable key order) and SHA-256
    /// hashes it, so every run's effective configuration is auditable.
    pub fn hashed(&self) -> Result<HashedConfig> {
        let value = serde_json::to_value(ConfigView::from(self))?;
        let canonical = canonicalize_json(&value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let config_hash = hex::encode(hasher.finalize());
        Ok(HashedConfig {
            canonical_json: canonical,
            config_hash,
        })
    }

    /// Assigns each configured symbol a stable numeric `symbol_id`: the
    /// 1-based index into `symbols` sorted lexically. No symbol registry
    /// table exists in `vgx-db`, so this is the one convention every
    /// consumer (the live daemon, `vgx-cli`'s backtest/replay commands) must
    /// derive the same way rather than invent its own mapping.
    pub fn symbol_id_map(&self) -> std::collections::BTreeMap<String, i64> {
        let mut sorted = self.symbols.clone();
        sorted.sort();
        sorted
            .into_iter()
            .enumerate()
            .map(|(i, s)| (s, (i + 1) as i64))
            .collect()
    }
}

/// Serializable view of `Config` with secrets redacted — this is what gets
/// hashed and what appears in audit output, never the raw secret fields.
#[derive(Debug, Clone, serde::Serialize)]
struct ConfigView {
    exchange_base_url: String,
    symbols: Vec<String>,
    auto_timeframes: Vec<String>,
    min_confirmations: u32,
    gap_tolerance_bars: u32,
    max_concurrent_positions: u32,
    risk_pct: f64,
    qty_step: f64,
    min_qty: f64,
    risk_daily_loss_limit_pct: f64,
    risk_max_drawdown_pct: f64,
    cooldown_secs: u64,
    execution_mode: String,
}

impl From<&Config> for ConfigView {
    fn from(c: &Config) -> Self {
        Self {
            exchange_base_url: c.exchange_base_url.clone(),
            symbols: c.symbols.clone(),
            auto_timeframes: c.auto_timeframes.clone(),
            min_confirmations: c.min_confirmations,
            gap_tolerance_bars: c.gap_tolerance_bars,
            max_concurrent_positions: c.max_concurrent_positions,
            risk_pct: c.risk_pct,
            qty_step: c.qty_step,
            min_qty: c.min_qty,
            risk_daily_loss_limit_pct: c.risk_daily_loss_limit_pct,
            risk_max_drawdown_pct: c.risk_max_drawdown_pct,
            cooldown_secs: c.cooldown_secs,
            execution_mode: format!("{:?}", c.execution_mode),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HashedConfig {
    pub canonical_json: String,
    pub config_hash: String,
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
