//! REST boundary against the exchange's v5 HTTP API.
//!
//! Prices and quantities are kept as decimal strings exactly as the venue
//! returns them — callers normalize to fixed-point deterministically; no
//! float parsing happens at this boundary.

use std::fmt;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::rate_limit::{Priority, RateLimiter};
use crate::retry::{retry_after_ms, with_retry, RetryPolicy};

type HmacSha256 = Hmac<Sha256>;

/// Application-level retCodes that are safe to retry (exchange-side
/// rate-limit/overload codes, distinct from the HTTP-layer 429).
const RETRYABLE_RET_CODES: &[i64] = &[10006, 10018];

#[derive(Debug)]
pub enum ExchangeError {
    Transport(String),
    Api { ret_code: Option<i64>, message: String },
    Decode(String),
    Config(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Transport(msg) => write!(f, "transport error: {msg}"),
            ExchangeError::Api { ret_code: Some(c), message } => {
                write!(f, "exchange api error retCode={c}: {message}")
            }
            ExchangeError::Api { ret_code: None, message } => {
                write!(f, "exchange api error: {message}")
            }
            ExchangeError::Decode(msg) => write!(f, "decode error: {msg}"),
            ExchangeError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ExchangeError {}

fn is_retryable(status: u16, ret_code: Option<i64>) -> bool {
    crate::retry::classify_retryable(status) || ret_code.is_some_and(|c| RETRYABLE_RET_CODES.contains(&c))
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Kline {
    pub start_ts_ms: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WalletBalance {
    pub coin: String,
    pub wallet_balance: String,
    pub equity: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PositionSnap {
    pub symbol: String,
    pub side: String,
    pub size: String,
    pub avg_price: String,
    pub position_idx: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub qty_step: String,
    pub min_order_qty: String,
    pub tick_size: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub qty: String,
    pub reduce_only: bool,
    pub order_link_id: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub order_link_id: String,
}

/// Endpoint group a call belongs to, each with its own rate-limit bucket.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EndpointGroup {
    Public,
    PrivateCritical,
    PrivateOrderQuery,
    PrivateAccountQuery,
}

pub struct ExchangeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    retry_policy: RetryPolicy,
    public_limiter: RateLimiter,
    private_critical_limiter: RateLimiter,
    private_order_query_limiter: RateLimiter,
    private_account_query_limiter: RateLimiter,
}

impl ExchangeClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        public_rps: usize,
        private_critical_rps: usize,
        private_order_query_rps: usize,
        private_account_query_rps: usize,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            retry_policy: RetryPolicy::default(),
            public_limiter: RateLimiter::new(public_rps, Duration::from_secs(1)),
            private_critical_limiter: RateLimiter::new(private_critical_rps, Duration::from_secs(1)),
            private_order_query_limiter: RateLimiter::new(private_order_query_rps, Duration::from_secs(1)),
            private_account_query_limiter: RateLimiter::new(private_account_query_rps, Duration::from_secs(1)),
        }
    }

    fn limiter(&self, group: EndpointGroup) -> &RateLimiter {
        match group {
            EndpointGroup::Public => &self.public_limiter,
            EndpointGroup::PrivateCritical => &self.private_critical_limiter,
            EndpointGroup::PrivateOrderQuery => &self.private_order_query_limiter,
            EndpointGroup::PrivateAccountQuery => &self.private_account_query_limiter,
        }
    }

    fn sign(&self, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Config(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn signed_get(
        &self,
        group: EndpointGroup,
        path: &str,
        query: &str,
    ) -> Result<serde_json::Value, ExchangeError> {
        self.limiter(group).acquire(Priority::Normal).await;
        let recv_window = "5000";
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let to_sign = format!("{timestamp}{}{recv_window}{query}", self.api_key);
        let signature = self.sign(&to_sign)?;

        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };

        with_retry(self.retry_policy, None, || async {
            let resp = self
                .http
                .get(&url)
                .header("X-BAPI-API-KEY", &self.api_key)
                .header("X-BAPI-TIMESTAMP", &timestamp)
                .header("X-BAPI-RECV-WINDOW", recv_window)
                .header("X-BAPI-SIGN", &signature)
                .send()
                .await
                .map_err(|e| (0u16, ExchangeError::Transport(e.to_string())))?;
            handle_response(resp).await
        })
        .await
    }

    pub async fn get_klines(&self, symbol: &str, interval: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Kline>, ExchangeError> {
        self.public_limiter.acquire(Priority::Normal).await;
        let url = format!(
            "{}/v5/market/kline?category=linear&symbol={symbol}&interval={interval}&start={start_ms}&end={end_ms}",
            self.base_url
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let value = handle_response(resp).await.map_err(|(_, e)| e)?;
        parse_klines(value)
    }

    pub async fn get_wallet_balance(&self) -> Result<Vec<WalletBalance>, ExchangeError> {
        let value = self
            .signed_get(EndpointGroup::PrivateAccountQuery, "/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;
        parse_list(value, "list")
    }

    pub async fn get_positions(&self, symbol: &str) -> Result<Vec<PositionSnap>, ExchangeError> {
        let query = format!("category=linear&symbol={symbol}");
        let value = self
            .signed_get(EndpointGroup::PrivateAccountQuery, "/v5/position/list", &query)
            .await?;
        parse_list(value, "list")
    }

    pub async fn get_order_realtime(&self, symbol: &str, order_id: &str) -> Result<serde_json::Value, ExchangeError> {
        let query = format!("category=linear&symbol={symbol}&orderId={order_id}");
        self.signed_get(EndpointGroup::PrivateOrderQuery, "/v5/order/realtime", &query).await
    }

    pub async fn get_instruments_info(&self, symbol: &str) -> Result<Vec<Instrument>, ExchangeError> {
        self.public_limiter.acquire(Priority::Normal).await;
        let url = format!("{}/v5/market/instruments-info?category=linear&symbol={symbol}", self.base_url);
        let resp = self.http.get(&url).send().await.map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let value = handle_response(resp).await.map_err(|(_, e)| e)?;
        parse_list(value, "list")
    }

    pub async fn place_order(&self, req: &PlaceOrderRequest) -> Result<OrderAck, ExchangeError> {
        self.private_critical_limiter.acquire(Priority::High).await;
        let body = serde_json::to_string(req).map_err(|e| ExchangeError::Decode(e.to_string()))?;
        let value = self.signed_post(EndpointGroup::PrivateCritical, "/v5/order/create", &body).await?;
        parse_one(value)
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderAck, ExchangeError> {
        self.private_critical_limiter.acquire(Priority::High).await;
        let body = serde_json::json!({ "category": "linear", "symbol": symbol, "orderId": order_id }).to_string();
        let value = self.signed_post(EndpointGroup::PrivateCritical, "/v5/order/cancel", &body).await?;
        parse_one(value)
    }

    pub async fn set_trading_stop(&self, symbol: &str, stop_loss: Option<&str>, take_profit: Option<&str>) -> Result<(), ExchangeError> {
        self.private_critical_limiter.acquire(Priority::High).await;
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "stopLoss": stop_loss,
            "takeProfit": take_profit,
        })
        .to_string();
        self.signed_post(EndpointGroup::PrivateCritical, "/v5/position/trading-stop", &body).await?;
        Ok(())
    }

    async fn signed_post(&self, group: EndpointGroup, path: &str, body: &str) -> Result<serde_json::Value, ExchangeError> {
        let recv_window = "5000";
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let to_sign = format!("{timestamp}{}{recv_window}{body}", self.api_key);
        let signature = self.sign(&to_sign)?;
        let url = format!("{}{path}", self.base_url);

        with_retry(self.retry_policy, None, || async {
            let resp = self
                .http
                .post(&url)
                .header("X-BAPI-API-KEY", &self.api_key)
                .header("X-BAPI-TIMESTAMP", &timestamp)
                .header("X-BAPI-RECV-WINDOW", recv_window)
                .header("X-BAPI-SIGN", &signature)
                .header("Content-Type", "application/json")
                .body(body.to_string())
                .send()
                .await
                .map_err(|e| (0u16, ExchangeError::Transport(e.to_string())))?;
            handle_response(resp).await
        })
        .await
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<serde_json::Value, (u16, ExchangeError)> {
    let status = resp.status().as_u16();
    let retry_after = retry_after_ms(resp.headers().get("Retry-After").and_then(|v| v.to_str().ok()));
    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| (status, ExchangeError::Decode(e.to_string())))?;

    let ret_code = body.get("retCode").and_then(|v| v.as_i64());
    if let Some(code) = ret_code {
        if code != 0 {
            let message = body
                .get("retMsg")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            if is_retryable(status, Some(code)) {
                let _ = retry_after;
                return Err((status, ExchangeError::Api { ret_code: Some(code), message }));
            }
            return Err((0, ExchangeError::Api { ret_code: Some(code), message }));
        }
    }
    if !(200..300).contains(&status) {
        return Err((status, ExchangeError::Transport(format!("http status {status}"))));
    }
    Ok(body)
}

fn parse_klines(value: serde_json::Value) -> Result<Vec<Kline>, ExchangeError> {
    let rows = value
        .pointer("/result/list")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ExchangeError::Decode("missing result.list".into()))?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let arr = row.as_array().ok_or_else(|| ExchangeError::Decode("kline row not array".into()))?;
        if arr.len() < 6 {
            return Err(ExchangeError::Decode("kline row too short".into()));
        }
        out.push(Kline {
            start_ts_ms: arr[0]
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ExchangeError::Decode("bad start_ts".into()))?,
            open: arr[1].as_str().unwrap_or_default().to_string(),
            high: arr[2].as_str().unwrap_or_default().to_string(),
            low: arr[3].as_str().unwrap_or_default().to_string(),
            close: arr[4].as_str().unwrap_or_default().to_string(),
            volume: arr[5].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(out)
}

fn parse_list<T: serde::de::DeserializeOwned>(value: serde_json::Value, key: &str) -> Result<Vec<T>, ExchangeError> {
    let list = value
        .pointer(&format!("/result/{key}"))
        .cloned()
        .ok_or_else(|| ExchangeError::Decode(format!("missing result.{key}")))?;
    serde_json::from_value(list).map_err(|e| ExchangeError::Decode(e.to_string()))
}

fn parse_one<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, ExchangeError> {
    let result = value
        .get("result")
        .cloned()
        .ok_or_else(|| ExchangeError::Decode("missing result".into()))?;
    serde_json::from_value(result).map_err(|e| ExchangeError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_ret_codes_recognized() {
        assert!(is_retryable(200, Some(10006)));
        assert!(is_retryable(200, Some(10018)));
        assert!(!is_retryable(200, Some(10001)));
        assert!(is_retryable(429, None));
    }

    #[test]
    fn parse_klines_rejects_short_rows() {
        let value = serde_json::json!({ "result": { "list": [["1", "2"]] } });
        assert!(parse_klines(value).is_err());
    }
}
