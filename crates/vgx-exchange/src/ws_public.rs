//! Public market-data WebSocket: subscribes to kline topics and yields each
//! push as a [`KlineUpdate`]. Reconnection uses the same doubling backoff as
//! [`crate::retry::RetryPolicy`] so a flaky connection degrades the same way
//! a flaky REST call does.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct KlineUpdate {
    pub symbol: String,
    pub interval: String,
    pub start: i64,
    pub end: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    /// `true` only once the bar period has fully closed upstream.
    pub confirm: bool,
}

pub struct PublicWsClient {
    url: String,
    topics: Vec<String>,
    max_backoff: Duration,
}

impl PublicWsClient {
    pub fn new(url: impl Into<String>, topics: Vec<String>) -> Self {
        Self { url: url.into(), topics, max_backoff: Duration::from_secs(30) }
    }

    /// Connects, subscribes to all configured topics, and forwards parsed
    /// kline pushes to `on_update` until the connection drops or `on_update`
    /// returns `false` (caller-requested shutdown). Reconnects with
    /// exponential backoff on every drop; never returns on its own unless
    /// told to stop.
    pub async fn run<F>(&self, mut on_update: F)
    where
        F: FnMut(KlineUpdate) -> bool,
    {
        let mut backoff = Duration::from_millis(500);
        loop {
            match self.connect_and_subscribe().await {
                Ok(mut stream) => {
                    backoff = Duration::from_millis(500);
                    loop {
                        match stream.next().await {
                            Some(Ok(Message::Text(txt))) => {
                                if let Some(update) = parse_kline_push(&txt) {
                                    if !on_update(update) {
                                        return;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "public ws stream error, reconnecting");
                                break;
                            }
                            None => break,
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "public ws connect failed, backing off");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, self.max_backoff);
        }
    }

    async fn connect_and_subscribe(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        tokio_tungstenite::tungstenite::Error,
    > {
        let (mut ws, _) = tokio_tungstenite::connect_async(&self.url).await?;
        let sub = serde_json::json!({ "op": "subscribe", "args": self.topics });
        ws.send(Message::Text(sub.to_string())).await?;
        Ok(ws)
    }
}

fn parse_kline_push(text: &str) -> Option<KlineUpdate> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let topic = value.get("topic")?.as_str()?;
    let symbol = topic.rsplit('.').next()?.to_string();
    let interval = topic.split('.').nth(1)?.to_string();
    let row = value.get("data")?.as_array()?.first()?;
    Some(KlineUpdate {
        symbol,
        interval,
        start: row.get("start")?.as_i64()?,
        end: row.get("end")?.as_i64()?,
        open: row.get("open")?.as_str()?.to_string(),
        high: row.get("high")?.as_str()?.to_string(),
        low: row.get("low")?.as_str()?.to_string(),
        close: row.get("close")?.as_str()?.to_string(),
        volume: row.get("volume")?.as_str()?.to_string(),
        confirm: row.get("confirm").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}
