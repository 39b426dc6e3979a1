//! Private WebSocket: authenticates with HMAC-SHA256 over
//! `GET{auth_path}{expires}` and subscribes to order/execution/position/
//! wallet topics so the daemon learns about fills without polling REST.

use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio_tungstenite::tungstenite::Message;

type HmacSha256 = Hmac<Sha256>;

const AUTH_PATH: &str = "/realtime";

#[derive(Debug, Clone)]
pub enum PrivateWsEvent {
    Order(serde_json::Value),
    Execution(serde_json::Value),
    Position(serde_json::Value),
    Wallet(serde_json::Value),
}

pub struct PrivateWsClient {
    url: String,
    api_key: String,
    api_secret: String,
}

impl PrivateWsClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self { url: url.into(), api_key: api_key.into(), api_secret: api_secret.into() }
    }

    fn auth_signature(&self, expires_ms: i64) -> Result<String, String> {
        let payload = format!("GET{AUTH_PATH}{expires_ms}");
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).map_err(|e| e.to_string())?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Connects, authenticates, subscribes to `topics`, and forwards every
    /// parsed event to `on_event` until the stream drops or `on_event`
    /// returns `false`. Callers own reconnection (typically the daemon's
    /// private-ingestion task loop, which retries with the same backoff used
    /// for every other long-lived connection in this service).
    pub async fn run<F>(&self, topics: &[&str], mut on_event: F) -> Result<(), String>
    where
        F: FnMut(PrivateWsEvent) -> bool,
    {
        let (mut ws, _) = tokio_tungstenite::connect_async(&self.url).await.map_err(|e| e.to_string())?;

        let expires_ms = chrono::Utc::now().timestamp_millis() + 10_000;
        let signature = self.auth_signature(expires_ms)?;
        let auth = serde_json::json!({ "op": "auth", "args": [self.api_key, expires_ms, signature] });
        ws.send(Message::Text(auth.to_string())).await.map_err(|e| e.to_string())?;

        let sub = serde_json::json!({ "op": "subscribe", "args": topics });
        ws.send(Message::Text(sub.to_string())).await.map_err(|e| e.to_string())?;

        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(txt)) => {
                    if let Some(event) = parse_private_push(&txt) {
                        if !on_event(event) {
                            break;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }
}

fn parse_private_push(text: &str) -> Option<PrivateWsEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let topic = value.get("topic")?.as_str()?;
    let data = value.get("data")?.clone();
    match topic {
        "order" => Some(PrivateWsEvent::Order(data)),
        "execution" => Some(PrivateWsEvent::Execution(data)),
        "position" => Some(PrivateWsEvent::Position(data)),
        "wallet" => Some(PrivateWsEvent::Wallet(data)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_signature_is_deterministic() {
        let client = PrivateWsClient::new("wss://example", "key", "secret");
        let a = client.auth_signature(1_700_000_000_000).unwrap();
        let b = client.auth_signature(1_700_000_000_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn auth_signature_changes_with_expires() {
        let client = PrivateWsClient::new("wss://example", "key", "secret");
        let a = client.auth_signature(1).unwrap();
        let b = client.auth_signature(2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn parses_order_topic() {
        let txt = r#"{"topic":"order","data":[{"orderId":"1"}]}"#;
        matches!(parse_private_push(txt), Some(PrivateWsEvent::Order(_)));
    }
}
