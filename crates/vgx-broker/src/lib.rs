//! Stream broker: Redis Streams wrapped as a consumer-group at-least-once
//! bus, plus the broker-backed advisory lock used to serialize work per
//! idempotency key.
//!
//! The command shapes here follow the `redis` crate usage in
//! `barter-rs-barter-rs/jackbot-data::redis_store` (pipe/cmd, not the typed
//! `AsyncCommands` trait, so XADD/XREADGROUP/XGROUP CREATE — none of which
//! have first-class helpers on older `redis` releases — stay uniform).

pub mod lock;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use vgx_schemas::codec::{self, DecodeError, WireMessage};
use vgx_schemas::{EventEnvelope, Payload};

#[derive(Clone)]
pub struct Broker {
    client: redis::Client,
}

#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub envelope: Result<EventEnvelope<Payload>, DecodeError>,
}

impl Broker {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Creates the consumer group if it doesn't already exist. Idempotent:
    /// `BUSYGROUP` from Redis is swallowed.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let res: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn publish(&self, stream: &str, envelope: &EventEnvelope<Payload>) -> anyhow::Result<String> {
        let wire = codec::encode(envelope)?;
        let mut conn = self.conn().await?;
        let id: String = conn
            .xadd(stream, "*", &[("type", wire.r#type.as_str()), ("json", wire.json.as_str())])
            .await?;
        Ok(id)
    }

    /// Publishes a raw wire message to an arbitrary stream (used by the
    /// dead-letter path, which carries a shape other than `EventEnvelope`).
    pub async fn publish_raw(&self, stream: &str, r#type: &str, json: &str) -> anyhow::Result<String> {
        let mut conn = self.conn().await?;
        let id: String = conn.xadd(stream, "*", &[("type", r#type), ("json", json)]).await?;
        Ok(id)
    }

    /// Blocking consumer-group read. `count` caps batch size; `block_ms` is
    /// the server-side block timeout (0 = block forever).
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> anyhow::Result<Vec<StreamMessage>> {
        let mut conn = self.conn().await?;
        let opts = redis::streams::StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .unwrap_or_default();

        let mut out = Vec::new();
        for key in reply.keys {
            for id_entry in key.ids {
                let fields: Vec<(String, String)> = id_entry
                    .map
                    .iter()
                    .filter_map(|(k, v)| match v {
                        redis::Value::BulkString(bytes) => {
                            Some((k.clone(), String::from_utf8_lossy(bytes).into_owned()))
                        }
                        redis::Value::SimpleString(s) => Some((k.clone(), s.clone())),
                        _ => None,
                    })
                    .collect();
                let envelope = codec::decode(&fields);
                out.push(StreamMessage {
                    id: id_entry.id,
                    envelope,
                });
            }
        }
        Ok(out)
    }

    pub async fn ack(&self, stream: &str, group: &str, id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    /// Number of pending (delivered, unacked) entries for this group —
    /// used for lag/backlog observability.
    pub async fn pending_count(&self, stream: &str, group: &str) -> anyhow::Result<i64> {
        let mut conn = self.conn().await?;
        let reply: redis::streams::StreamPendingReply =
            conn.xpending(stream, group).await.unwrap_or(redis::streams::StreamPendingReply::Empty);
        Ok(match reply {
            redis::streams::StreamPendingReply::Empty => 0,
            redis::streams::StreamPendingReply::Data(d) => d.count as i64,
        })
    }

    pub async fn stream_len(&self, stream: &str) -> anyhow::Result<i64> {
        let mut conn = self.conn().await?;
        let len: i64 = conn.xlen(stream).await?;
        Ok(len)
    }

    /// Publishes a malformed/unparseable message to the dead-letter stream
    /// and ACKs the original so the consumer group makes forward progress.
    pub async fn dead_letter(
        &self,
        source_stream: &str,
        group: &str,
        message_id: &str,
        reason: &str,
        raw_fields: serde_json::Value,
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "source_stream": source_stream,
            "message_id": message_id,
            "reason": reason,
            "raw_fields": raw_fields,
        });
        self.publish_raw("dlq", "dead_letter", &body.to_string()).await?;
        self.ack(source_stream, group, message_id).await?;
        Ok(())
    }
}
