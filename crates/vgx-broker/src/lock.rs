//! Broker-backed advisory lock: `SET key token NX PX ttl_ms`, released only
//! if the caller still holds the token it set. Single-node Redis, not
//! Redlock — sufficient for the single-broker deployment this system runs.

use redis::AsyncCommands;
use uuid::Uuid;

use crate::Broker;

pub struct LockGuard {
    key: String,
    token: String,
}

impl Broker {
    /// Attempts to acquire `key` for `ttl_ms`. Returns `None` if already
    /// held by someone else.
    pub async fn try_lock(&self, key: &str, ttl_ms: usize) -> anyhow::Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if acquired {
            Ok(Some(LockGuard {
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Releases a previously acquired lock only if the held value still
    /// matches the token — prevents releasing a lock some other holder
    /// acquired after our TTL expired.
    pub async fn release(&self, guard: LockGuard) -> anyhow::Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let held: Option<String> = conn.get(&guard.key).await?;
        if held.as_deref() == Some(guard.token.as_str()) {
            let _: i64 = conn.del(&guard.key).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
