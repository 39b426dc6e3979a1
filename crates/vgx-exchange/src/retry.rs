//! Bounded retry with exponential backoff for exchange REST calls.
//!
//! Mirrors the reconnect-backoff shape used by the stream layer (double the
//! delay on each failure, cap it, reset on success) but applied per-call
//! instead of per-connection.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1 << attempt.min(16));
        scaled.min(self.max_delay)
    }
}

/// HTTP status codes worth retrying: 429 (rate limited), 5xx (upstream fault),
/// and 0 (used by callers to signal a transport-level failure).
pub fn classify_retryable(status: u16) -> bool {
    status == 429 || status == 0 || (500..600).contains(&status)
}

/// Parses a `Retry-After` header value, accepting either a delay in seconds
/// or an HTTP-date is intentionally unsupported — only the seconds form is
/// required by the venues this crate targets.
pub fn retry_after_ms(header_value: Option<&str>) -> Option<u64> {
    header_value?.trim().parse::<u64>().ok().map(|secs| secs * 1000)
}

/// Runs `f` up to `policy.max_attempts` times. `f` returns `Err((status,
/// err))` on failure; `status` of `0` marks a transport failure with no HTTP
/// status. Honors an explicit `retry_after_ms` override over the policy's
/// own backoff when the server names one.
pub async fn with_retry<F, Fut, T, E>(policy: RetryPolicy, retry_after_ms: Option<u64>, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, (u16, E)>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err((status, err)) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !classify_retryable(status) {
                    return Err(err);
                }
                let wait = retry_after_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| policy.delay_for_attempt(attempt));
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(classify_retryable(429));
        assert!(classify_retryable(500));
        assert!(classify_retryable(0));
        assert!(!classify_retryable(400));
        assert!(!classify_retryable(404));
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn with_retry_gives_up_on_non_retryable_status() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<(), &'static str> = with_retry(policy, None, || {
            calls += 1;
            async { Err((400u16, "bad request")) }
        })
        .await;
        assert_eq!(result, Err("bad request"));
        assert_eq!(calls, 1);
    }
}
