//! Wires `engine`'s pure decisions to a `MessageSink`. Persistence (the
//! `existing` lookup passed in, and writing the returned record back out)
//! stays the caller's job.

use vgx_schemas::{EventEnvelope, Notification, NotificationStatus, Payload, RiskEventKind, Severity};

use crate::engine::{apply_send_result, decide_dispatch, is_due_for_retry, DispatchAction};
use crate::sink::MessageSink;
use crate::templates::render_event_text;
use crate::types::NotifierConfig;

/// Builds the PENDING candidate for an inbound envelope, or `None` if the
/// payload isn't one the notifier pages on (only `execution_report` /
/// `risk_event` streams feed this — `bar_close`/`signal`/`trade_plan` never
/// reach the notifier's consumer group).
pub fn candidate_from_envelope(
    stream: &str,
    message_id: &str,
    env: &EventEnvelope<Payload>,
    now_ms: i64,
) -> Option<Notification> {
    let severity = match &env.payload {
        Payload::ExecutionReport(r) => severity_of_execution_report(r),
        Payload::RiskEvent(e) => severity_of_risk_event(e),
        _ => return None,
    };
    Some(Notification {
        notification_id: env.event_id,
        stream: stream.to_string(),
        message_id: message_id.to_string(),
        severity,
        text: render_event_text(&env.payload),
        status: NotificationStatus::Pending,
        attempts: 0,
        next_attempt_at_ms: None,
        last_error: None,
        created_at_ms: now_ms,
    })
}

fn severity_of_execution_report(r: &vgx_schemas::ExecutionReport) -> Severity {
    use vgx_schemas::OrderStatus::*;
    match r.status {
        Rejected => Severity::Critical,
        Cancelled => Severity::Important,
        _ => Severity::Info,
    }
}

fn severity_of_risk_event(e: &vgx_schemas::RiskEvent) -> Severity {
    match e.kind {
        RiskEventKind::ConsistencyDrift | RiskEventKind::PriceJump => Severity::Critical,
        RiskEventKind::DataGap
        | RiskEventKind::WsReconnect
        | RiskEventKind::DuplicateOrRevisedBar
        | RiskEventKind::VolumeAnomaly => Severity::Important,
    }
}

pub struct NotifierHost<S: MessageSink> {
    sink: S,
    cfg: NotifierConfig,
}

impl<S: MessageSink> NotifierHost<S> {
    pub fn new(sink: S, cfg: NotifierConfig) -> Self {
        Self { sink, cfg }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.cfg
    }

    /// Runs once per inbound stream message. `existing` is the caller's
    /// lookup of any prior record for this `notification_id`; the caller
    /// always ACKs the stream message afterward regardless of the outcome
    /// here, so a stuck FAILED row never triggers a redelivery storm.
    pub async fn dispatch(
        &self,
        candidate: Notification,
        existing: Option<Notification>,
        now_ms: i64,
    ) -> Notification {
        let severity = candidate.severity;
        match decide_dispatch(existing.as_ref(), severity) {
            DispatchAction::AlreadySent => existing.expect("AlreadySent implies existing is Some"),
            DispatchAction::RecordOnly => existing.unwrap_or(candidate),
            DispatchAction::AttemptSend => {
                let mut rec = existing.unwrap_or(candidate);
                self.attempt(&mut rec, now_ms).await;
                rec
            }
        }
    }

    /// Runs once per row the retry loop's due-query surfaces.
    pub async fn retry(&self, mut rec: Notification, now_ms: i64) -> Notification {
        if is_due_for_retry(&rec, now_ms, self.cfg.max_attempts) {
            self.attempt(&mut rec, now_ms).await;
        }
        rec
    }

    async fn attempt(&self, rec: &mut Notification, now_ms: i64) {
        let result = self.sink.send(&rec.text).await.map_err(|e| e.to_string());
        apply_send_result(rec, now_ms, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingSink {
        calls: AtomicUsize,
        fail_until: usize,
    }

    #[async_trait]
    impl MessageSink for CountingSink {
        async fn send(&self, _text: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_until {
                Err("simulated failure".into())
            } else {
                Ok(())
            }
        }
    }

    fn candidate(severity: Severity) -> Notification {
        Notification {
            notification_id: Uuid::new_v4(),
            stream: "risk_event".to_string(),
            message_id: "1-0".to_string(),
            severity,
            text: "boom".to_string(),
            status: NotificationStatus::Pending,
            attempts: 0,
            next_attempt_at_ms: None,
            last_error: None,
            created_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn info_severity_never_attempts_a_send() {
        let host = NotifierHost::new(
            CountingSink { calls: AtomicUsize::new(0), fail_until: 0 },
            NotifierConfig::sane_defaults(),
        );
        let rec = host.dispatch(candidate(Severity::Info), None, 1_000).await;
        assert_eq!(rec.status, NotificationStatus::Pending);
        assert_eq!(host.sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn critical_severity_sends_and_marks_sent_on_success() {
        let host = NotifierHost::new(
            CountingSink { calls: AtomicUsize::new(0), fail_until: 0 },
            NotifierConfig::sane_defaults(),
        );
        let rec = host.dispatch(candidate(Severity::Critical), None, 1_000).await;
        assert_eq!(rec.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn already_sent_is_never_resent() {
        let host = NotifierHost::new(
            CountingSink { calls: AtomicUsize::new(0), fail_until: 0 },
            NotifierConfig::sane_defaults(),
        );
        let mut sent = candidate(Severity::Critical);
        sent.status = NotificationStatus::Sent;
        let rec = host.dispatch(candidate(Severity::Critical), Some(sent), 1_000).await;
        assert_eq!(rec.status, NotificationStatus::Sent);
        assert_eq!(host.sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_send_schedules_a_retry_and_is_picked_up_once_due() {
        let host = NotifierHost::new(
            CountingSink { calls: AtomicUsize::new(0), fail_until: 1 },
            NotifierConfig::sane_defaults(),
        );
        let rec = host.dispatch(candidate(Severity::Critical), None, 1_000).await;
        assert_eq!(rec.status, NotificationStatus::Failed);
        assert_eq!(rec.attempts, 1);

        let not_due = host.retry(rec.clone(), 1_000).await;
        assert_eq!(not_due.attempts, 1, "retry before next_attempt_at_ms must be a no-op");

        let due_at = rec.next_attempt_at_ms.unwrap();
        let retried = host.retry(rec, due_at).await;
        assert_eq!(retried.status, NotificationStatus::Sent);
    }
}
