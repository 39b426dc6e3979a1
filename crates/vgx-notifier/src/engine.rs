//! Pure decision logic: severity gating, backoff schedule, retry-due check.
//! No IO here — `host.rs` wires this against a `MessageSink`.

use vgx_schemas::{Notification, NotificationStatus, Severity};

pub const MAX_BACKOFF_SECS: i64 = 300;

/// `2^(attempts-1)` seconds, capped at `MAX_BACKOFF_SECS`. `attempts == 0`
/// (not yet tried) backs off zero.
pub fn backoff_seconds(attempts: u32) -> i64 {
    if attempts == 0 {
        return 0;
    }
    2i64.saturating_pow(attempts - 1).min(MAX_BACKOFF_SECS)
}

/// Only WARNING/CRITICAL events page out; INFO is recorded but never sent.
pub fn should_page(severity: Severity) -> bool {
    matches!(severity, Severity::Important | Severity::Critical)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    /// A SENT record already exists for this `notification_id` — ack
    /// without resending.
    AlreadySent,
    /// Below paging severity — record only, no send attempted.
    RecordOnly,
    /// Attempt an outbound send now.
    AttemptSend,
}

pub fn decide_dispatch(existing: Option<&Notification>, severity: Severity) -> DispatchAction {
    if let Some(rec) = existing {
        if rec.status == NotificationStatus::Sent {
            return DispatchAction::AlreadySent;
        }
    }
    if !should_page(severity) {
        return DispatchAction::RecordOnly;
    }
    DispatchAction::AttemptSend
}

/// A FAILED record is due for retry once `next_attempt_at_ms` has passed
/// and attempts haven't reached the configured ceiling.
pub fn is_due_for_retry(rec: &Notification, now_ms: i64, max_attempts: u32) -> bool {
    rec.status == NotificationStatus::Failed
        && rec.attempts < max_attempts
        && rec.next_attempt_at_ms.is_some_and(|t| t <= now_ms)
}

/// Applies the outcome of an attempted send in place.
pub fn apply_send_result(rec: &mut Notification, now_ms: i64, result: Result<(), String>) {
    match result {
        Ok(()) => {
            rec.status = NotificationStatus::Sent;
            rec.last_error = None;
        }
        Err(err) => {
            rec.attempts += 1;
            rec.status = NotificationStatus::Failed;
            rec.next_attempt_at_ms = Some(now_ms + backoff_seconds(rec.attempts) * 1000);
            rec.last_error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn rec(status: NotificationStatus, attempts: u32, next: Option<i64>) -> Notification {
        Notification {
            notification_id: Uuid::nil(),
            stream: "execution_report".into(),
            message_id: "1-0".into(),
            severity: Severity::Critical,
            text: "x".into(),
            status,
            attempts,
            next_attempt_at_ms: next,
            last_error: None,
            created_at_ms: 0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_seconds(0), 0);
        assert_eq!(backoff_seconds(1), 1);
        assert_eq!(backoff_seconds(2), 2);
        assert_eq!(backoff_seconds(3), 4);
        assert_eq!(backoff_seconds(10), 300);
        assert_eq!(backoff_seconds(40), 300);
    }

    #[test]
    fn info_severity_is_record_only() {
        assert_eq!(decide_dispatch(None, Severity::Info), DispatchAction::RecordOnly);
    }

    #[test]
    fn already_sent_short_circuits() {
        let existing = rec(NotificationStatus::Sent, 1, None);
        assert_eq!(
            decide_dispatch(Some(&existing), Severity::Critical),
            DispatchAction::AlreadySent
        );
    }

    #[test]
    fn failed_record_is_due_only_past_its_schedule_and_under_ceiling() {
        let due = rec(NotificationStatus::Failed, 2, Some(1_000));
        assert!(is_due_for_retry(&due, 1_000, 8));
        assert!(!is_due_for_retry(&due, 999, 8));

        let exhausted = rec(NotificationStatus::Failed, 8, Some(0));
        assert!(!is_due_for_retry(&exhausted, 1_000, 8));
    }

    #[test]
    fn apply_send_result_failure_schedules_backoff() {
        let mut n = rec(NotificationStatus::Pending, 0, None);
        apply_send_result(&mut n, 1_000, Err("boom".to_string()));
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.attempts, 1);
        assert_eq!(n.next_attempt_at_ms, Some(2_000));
        assert_eq!(n.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn apply_send_result_success_clears_error() {
        let mut n = rec(NotificationStatus::Failed, 3, Some(500));
        n.last_error = Some("previous failure".to_string());
        apply_send_result(&mut n, 1_000, Ok(()));
        assert_eq!(n.status, NotificationStatus::Sent);
        assert_eq!(n.last_error, None);
        assert_eq!(n.attempts, 3, "attempts is not reset on success, only frozen");
    }
}
