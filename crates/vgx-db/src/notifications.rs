//! Persistence for the `notifications` table backing `vgx-notifier`.
//!
//! `notification_id` doubles as the idempotency key (it's the source event's
//! `event_id`), so `insert_notification_if_absent` is a no-op on redelivery
//! and the retry loop's due-query drives `mark_sent`/`mark_failed`.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use vgx_schemas::{Notification, NotificationStatus, Severity};

fn status_str(s: NotificationStatus) -> &'static str {
    match s {
        NotificationStatus::Pending => "PENDING",
        NotificationStatus::Sent => "SENT",
        NotificationStatus::Failed => "FAILED",
    }
}

fn parse_status(s: &str) -> NotificationStatus {
    match s {
        "SENT" => NotificationStatus::Sent,
        "FAILED" => NotificationStatus::Failed,
        _ => NotificationStatus::Pending,
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Info => "INFO",
        Severity::Important => "IMPORTANT",
        Severity::Critical => "CRITICAL",
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "IMPORTANT" => Severity::Important,
        "CRITICAL" => Severity::Critical,
        _ => Severity::Info,
    }
}

fn row_to_notification(row: sqlx::postgres::PgRow) -> Result<Notification> {
    Ok(Notification {
        notification_id: row.try_get("notification_id")?,
        stream: row.try_get("stream")?,
        message_id: row.try_get("message_id")?,
        severity: parse_severity(&row.try_get::<String, _>("severity")?),
        text: row.try_get("text")?,
        status: parse_status(&row.try_get::<String, _>("status")?),
        attempts: row.try_get::<i32, _>("attempts")? as u32,
        next_attempt_at_ms: row.try_get("next_attempt_at_ms")?,
        last_error: row.try_get("last_error")?,
        created_at_ms: row.try_get("created_at_ms")?,
    })
}

/// Insert a PENDING notification row if one doesn't already exist for this
/// `notification_id`. Idempotent under at-least-once stream redelivery.
pub async fn insert_notification_if_absent(pool: &PgPool, n: &Notification) -> Result<()> {
    sqlx::query(
        r#"
        insert into notifications (
          notification_id, stream, message_id, severity, text, status,
          attempts, next_attempt_at_ms, last_error, created_at_ms
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        on conflict (notification_id) do nothing
        "#,
    )
    .bind(n.notification_id)
    .bind(&n.stream)
    .bind(&n.message_id)
    .bind(severity_str(n.severity))
    .bind(&n.text)
    .bind(status_str(n.status))
    .bind(n.attempts as i32)
    .bind(n.next_attempt_at_ms)
    .bind(&n.last_error)
    .bind(n.created_at_ms)
    .execute(pool)
    .await
    .context("insert_notification_if_absent failed")?;
    Ok(())
}

pub async fn get_notification(
    pool: &PgPool,
    notification_id: uuid::Uuid,
) -> Result<Option<Notification>> {
    let row = sqlx::query(
        r#"
        select notification_id, stream, message_id, severity, text, status,
               attempts, next_attempt_at_ms, last_error, created_at_ms
        from notifications
        where notification_id = $1
        "#,
    )
    .bind(notification_id)
    .fetch_optional(pool)
    .await
    .context("get_notification failed")?;

    row.map(row_to_notification).transpose()
}

/// Overwrite a row with the state the caller computed (via
/// `vgx_notifier::NotifierHost`). Used after both a successful send and a
/// failed-with-backoff attempt.
pub async fn save_notification(pool: &PgPool, n: &Notification) -> Result<()> {
    sqlx::query(
        r#"
        update notifications
        set status = $2,
            attempts = $3,
            next_attempt_at_ms = $4,
            last_error = $5
        where notification_id = $1
        "#,
    )
    .bind(n.notification_id)
    .bind(status_str(n.status))
    .bind(n.attempts as i32)
    .bind(n.next_attempt_at_ms)
    .bind(&n.last_error)
    .execute(pool)
    .await
    .context("save_notification failed")?;
    Ok(())
}

/// Notifications due for a retry attempt: FAILED, scheduled in the past,
/// under the attempts ceiling. Ordered oldest-due-first.
pub async fn list_due_failed_notifications(
    pool: &PgPool,
    now_ms: i64,
    max_attempts: u32,
    limit: i64,
) -> Result<Vec<Notification>> {
    let rows = sqlx::query(
        r#"
        select notification_id, stream, message_id, severity, text, status,
               attempts, next_attempt_at_ms, last_error, created_at_ms
        from notifications
        where status = 'FAILED'
          and next_attempt_at_ms is not null
          and next_attempt_at_ms <= $1
          and attempts < $2
        order by next_attempt_at_ms asc
        limit $3
        "#,
    )
    .bind(now_ms)
    .bind(max_attempts as i32)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_due_failed_notifications failed")?;

    rows.into_iter().map(row_to_notification).collect()
}
