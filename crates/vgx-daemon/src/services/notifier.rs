//! Notifier service task set: consumes `execution_reports`/`risk_events`,
//! turns them into severity-gated notifications via `vgx-notifier`, and
//! runs the persistent retry loop over rows the delivery attempt left
//! FAILED.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use vgx_broker::Broker;
use vgx_config::Config;
use vgx_db::notifications;
use vgx_notifier::{candidate_from_envelope, MessageSink, NotifierConfig, NotifierHost, NullSink, TelegramSink};
use vgx_schemas::Payload;

const CONSUMER_GROUP: &str = "notifier";
const BLOCK_MS: usize = 5_000;
const STREAMS: [&str; 2] = ["execution_reports", "risk_events"];

pub fn spawn(cfg: Arc<Config>, broker: Broker, pool: PgPool, run_id: Uuid, engine_id: String) {
    tokio::spawn(async move {
        if let Err(e) = run(cfg, broker, pool, run_id, engine_id).await {
            tracing::error!(error = %e, "notifier service exited");
        }
    });
}

async fn run(cfg: Arc<Config>, broker: Broker, pool: PgPool, _run_id: Uuid, engine_id: String) -> anyhow::Result<()> {
    for stream in STREAMS {
        broker.ensure_group(stream, CONSUMER_GROUP).await.ok();
    }

    let notifier_cfg = NotifierConfig {
        telegram_bot_token: cfg.telegram_bot_token.clone(),
        telegram_chat_id: cfg.telegram_chat_id.clone(),
        max_attempts: cfg.notifier_max_attempts,
        retry_loop_interval_secs: cfg.notifier_retry_interval_secs,
        http_timeout_secs: 10,
    };

    if notifier_cfg.telegram_enabled() {
        let sink = TelegramSink::new(
            notifier_cfg.telegram_bot_token.clone().unwrap_or_default(),
            notifier_cfg.telegram_chat_id.clone().unwrap_or_default(),
            notifier_cfg.http_timeout_secs,
        );
        let host = Arc::new(NotifierHost::new(sink, notifier_cfg));
        spawn_retry_loop(pool.clone(), Arc::clone(&host));
        run_consume_loop(&broker, &pool, &engine_id, host).await
    } else {
        let host = Arc::new(NotifierHost::new(NullSink, notifier_cfg));
        spawn_retry_loop(pool.clone(), Arc::clone(&host));
        run_consume_loop(&broker, &pool, &engine_id, host).await
    }
}

async fn run_consume_loop<S: MessageSink + Send + Sync + 'static>(
    broker: &Broker,
    pool: &PgPool,
    engine_id: &str,
    host: Arc<NotifierHost<S>>,
) -> anyhow::Result<()> {
    let consumer = format!("{engine_id}-notifier");

    loop {
        for stream in STREAMS {
            let messages = match broker.read_group(stream, CONSUMER_GROUP, &consumer, 32, BLOCK_MS).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, stream, "notifier read_group failed");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            for msg in messages {
                let envelope = match msg.envelope {
                    Ok(e) => e,
                    Err(e) => {
                        let _ = broker
                            .dead_letter(stream, CONSUMER_GROUP, &msg.id, &e.to_string(), serde_json::Value::Null)
                            .await;
                        continue;
                    }
                };

                if !matches!(envelope.payload, Payload::ExecutionReport(_) | Payload::RiskEvent(_)) {
                    broker.ack(stream, CONSUMER_GROUP, &msg.id).await.ok();
                    continue;
                }

                let now_ms = Utc::now().timestamp_millis();
                if let Some(candidate) = candidate_from_envelope(stream, &msg.id, &envelope, now_ms) {
                    if let Err(e) = notifications::insert_notification_if_absent(pool, &candidate).await {
                        tracing::error!(error = %e, "insert_notification_if_absent failed");
                    }
                    let existing = notifications::get_notification(pool, candidate.notification_id)
                        .await
                        .unwrap_or(None);
                    let resolved = host.dispatch(candidate, existing, now_ms).await;
                    if let Err(e) = notifications::save_notification(pool, &resolved).await {
                        tracing::error!(error = %e, "save_notification failed");
                    }
                }

                broker.ack(stream, CONSUMER_GROUP, &msg.id).await.ok();
            }
        }
    }
}

fn spawn_retry_loop<S: MessageSink + Send + Sync + 'static>(pool: PgPool, host: Arc<NotifierHost<S>>) {
    tokio::spawn(async move {
        let interval_secs = host.config().retry_loop_interval_secs.max(1);
        let max_attempts = host.config().max_attempts;
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let now_ms = Utc::now().timestamp_millis();
            let due = match notifications::list_due_failed_notifications(&pool, now_ms, max_attempts, 50).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(error = %e, "list_due_failed_notifications failed");
                    continue;
                }
            };
            for rec in due {
                let updated = host.retry(rec, now_ms).await;
                if let Err(e) = notifications::save_notification(&pool, &updated).await {
                    tracing::error!(error = %e, "save_notification failed");
                }
            }
        }
    });
}
