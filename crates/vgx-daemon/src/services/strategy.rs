//! Strategy service task set: consumes closed bars off the `bars` stream,
//! drives one process-wide `StrategyHost`, and persists+publishes any
//! resulting `Signal`/`TradePlan`.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use vgx_broker::Broker;
use vgx_config::Config;
use vgx_schemas::Payload;
use vgx_strategy::{StrategyConfig, StrategyHost};

const CONSUMER_GROUP: &str = "strategy";
const BLOCK_MS: usize = 5_000;
const BATCH: usize = 32;

pub fn spawn(cfg: Arc<Config>, broker: Broker, pool: PgPool, run_id: Uuid, engine_id: String) {
    tokio::spawn(async move {
        if let Err(e) = run(cfg, broker, pool, run_id, engine_id).await {
            tracing::error!(error = %e, "strategy service exited");
        }
    });
}

async fn run(cfg: Arc<Config>, broker: Broker, pool: PgPool, run_id: Uuid, engine_id: String) -> anyhow::Result<()> {
    broker.ensure_group("bars", CONSUMER_GROUP).await.ok();

    let mut strategy_cfg = StrategyConfig::default();
    strategy_cfg.auto_timeframes = cfg
        .auto_timeframes
        .iter()
        .filter_map(|s| match s.as_str() {
            "1h" => Some(vgx_schemas::Timeframe::H1),
            "4h" => Some(vgx_schemas::Timeframe::H4),
            "8h" => Some(vgx_schemas::Timeframe::H8),
            "1d" => Some(vgx_schemas::Timeframe::D1),
            _ => None,
        })
        .collect();

    let mut host = StrategyHost::new(strategy_cfg);
    for (symbol, symbol_id) in cfg.symbol_id_map() {
        host.register_symbol(symbol_id, symbol);
    }

    let consumer = format!("{engine_id}-strategy");

    loop {
        let messages = match broker.read_group("bars", CONSUMER_GROUP, &consumer, BATCH, BLOCK_MS).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "strategy read_group failed");
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                continue;
            }
        };

        for msg in messages {
            let envelope = match msg.envelope {
                Ok(e) => e,
                Err(e) => {
                    let _ = broker
                        .dead_letter("bars", CONSUMER_GROUP, &msg.id, &e.to_string(), serde_json::Value::Null)
                        .await;
                    continue;
                }
            };

            let Payload::BarClose(bar) = envelope.payload else {
                broker.ack("bars", CONSUMER_GROUP, &msg.id).await.ok();
                continue;
            };

            let now_ms = Utc::now().timestamp_millis();
            if let Some(output) = host.on_bar_close(bar, now_ms) {
                handle_output(&broker, &pool, run_id, &engine_id, envelope.event_id, output).await;
            }

            broker.ack("bars", CONSUMER_GROUP, &msg.id).await.ok();
        }
    }
}

async fn handle_output(
    broker: &Broker,
    pool: &PgPool,
    run_id: Uuid,
    engine_id: &str,
    causation_id: Uuid,
    output: vgx_strategy::StrategyOutput,
) {
    let signal = output.signal;
    match vgx_db::entities::insert_signal_if_absent(pool, &signal).await {
        Ok(true) => {}
        Ok(false) => return, // duplicate idempotency key: already processed
        Err(e) => {
            tracing::error!(error = %e, "insert_signal_if_absent failed");
            return;
        }
    }

    let signal_envelope = vgx_schemas::EventEnvelope::new(
        run_id,
        engine_id.to_string(),
        "signals",
        "Signal",
        Uuid::new_v4(),
        Some(causation_id),
        Utc::now(),
        Payload::Signal(signal),
    );
    if let Err(e) = broker.publish("signals", &signal_envelope).await {
        tracing::error!(error = %e, "signal publish failed");
    }

    if let Some(plan) = output.trade_plan {
        if let Err(e) = vgx_db::entities::insert_trade_plan(pool, &plan).await {
            tracing::error!(error = %e, "insert_trade_plan failed");
            return;
        }
        let plan_envelope = vgx_schemas::EventEnvelope::new(
            run_id,
            engine_id.to_string(),
            "trade_plans",
            "TradePlan",
            Uuid::new_v4(),
            Some(causation_id),
            Utc::now(),
            Payload::TradePlan(plan),
        );
        if let Err(e) = broker.publish("trade_plans", &plan_envelope).await {
            tracing::error!(error = %e, "trade_plan publish failed");
        }
    }
}
