//! Execution service task set: consumes admitted trade plans off the
//! `trade_plans` stream, runs the admission gate and risk circuit, sizes and
//! stages entry/TP1/TP2 orders, and submits them through the one broker
//! choke-point (`BrokerGateway`) behind the PAPER/LIVE mode adapter.
//!
//! Also consumes `bar_close` off the `bars` stream, interleaved with
//! `trade_plans` in the same task via `tokio::select!` — the mode broker
//! (`PaperBroker` uses `RefCell`) is `!Sync`, so it cannot be shared with a
//! separately spawned task the way the reconcile/snapshotter/abnormal/
//! private-WS loops are. Per bar close: the secondary exit rule (checked
//! once), the PAPER/BACKTEST matching simulator (`vgx_backtest::simulate_bar`)
//! that actually settles TP1/TP2/SL fills, and the runner trailing-stop
//! update (pushed to the exchange in LIVE mode once TP2 has filled).
//!
//! Reconcile-clean gating here is narrowed to a position-only drift check
//! (no open-order listing endpoint exists on `ExchangeClient` to compare
//! order-level state) — order-level reconciliation is covered separately by
//! `vgx-reconcile`'s report-building path used by the CLI's offline
//! reconcile command.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use vgx_backtest::{secondary_rule_violated, simulate_bar, BacktestConfig, OpenPosition};
use vgx_broker::Broker;
use vgx_config::{Config, ExecutionMode};
use vgx_db::entities;
use vgx_exchange::{ExchangeBrokerAdapter, ExchangeClient};
use vgx_execution::{
    build_staged_orders, intent_id_to_client_order_id, split_qty, update_runner_stop,
    BrokerAdapter, BrokerGateway, BrokerSubmitRequest, ExitReason, GateVerdicts, TrailingStopMode,
};
use vgx_indicators::{atr, macd_series, pivots, PivotKind};
use vgx_risk::{
    evaluate, evaluate_admission, AdmissionInput, AdmissionReason, OpenPositionRef, RequestKind,
    RiskConfig, RiskInput, RiskState,
};
use vgx_schemas::{
    Bar, Bias, ExecutionReport, FlagKind, Order, OrderPurpose, OrderStatus, Payload, Position,
    PositionState, Timeframe,
};

const CONSUMER_GROUP: &str = "execution";
const BLOCK_MS: usize = 5_000;
const BARS_BATCH: usize = 32;

enum ModeBroker {
    Paper(vgx_broker_paper::PaperBroker),
    Live(ExchangeBrokerAdapter),
}

impl BrokerAdapter for ModeBroker {
    fn submit_order(
        &self,
        req: BrokerSubmitRequest,
    ) -> Result<vgx_execution::BrokerSubmitResponse, Box<dyn std::error::Error>> {
        match self {
            ModeBroker::Paper(b) => b.submit_order(req),
            ModeBroker::Live(b) => b.submit_order(req),
        }
    }

    fn cancel_order(
        &self,
        order_id: &str,
    ) -> Result<vgx_execution::BrokerCancelResponse, Box<dyn std::error::Error>> {
        match self {
            ModeBroker::Paper(b) => b.cancel_order(order_id),
            ModeBroker::Live(b) => b.cancel_order(order_id),
        }
    }

    fn replace_order(
        &self,
        req: vgx_execution::BrokerReplaceRequest,
    ) -> Result<vgx_execution::BrokerReplaceResponse, Box<dyn std::error::Error>> {
        match self {
            ModeBroker::Paper(b) => b.replace_order(req),
            ModeBroker::Live(b) => b.replace_order(req),
        }
    }
}

fn day_id_from_ms(ms: i64) -> u32 {
    ms.div_euclid(86_400_000) as u32
}

fn pnl_sign(bias: Bias) -> f64 {
    match bias {
        Bias::Long => 1.0,
        Bias::Short => -1.0,
    }
}

/// Latest MACD histogram value over a rolling bar window — same definition
/// `vgx-backtest`'s replay engine uses for the secondary exit rule.
fn macd_hist_now(window: &[Bar], cfg: &vgx_strategy::StrategyConfig) -> f64 {
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
    macd_series(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal)
        .last()
        .map(|m| m.hist)
        .unwrap_or(0.0)
}

/// Recomputes the runner trailing-stop from the rolling window, same rule
/// `vgx-backtest`'s replay engine applies bar by bar.
fn compute_runner_stop(cfg: &BacktestConfig, window: &[Bar], bias: Bias, old_stop: f64, close: f64) -> f64 {
    let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = window.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
    match cfg.runner_trail_mode {
        TrailingStopMode::Atr => {
            let atr_now = atr(&highs, &lows, &closes, cfg.runner_atr_period).last().copied().unwrap_or(0.0);
            update_runner_stop(bias, TrailingStopMode::Atr, old_stop, close, atr_now, cfg.runner_atr_mult, None)
        }
        TrailingStopMode::Pivot => {
            let want = match bias {
                Bias::Long => PivotKind::Low,
                Bias::Short => PivotKind::High,
            };
            let pivot_price = pivots(&highs, &lows, cfg.pivot_width)
                .iter()
                .rev()
                .find(|p| p.kind == want)
                .map(|p| p.price);
            update_runner_stop(bias, TrailingStopMode::Pivot, old_stop, close, 0.0, 0.0, pivot_price)
        }
    }
}

pub fn spawn(cfg: Arc<Config>, broker: Broker, pool: PgPool, run_id: Uuid, engine_id: String) {
    tokio::spawn(async move {
        if let Err(e) = run(cfg, broker, pool, run_id, engine_id).await {
            tracing::error!(error = %e, "execution service exited");
        }
    });
}

async fn run(cfg: Arc<Config>, broker: Broker, pool: PgPool, run_id: Uuid, engine_id: String) -> anyhow::Result<()> {
    broker.ensure_group("trade_plans", CONSUMER_GROUP).await.ok();
    broker.ensure_group("bars", CONSUMER_GROUP).await.ok();

    let mode_broker = match cfg.execution_mode {
        ExecutionMode::Live => {
            let client = ExchangeClient::new(
                cfg.exchange_base_url.clone(),
                cfg.exchange_api_key.clone(),
                cfg.exchange_api_secret.clone(),
                10,
                5,
                10,
                10,
            );
            ModeBroker::Live(ExchangeBrokerAdapter::new(client))
        }
        ExecutionMode::Paper | ExecutionMode::Backtest => ModeBroker::Paper(vgx_broker_paper::PaperBroker::new()),
    };
    let gateway = BrokerGateway::new(mode_broker);

    // Independent REST client for the runner trailing-stop push (spec
    // §4.4.5) — never shared with `gateway`'s mode broker, same as the
    // reconcile/snapshotter/abnormal ticks below each owning their own.
    let live_stop_client = match cfg.execution_mode {
        ExecutionMode::Live => Some(ExchangeClient::new(
            cfg.exchange_base_url.clone(),
            cfg.exchange_api_key.clone(),
            cfg.exchange_api_secret.clone(),
            10,
            5,
            10,
            10,
        )),
        ExecutionMode::Paper | ExecutionMode::Backtest => None,
    };

    let symbol_ids = cfg.symbol_id_map();
    let symbols_by_id: BTreeMap<i64, String> = symbol_ids.iter().map(|(s, id)| (*id, s.clone())).collect();

    // Reconcile-clean is narrowed to position-only comparison; PAPER/BACKTEST
    // never drift against an external venue so it is always clean.
    let reconcile_clean = Arc::new(tokio::sync::RwLock::new(cfg.execution_mode != ExecutionMode::Live));
    if cfg.execution_mode == ExecutionMode::Live {
        spawn_position_reconcile_tick(Arc::clone(&cfg), pool.clone(), Arc::clone(&reconcile_clean));
        spawn_snapshotter(Arc::clone(&cfg), pool.clone());
        spawn_abnormal_tick(Arc::clone(&cfg), pool.clone());
        spawn_private_ws_ingest(Arc::clone(&cfg), pool.clone(), broker.clone(), run_id, engine_id.clone());
    }

    let now_ms = Utc::now().timestamp_millis();
    let day_id = day_id_from_ms(now_ms);
    let initial_equity_micros = latest_equity_micros(&pool).await.unwrap_or(0);
    let mut risk_state = load_or_init_risk_state(&pool, day_id, initial_equity_micros).await?;
    let mut risk_cfg = risk_config_for_equity(&cfg, risk_state.day_start_equity_micros);

    let lifecycle_cfg = BacktestConfig::test_defaults();
    let mut series: BTreeMap<(i64, Timeframe), Vec<Bar>> = BTreeMap::new();
    let mut sim_positions: BTreeMap<i64, OpenPosition> = BTreeMap::new();

    let consumer = format!("{engine_id}-execution");

    loop {
        tokio::select! {
            res = broker.read_group("trade_plans", CONSUMER_GROUP, &consumer, 16, BLOCK_MS) => {
                let messages = match res {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "execution read_group(trade_plans) failed");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        continue;
                    }
                };

                for msg in messages {
                    let envelope = match msg.envelope {
                        Ok(e) => e,
                        Err(e) => {
                            let _ = broker
                                .dead_letter("trade_plans", CONSUMER_GROUP, &msg.id, &e.to_string(), serde_json::Value::Null)
                                .await;
                            continue;
                        }
                    };

                    let Payload::TradePlan(plan) = envelope.payload else {
                        broker.ack("trade_plans", CONSUMER_GROUP, &msg.id).await.ok();
                        continue;
                    };

                    let Some(symbol) = symbols_by_id.get(&plan.symbol_id).cloned() else {
                        broker.ack("trade_plans", CONSUMER_GROUP, &msg.id).await.ok();
                        continue;
                    };

                    let now_ms = Utc::now().timestamp_millis();
                    let new_day_id = day_id_from_ms(now_ms);
                    if new_day_id != risk_state.day_id {
                        risk_cfg = risk_config_for_equity(&cfg, latest_equity_micros(&pool).await.unwrap_or(initial_equity_micros));
                    }

                    if let Err(e) = process_plan(
                        &pool,
                        &broker,
                        &gateway,
                        &cfg,
                        &mut risk_state,
                        &risk_cfg,
                        &reconcile_clean,
                        &lifecycle_cfg,
                        &series,
                        &mut sim_positions,
                        run_id,
                        &engine_id,
                        envelope.event_id,
                        &plan,
                        &symbol,
                        now_ms,
                    )
                    .await
                    {
                        tracing::error!(error = %e, plan_id = %plan.plan_id, "process_plan failed");
                    }

                    broker.ack("trade_plans", CONSUMER_GROUP, &msg.id).await.ok();
                }
            }

            res = broker.read_group("bars", CONSUMER_GROUP, &consumer, BARS_BATCH, BLOCK_MS) => {
                let messages = match res {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "execution read_group(bars) failed");
                        tokio::time::sleep(Duration::from_secs(2)).await;
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

                    if let Err(e) = handle_bar_close(
                        &pool,
                        &broker,
                        &gateway,
                        &cfg,
                        &lifecycle_cfg,
                        live_stop_client.as_ref(),
                        &symbols_by_id,
                        &mut series,
                        &mut sim_positions,
                        &reconcile_clean,
                        run_id,
                        &engine_id,
                        envelope.event_id,
                        bar,
                    )
                    .await
                    {
                        tracing::error!(error = %e, symbol_id = bar.symbol_id, "handle_bar_close failed");
                    }

                    broker.ack("bars", CONSUMER_GROUP, &msg.id).await.ok();
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_plan(
    pool: &PgPool,
    broker: &Broker,
    gateway: &BrokerGateway<ModeBroker>,
    cfg: &Config,
    risk_state: &mut RiskState,
    risk_cfg: &RiskConfig,
    reconcile_clean: &Arc<tokio::sync::RwLock<bool>>,
    lifecycle_cfg: &BacktestConfig,
    series: &BTreeMap<(i64, Timeframe), Vec<Bar>>,
    sim_positions: &mut BTreeMap<i64, OpenPosition>,
    run_id: Uuid,
    engine_id: &str,
    causation_id: Uuid,
    plan: &vgx_schemas::TradePlan,
    symbol: &str,
    now_ms: i64,
) -> anyhow::Result<()> {
    let mut open_positions = Vec::new();
    for &symbol_id in cfg.symbol_id_map().values() {
        if let Some(pos) = entities::fetch_active_position_for_symbol(pool, symbol_id).await? {
            let timeframe_priority = entities::fetch_trade_plan(pool, pos.plan_id)
                .await?
                .map(|p| p.timeframe.rank())
                .unwrap_or(0);
            open_positions.push(OpenPositionRef {
                symbol_id: pos.symbol_id,
                bias: pos.bias,
                timeframe_priority,
            });
        }
    }
    let cooldown_until_ms = entities::fetch_cooldown(pool, plan.symbol_id)
        .await?
        .map(|c| c.until_ms);

    let admission = evaluate_admission(&AdmissionInput {
        symbol_id: plan.symbol_id,
        bias: plan.bias,
        timeframe_priority: plan.timeframe.rank(),
        now_ms,
        plan_expires_at_ms: plan.expires_at_ms,
        open_positions: &open_positions,
        max_concurrent_positions: cfg.max_concurrent_positions,
        cooldown_until_ms,
    });

    let integrity_armed = entities::fetch_runtime_flag(pool, FlagKind::IntegrityArmed)
        .await?
        .map(|f| f.value)
        .unwrap_or(false);
    let verdicts = GateVerdicts {
        integrity_armed,
        risk_allowed: true,
        reconcile_clean: *reconcile_clean.read().await,
    };

    match admission.reason {
        AdmissionReason::Allowed => {}
        AdmissionReason::UpgradeRequiresClose { .. } => {
            if let Some(existing) = entities::fetch_active_position_for_symbol(pool, plan.symbol_id).await? {
                // The plan that wins the mutex is the one displacing
                // `existing` — there is no fresher market tick to close it
                // at, so the incoming plan's own entry price stands in.
                let exit_price = plan.entry_price;
                let realized_pnl = pnl_sign(existing.bias) * (exit_price - existing.entry_avg_price) * existing.qty_open;
                force_close_position(
                    pool,
                    broker,
                    gateway,
                    &verdicts,
                    symbol,
                    &existing,
                    exit_price,
                    realized_pnl,
                    run_id,
                    engine_id,
                    causation_id,
                    ExitReason::MutexUpgrade.as_str(),
                    now_ms,
                )
                .await?;
                sim_positions.remove(&plan.symbol_id);
            }
        }
        _ => {
            tracing::info!(plan_id = %plan.plan_id, reason = ?admission.reason, "plan not admitted");
            return Ok(());
        }
    }

    let equity_micros = latest_equity_micros(pool).await.unwrap_or(risk_state.day_start_equity_micros);
    let risk_input = RiskInput {
        day_id: risk_state.day_id,
        equity_micros,
        reject_window_id: risk_state.reject_window_id,
        request: RequestKind::NewOrder,
        is_risk_reducing: false,
        kill_switch: None,
    };
    let decision = evaluate(risk_cfg, risk_state, &risk_input);
    entities::upsert_risk_state(pool, &risk_state_to_row(risk_state)).await?;

    if !matches!(decision.action, vgx_risk::RiskAction::Allow) {
        tracing::warn!(plan_id = %plan.plan_id, reason = ?decision.reason, "risk engine refused plan");
        return Ok(());
    }

    let unit_risk = (plan.entry_price - plan.stop_price).abs();
    if unit_risk <= 0.0 {
        return Ok(());
    }
    let equity = equity_micros as f64 / vgx_risk::MICROS_SCALE as f64;
    let raw_qty = (equity * cfg.risk_pct) / unit_risk;
    let qty_total = (raw_qty / cfg.qty_step).floor() * cfg.qty_step;
    if qty_total < cfg.min_qty {
        return Ok(());
    }

    let entry_order_type = "Limit";
    let order_id_prefix = plan.plan_id.to_string();
    let staged = build_staged_orders(plan, symbol, qty_total, entry_order_type, &order_id_prefix);

    let position_id = Uuid::new_v4();
    let mut opened_position = false;

    for (purpose, intent) in [
        OrderPurpose::Entry,
        OrderPurpose::Tp1,
        OrderPurpose::Tp2,
    ]
    .into_iter()
    .zip(staged.intents.into_iter())
    {
        let db_order_id = Uuid::new_v4();
        let client_order_id = intent_id_to_client_order_id(&intent.order_id);
        let order = Order {
            order_id: db_order_id,
            plan_id: Some(plan.plan_id),
            symbol_id: plan.symbol_id,
            purpose,
            side: intent.side,
            qty: intent.qty,
            limit_price: intent.limit_price,
            client_order_id: client_order_id.clone(),
            exchange_order_id: None,
            exchange_link_id: None,
            status: OrderStatus::PendingSubmit,
            filled_qty: 0.0,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        };
        entities::insert_order(pool, &order).await?;

        let req = BrokerSubmitRequest {
            order_id: client_order_id,
            symbol: intent.symbol,
            side: intent.side,
            quantity: intent.qty,
            order_type: intent.order_type,
            limit_price: intent.limit_price,
            reduce_only: intent.reduce_only,
            time_in_force: intent.time_in_force,
        };

        let report_status = match gateway.submit(req, &verdicts) {
            Ok(resp) => {
                entities::update_order_state(
                    pool,
                    db_order_id,
                    OrderStatus::Submitted,
                    0.0,
                    Some(&resp.broker_order_id),
                    Utc::now().timestamp_millis(),
                )
                .await?;
                if purpose == OrderPurpose::Entry {
                    opened_position = true;
                }
                OrderStatus::Submitted
            }
            Err(e) => {
                tracing::warn!(error = %e, order_id = %db_order_id, "order submit refused or failed");
                entities::update_order_state(
                    pool,
                    db_order_id,
                    OrderStatus::Rejected,
                    0.0,
                    None,
                    Utc::now().timestamp_millis(),
                )
                .await?;
                OrderStatus::Rejected
            }
        };

        let report = ExecutionReport {
            order_id: db_order_id,
            status: report_status,
            filled_qty: 0.0,
            avg_fill_price: None,
            ts_ms: Utc::now().timestamp_millis(),
        };
        let env = vgx_schemas::EventEnvelope::new(
            run_id,
            engine_id.to_string(),
            "execution_reports",
            "ExecutionReport",
            Uuid::new_v4(),
            Some(causation_id),
            Utc::now(),
            Payload::ExecutionReport(report),
        );
        let _ = broker.publish("execution_reports", &env).await;
    }

    if opened_position {
        entities::upsert_position(
            pool,
            &Position {
                position_id,
                plan_id: plan.plan_id,
                symbol_id: plan.symbol_id,
                bias: plan.bias,
                qty_open: qty_total,
                entry_avg_price: plan.entry_price,
                stop_price: plan.stop_price,
                state: PositionState::Open,
                realized_pnl_micros: 0,
                opened_at_ms: now_ms,
                closed_at_ms: None,
            },
        )
        .await?;

        let hist_at_entry = series
            .get(&(plan.symbol_id, plan.timeframe))
            .map(|w| macd_hist_now(w, &lifecycle_cfg.strategy))
            .unwrap_or(0.0);
        sim_positions.insert(plan.symbol_id, OpenPosition::from_plan(plan, qty_total, hist_at_entry));
    }

    Ok(())
}

/// Runs the bar-close lifecycle for whichever OPEN position matches `bar`'s
/// (symbol, timeframe): secondary exit rule once, then PAPER/BACKTEST
/// matching simulator fills, then the runner trailing-stop update. Mirrors
/// `vgx-backtest::BacktestEngine::run_lifecycle`, adapted to the DB/gateway
/// boundary LIVE and PAPER both run through here.
#[allow(clippy::too_many_arguments)]
async fn handle_bar_close(
    pool: &PgPool,
    broker: &Broker,
    gateway: &BrokerGateway<ModeBroker>,
    cfg: &Config,
    lifecycle_cfg: &BacktestConfig,
    live_stop_client: Option<&ExchangeClient>,
    symbols_by_id: &BTreeMap<i64, String>,
    series: &mut BTreeMap<(i64, Timeframe), Vec<Bar>>,
    sim_positions: &mut BTreeMap<i64, OpenPosition>,
    reconcile_clean: &Arc<tokio::sync::RwLock<bool>>,
    run_id: Uuid,
    engine_id: &str,
    causation_id: Uuid,
    bar: Bar,
) -> anyhow::Result<()> {
    if !bar.is_complete {
        return Ok(());
    }

    let key = (bar.symbol_id, bar.timeframe);
    {
        let window = series.entry(key).or_default();
        window.push(bar);
        if window.len() > lifecycle_cfg.bar_history_len {
            let excess = window.len() - lifecycle_cfg.bar_history_len;
            window.drain(0..excess);
        }
    }

    let Some(position) = entities::fetch_active_position_for_symbol(pool, bar.symbol_id).await? else {
        sim_positions.remove(&bar.symbol_id);
        return Ok(());
    };
    let Some(plan) = entities::fetch_trade_plan(pool, position.plan_id).await? else {
        return Ok(());
    };
    if plan.timeframe != bar.timeframe {
        return Ok(());
    }
    let Some(symbol) = symbols_by_id.get(&bar.symbol_id).cloned() else {
        return Ok(());
    };

    let integrity_armed = entities::fetch_runtime_flag(pool, FlagKind::IntegrityArmed)
        .await?
        .map(|f| f.value)
        .unwrap_or(false);
    let verdicts = GateVerdicts {
        integrity_armed,
        risk_allowed: true,
        reconcile_clean: *reconcile_clean.read().await,
    };

    let rehydrated = !sim_positions.contains_key(&bar.symbol_id);
    let sim_pos = sim_positions.entry(bar.symbol_id).or_insert_with(|| {
        let hist_at_entry = series
            .get(&key)
            .map(|w| macd_hist_now(w, &lifecycle_cfg.strategy))
            .unwrap_or(0.0);
        let mut p = OpenPosition::from_plan(&plan, position.qty_open, hist_at_entry);
        match position.state {
            PositionState::Tp1Hit => {
                p.tp1_filled = true;
                p.eff_sl = p.entry_price;
            }
            PositionState::Tp2Hit => {
                p.tp1_filled = true;
                p.tp2_filled = true;
                p.eff_sl = position.stop_price;
            }
            _ => {}
        }
        p
    });
    // A position this process never saw open itself (e.g. inherited across
    // a restart) has an unknowable true entry-bar histogram value — treat
    // the secondary rule as already satisfied rather than risk a spurious
    // close on a hist_at_entry of 0.0.
    if rehydrated && position.opened_at_ms < bar.open_time_ms {
        sim_pos.secondary_rule_checked = true;
    }

    if !sim_pos.secondary_rule_checked {
        let hist_now = series.get(&key).map(|w| macd_hist_now(w, &lifecycle_cfg.strategy)).unwrap_or(0.0);
        sim_pos.secondary_rule_checked = true;
        if secondary_rule_violated(sim_pos.bias, sim_pos.hist_at_entry, hist_now) {
            let exit_price = bar.close;
            let realized_pnl = pnl_sign(position.bias) * (exit_price - position.entry_avg_price) * position.qty_open;
            force_close_position(
                pool,
                broker,
                gateway,
                &verdicts,
                &symbol,
                &position,
                exit_price,
                realized_pnl,
                run_id,
                engine_id,
                causation_id,
                ExitReason::SecondaryRule.as_str(),
                bar.close_time_ms,
            )
            .await?;
            sim_positions.remove(&bar.symbol_id);
            return Ok(());
        }
    }

    if matches!(cfg.execution_mode, ExecutionMode::Paper | ExecutionMode::Backtest) {
        let was_tp1 = sim_pos.tp1_filled;
        let was_tp2 = sim_pos.tp2_filled;
        let qty_total = sim_pos.qty_total;
        let exit_reason = simulate_bar(sim_pos, &bar);

        if !was_tp1 && sim_pos.tp1_filled {
            let split = split_qty(qty_total);
            sync_tp_fill(
                pool, broker, plan.plan_id, OrderPurpose::Tp1, split.tp1, plan.tp1_price,
                bar.close_time_ms, run_id, engine_id, causation_id,
            )
            .await?;
        }
        if !was_tp2 && sim_pos.tp2_filled {
            let split = split_qty(qty_total);
            sync_tp_fill(
                pool, broker, plan.plan_id, OrderPurpose::Tp2, split.tp2, plan.tp2_price,
                bar.close_time_ms, run_id, engine_id, causation_id,
            )
            .await?;
        }

        if let Some(reason) = exit_reason {
            let closed = sim_positions.remove(&bar.symbol_id).unwrap();
            let realized_pnl = closed.realized_pnl();
            let exit_price = closed.weighted_exit_price();
            force_close_position(
                pool, broker, gateway, &verdicts, &symbol, &position, exit_price, realized_pnl,
                run_id, engine_id, causation_id, reason.as_str(), bar.close_time_ms,
            )
            .await?;
            return Ok(());
        }

        let sim_pos = sim_positions.get(&bar.symbol_id).unwrap();
        let new_state = if sim_pos.tp2_filled {
            PositionState::Tp2Hit
        } else if sim_pos.tp1_filled {
            PositionState::Tp1Hit
        } else {
            PositionState::Open
        };
        let realized_pnl_micros = (sim_pos.realized_pnl() * vgx_risk::MICROS_SCALE as f64).round() as i64;
        entities::upsert_position(
            pool,
            &Position {
                qty_open: sim_pos.qty_open,
                state: new_state,
                realized_pnl_micros,
                ..position.clone()
            },
        )
        .await?;
    }

    // Runner trailing-stop: pure bookkeeping every mode; REST push to the
    // exchange additionally gated on TP2 having filled (spec §4.4.5).
    let sim_pos = sim_positions.get_mut(&bar.symbol_id).unwrap();
    if let Some(window) = series.get(&key) {
        let new_stop = compute_runner_stop(lifecycle_cfg, window, sim_pos.bias, sim_pos.runner_stop_price, bar.close);
        if new_stop != sim_pos.runner_stop_price {
            sim_pos.runner_stop_price = new_stop;
            if sim_pos.tp2_filled {
                sim_pos.eff_sl = new_stop;
            }

            if let (ExecutionMode::Live, Some(client)) = (cfg.execution_mode, live_stop_client) {
                let tp2_filled_live = entities::fetch_orders_for_plan(pool, plan.plan_id)
                    .await?
                    .into_iter()
                    .any(|o| o.purpose == OrderPurpose::Tp2 && o.status == OrderStatus::Filled);
                if tp2_filled_live {
                    match client.set_trading_stop(&symbol, Some(&new_stop.to_string()), None).await {
                        Ok(()) => tracing::info!(symbol, new_stop, "SL_UPDATE pushed to exchange"),
                        Err(e) => tracing::warn!(error = %e, symbol, "set_trading_stop failed"),
                    }
                }
            } else {
                tracing::debug!(symbol, new_stop, "SL_UPDATE");
            }
        }
    }

    Ok(())
}

/// Records a TP1/TP2 fill the matching simulator produced: settles the
/// staged order row, inserts the fill, and publishes the execution report —
/// the same three steps the private-WS path runs for a LIVE fill.
#[allow(clippy::too_many_arguments)]
async fn sync_tp_fill(
    pool: &PgPool,
    broker: &Broker,
    plan_id: Uuid,
    purpose: OrderPurpose,
    fill_qty: f64,
    fill_price: f64,
    ts_ms: i64,
    run_id: Uuid,
    engine_id: &str,
    causation_id: Uuid,
) -> anyhow::Result<()> {
    let Some(order) = entities::fetch_orders_for_plan(pool, plan_id)
        .await?
        .into_iter()
        .find(|o| o.purpose == purpose)
    else {
        return Ok(());
    };

    entities::update_order_state(pool, order.order_id, OrderStatus::Filled, fill_qty, order.exchange_order_id.as_deref(), ts_ms).await?;

    let fill = vgx_schemas::Fill {
        fill_id: Uuid::new_v4(),
        order_id: order.order_id,
        exchange_fill_id: None,
        qty: fill_qty,
        price: fill_price,
        fee: 0.0,
        ts_ms,
    };
    entities::insert_fill(pool, &fill).await?;

    let report = ExecutionReport {
        order_id: order.order_id,
        status: OrderStatus::Filled,
        filled_qty: fill_qty,
        avg_fill_price: Some(fill_price),
        ts_ms,
    };
    let env = vgx_schemas::EventEnvelope::new(
        run_id,
        engine_id.to_string(),
        "execution_reports",
        "ExecutionReport",
        Uuid::new_v4(),
        Some(causation_id),
        Utc::now(),
        Payload::ExecutionReport(report),
    );
    let _ = broker.publish("execution_reports", &env).await;
    Ok(())
}

/// Closes `position` in full right now: a reduce-only market order through
/// the gateway, the position row settled to `Closed`, and the execution
/// report published. Used for the mutex-upgrade close, the secondary-rule
/// close, and the matching simulator's final SL/TP-runner close — the three
/// places a position reaches end-of-life outside a resting TP fill.
#[allow(clippy::too_many_arguments)]
async fn force_close_position(
    pool: &PgPool,
    broker: &Broker,
    gateway: &BrokerGateway<ModeBroker>,
    verdicts: &GateVerdicts,
    symbol: &str,
    position: &Position,
    exit_price: f64,
    realized_pnl: f64,
    run_id: Uuid,
    engine_id: &str,
    causation_id: Uuid,
    reason: &'static str,
    now_ms: i64,
) -> anyhow::Result<()> {
    let close_side = match position.bias {
        Bias::Long => vgx_schemas::Side::Sell,
        Bias::Short => vgx_schemas::Side::Buy,
    };
    let db_order_id = Uuid::new_v4();
    let client_order_id = format!("{}-close-{}", position.position_id, reason);
    let order = Order {
        order_id: db_order_id,
        plan_id: Some(position.plan_id),
        symbol_id: position.symbol_id,
        purpose: OrderPurpose::Exit,
        side: close_side,
        qty: position.qty_open,
        limit_price: None,
        client_order_id: client_order_id.clone(),
        exchange_order_id: None,
        exchange_link_id: None,
        status: OrderStatus::PendingSubmit,
        filled_qty: 0.0,
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
    };
    entities::insert_order(pool, &order).await?;

    let req = BrokerSubmitRequest {
        order_id: client_order_id,
        symbol: symbol.to_string(),
        side: close_side,
        quantity: position.qty_open,
        order_type: "Market".to_string(),
        limit_price: None,
        reduce_only: true,
        time_in_force: "GTC".to_string(),
    };

    let report_status = match gateway.submit(req, verdicts) {
        Ok(resp) => {
            entities::update_order_state(pool, db_order_id, OrderStatus::Submitted, position.qty_open, Some(&resp.broker_order_id), now_ms).await?;
            OrderStatus::Submitted
        }
        Err(e) => {
            tracing::warn!(error = %e, position_id = %position.position_id, reason, "force-close submit refused or failed");
            entities::update_order_state(pool, db_order_id, OrderStatus::Rejected, 0.0, None, now_ms).await?;
            OrderStatus::Rejected
        }
    };

    let realized_pnl_micros = (realized_pnl * vgx_risk::MICROS_SCALE as f64).round() as i64;
    entities::upsert_position(
        pool,
        &Position {
            position_id: position.position_id,
            plan_id: position.plan_id,
            symbol_id: position.symbol_id,
            bias: position.bias,
            qty_open: 0.0,
            entry_avg_price: position.entry_avg_price,
            stop_price: position.stop_price,
            state: PositionState::Closed,
            realized_pnl_micros,
            opened_at_ms: position.opened_at_ms,
            closed_at_ms: Some(now_ms),
        },
    )
    .await?;

    let report = ExecutionReport {
        order_id: db_order_id,
        status: report_status,
        filled_qty: position.qty_open,
        avg_fill_price: Some(exit_price),
        ts_ms: now_ms,
    };
    let env = vgx_schemas::EventEnvelope::new(
        run_id,
        engine_id.to_string(),
        "execution_reports",
        "ExecutionReport",
        Uuid::new_v4(),
        Some(causation_id),
        Utc::now(),
        Payload::ExecutionReport(report),
    );
    let _ = broker.publish("execution_reports", &env).await;
    tracing::info!(position_id = %position.position_id, reason, exit_price, "position force-closed");
    Ok(())
}

async fn latest_equity_micros(pool: &PgPool) -> Option<i64> {
    let snaps = entities::latest_account_snapshots(pool).await.ok()?;
    snaps
        .first()
        .map(|s| (s.equity * vgx_risk::MICROS_SCALE as f64).round() as i64)
}

async fn load_or_init_risk_state(pool: &PgPool, day_id: u32, equity_micros: i64) -> anyhow::Result<RiskState> {
    let today = Utc::now().date_naive();
    if let Some(row) = entities::fetch_risk_state(pool, today).await? {
        let mut st = RiskState::new(day_id, row.starting_equity_micros, 0);
        st.peak_equity_micros = row.max_equity_micros;
        st.halted = row.hard_halt;
        st.disarmed = row.kill_switch;
        st.consecutive_loss_count = row.consecutive_loss_count;
        Ok(st)
    } else {
        Ok(RiskState::new(day_id, equity_micros, 0))
    }
}

fn risk_state_to_row(st: &RiskState) -> vgx_schemas::RiskState {
    vgx_schemas::RiskState {
        trade_date: Utc::now().date_naive(),
        starting_equity_micros: st.day_start_equity_micros,
        current_equity_micros: st.peak_equity_micros,
        min_equity_micros: st.day_start_equity_micros.min(st.peak_equity_micros),
        max_equity_micros: st.peak_equity_micros,
        drawdown_pct: 0.0,
        soft_halt: st.halted && !st.disarmed,
        hard_halt: st.halted,
        kill_switch: st.disarmed,
        consecutive_loss_count: st.consecutive_loss_count,
    }
}

fn risk_config_for_equity(cfg: &Config, reference_equity_micros: i64) -> RiskConfig {
    let reference = reference_equity_micros.max(0) as f64;
    RiskConfig {
        daily_loss_limit_micros: (reference * cfg.risk_daily_loss_limit_pct / 100.0) as i64,
        max_drawdown_limit_micros: (reference * cfg.risk_max_drawdown_pct / 100.0) as i64,
        reject_storm_max_rejects_in_window: 10,
        risk_circuit_enabled: true,
    }
}

/// Periodic position-only reconcile tick: compares DB-held active positions
/// against the exchange's reported positions per configured symbol.
fn spawn_position_reconcile_tick(cfg: Arc<Config>, pool: PgPool, flag: Arc<tokio::sync::RwLock<bool>>) {
    tokio::spawn(async move {
        let client = ExchangeClient::new(
            cfg.exchange_base_url.clone(),
            cfg.exchange_api_key.clone(),
            cfg.exchange_api_secret.clone(),
            10,
            5,
            10,
            10,
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let mut clean = true;
            for (symbol, symbol_id) in cfg.symbol_id_map() {
                let db_qty = entities::fetch_active_position_for_symbol(&pool, symbol_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|p| p.qty_open)
                    .unwrap_or(0.0);
                let exchange_qty = match client.get_positions(&symbol).await {
                    Ok(snaps) => snaps
                        .iter()
                        .filter_map(|p| p.size.parse::<f64>().ok())
                        .sum::<f64>(),
                    Err(e) => {
                        tracing::warn!(error = %e, symbol, "reconcile position fetch failed");
                        continue;
                    }
                };
                if (db_qty - exchange_qty).abs() > cfg.qty_step {
                    clean = false;
                    tracing::error!(symbol, db_qty, exchange_qty, "position reconcile drift");
                }
            }
            *flag.write().await = clean;
        }
    });
}

/// Periodic account/wallet snapshotter (~30s) — the source the risk
/// engine's equity input and the reconcile tick both trust.
fn spawn_snapshotter(cfg: Arc<Config>, pool: PgPool) {
    tokio::spawn(async move {
        let client = ExchangeClient::new(
            cfg.exchange_base_url.clone(),
            cfg.exchange_api_key.clone(),
            cfg.exchange_api_secret.clone(),
            10,
            5,
            10,
            10,
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let now_ms = Utc::now().timestamp_millis();
            let balances = match client.get_wallet_balance().await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "get_wallet_balance failed");
                    continue;
                }
            };
            let total_equity: f64 = balances.iter().filter_map(|b| b.equity.parse::<f64>().ok()).sum();
            let total_wallet: f64 = balances.iter().filter_map(|b| b.wallet_balance.parse::<f64>().ok()).sum();
            let snapshot = vgx_schemas::AccountSnapshot {
                source: vgx_schemas::SnapshotSource::Rest,
                equity: total_equity,
                wallet_balance: total_wallet,
                ts_ms: now_ms,
            };
            if let Err(e) = entities::insert_account_snapshot(&pool, &snapshot).await {
                tracing::error!(error = %e, "insert_account_snapshot failed");
            }
            for b in &balances {
                let coin_snapshot = vgx_schemas::WalletSnapshot {
                    source: vgx_schemas::SnapshotSource::Rest,
                    coin: b.coin.clone(),
                    wallet_balance: b.wallet_balance.parse().unwrap_or(0.0),
                    equity: b.equity.parse().unwrap_or(0.0),
                    ts_ms: now_ms,
                };
                if let Err(e) = entities::insert_wallet_snapshot(&pool, &coin_snapshot).await {
                    tracing::error!(error = %e, "insert_wallet_snapshot failed");
                }
            }
        }
    });
}

const ENTRY_TIMEOUT_MS: i64 = 60_000;
const MAX_REPRICE_ATTEMPTS: u32 = 2;

/// Periodic tick over resting entry orders: cancels any that have timed out.
/// LIVE + limit-entry mode only (a market entry order never rests long
/// enough to hit this). Re-submission (reprice at market vs. a fresh limit)
/// is left to the operator/strategy's next signal rather than auto-resubmit
/// here — this service only guarantees a stale order stops tying up margin.
fn spawn_abnormal_tick(cfg: Arc<Config>, pool: PgPool) {
    tokio::spawn(async move {
        let client = ExchangeClient::new(
            cfg.exchange_base_url.clone(),
            cfg.exchange_api_key.clone(),
            cfg.exchange_api_secret.clone(),
            10,
            5,
            10,
            10,
        );
        let symbols_by_id: BTreeMap<i64, String> =
            cfg.symbol_id_map().into_iter().map(|(s, id)| (id, s)).collect();
        let mut ticker = tokio::time::interval(Duration::from_secs(15));
        loop {
            ticker.tick().await;
            let now_ms = Utc::now().timestamp_millis();
            let orders = match entities::list_open_entry_orders(&pool).await {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(error = %e, "list_open_entry_orders failed");
                    continue;
                }
            };
            for order in orders {
                let action = vgx_execution::evaluate_entry_timeout(
                    &order,
                    now_ms,
                    ENTRY_TIMEOUT_MS,
                    0,
                    MAX_REPRICE_ATTEMPTS,
                );
                if action == vgx_execution::AbnormalAction::None {
                    continue;
                }
                if let (Some(exchange_order_id), Some(symbol)) =
                    (&order.exchange_order_id, symbols_by_id.get(&order.symbol_id))
                {
                    if let Err(e) = client.cancel_order(symbol, exchange_order_id).await {
                        tracing::warn!(error = %e, order_id = %order.order_id, "abnormal cancel failed");
                        continue;
                    }
                }
                if let Err(e) = entities::update_order_state(
                    &pool,
                    order.order_id,
                    OrderStatus::Cancelled,
                    order.filled_qty,
                    None,
                    now_ms,
                )
                .await
                {
                    tracing::error!(error = %e, "update_order_state failed");
                }
                tracing::warn!(order_id = %order.order_id, action = ?action, "entry order timed out, cancelled");
            }
        }
    });
}

/// Private WS ingestion loop: reconnects with doubling backoff, decodes
/// order/execution pushes, and persists order-state transitions and fills
/// as they arrive — this is the primary path for a submitted order reaching
/// `Filled`, not the synchronous submit response.
fn spawn_private_ws_ingest(cfg: Arc<Config>, pool: PgPool, broker: Broker, run_id: Uuid, engine_id: String) {
    tokio::spawn(async move {
        let client = vgx_exchange::PrivateWsClient::new(
            cfg.exchange_ws_private_url.clone(),
            cfg.exchange_api_key.clone(),
            cfg.exchange_api_secret.clone(),
        );
        let mut backoff_secs = 1u64;
        loop {
            let pool = pool.clone();
            let broker = broker.clone();
            let engine_id_for_closure = engine_id.clone();
            let result = client
                .run(&["order", "execution"], move |event| {
                    let pool = pool.clone();
                    let broker = broker.clone();
                    let engine_id = engine_id_for_closure.clone();
                    tokio::task::block_in_place(|| {
                        tokio::runtime::Handle::current()
                            .block_on(handle_ws_event(&pool, &broker, run_id, &engine_id, event));
                    });
                    true
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "private ws dropped, reconnecting");
                publish_ws_reconnect_event(&broker, run_id, &engine_id).await;
            }
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            backoff_secs = (backoff_secs * 2).min(30);
        }
    });
}

async fn handle_ws_event(
    pool: &PgPool,
    broker: &Broker,
    run_id: Uuid,
    engine_id: &str,
    event: vgx_exchange::PrivateWsEvent,
) {
    match event {
        vgx_exchange::PrivateWsEvent::Order(data) => {
            let Some(entries) = data.as_array() else { return };
            for entry in entries {
                let Some(update) = vgx_execution::parse_order_update(entry) else { continue };
                let Some(order) = entities::fetch_order_by_exchange_id(pool, &update.exchange_order_id)
                    .await
                    .ok()
                    .flatten()
                else {
                    continue;
                };
                let now_ms = Utc::now().timestamp_millis();
                if let Err(e) = entities::update_order_state(
                    pool,
                    order.order_id,
                    update.status,
                    update.filled_qty,
                    Some(&update.exchange_order_id),
                    now_ms,
                )
                .await
                {
                    tracing::error!(error = %e, "ws order update persist failed");
                    continue;
                }
                let report = ExecutionReport {
                    order_id: order.order_id,
                    status: update.status,
                    filled_qty: update.filled_qty,
                    avg_fill_price: None,
                    ts_ms: now_ms,
                };
                let env = vgx_schemas::EventEnvelope::new(
                    run_id,
                    engine_id.to_string(),
                    "execution_reports",
                    "ExecutionReport",
                    Uuid::new_v4(),
                    None,
                    Utc::now(),
                    Payload::ExecutionReport(report),
                );
                let _ = broker.publish("execution_reports", &env).await;
            }
        }
        vgx_exchange::PrivateWsEvent::Execution(data) => {
            let Some(entries) = data.as_array() else { return };
            for entry in entries {
                let Some(update) = vgx_execution::parse_fill_update(entry) else { continue };
                let Some(order) = entities::fetch_order_by_exchange_id(pool, &update.exchange_order_id)
                    .await
                    .ok()
                    .flatten()
                else {
                    continue;
                };
                let fill = vgx_schemas::Fill {
                    fill_id: Uuid::new_v4(),
                    order_id: order.order_id,
                    exchange_fill_id: update.exchange_fill_id,
                    qty: update.qty,
                    price: update.price,
                    fee: update.fee,
                    ts_ms: update.ts_ms,
                };
                if let Err(e) = entities::insert_fill(pool, &fill).await {
                    tracing::error!(error = %e, "insert_fill failed");
                }
            }
        }
        vgx_exchange::PrivateWsEvent::Position(_) | vgx_exchange::PrivateWsEvent::Wallet(_) => {}
    }
}

async fn publish_ws_reconnect_event(broker: &Broker, run_id: Uuid, engine_id: &str) {
    let event = vgx_schemas::RiskEvent {
        kind: vgx_schemas::RiskEventKind::WsReconnect,
        symbol_id: None,
        detail: serde_json::json!({}),
        ts_ms: Utc::now().timestamp_millis(),
    };
    let env = vgx_schemas::EventEnvelope::new(
        run_id,
        engine_id.to_string(),
        "risk_events",
        "RiskEvent",
        Uuid::new_v4(),
        None,
        Utc::now(),
        Payload::RiskEvent(event),
    );
    let _ = broker.publish("risk_events", &env).await;
}
