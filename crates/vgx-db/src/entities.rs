//! Persistence for the trading-domain entities that flow over the stream
//! broker: bars, signals, trade plans, orders, fills, positions, risk state,
//! cooldowns, runtime flags, account/wallet snapshots, and traces. Each
//! function binds directly to the matching `vgx_schemas` struct so a stream
//! payload round-trips through a row with no remapping layer, the same
//! contract `notifications.rs` and `md.rs` follow for their tables.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;
use vgx_schemas::{
    AccountSnapshot, Bar, BarCloseEmit, Bias, Cooldown, ExitRule, FlagKind, Order, OrderPurpose,
    OrderStatus, Position, PositionState, RiskState, RuntimeFlag, Side, Signal, SnapshotSource,
    Timeframe, Trace, TradePlan, WalletSnapshot,
};

fn tf_str(tf: Timeframe) -> &'static str {
    tf.as_str()
}

fn parse_tf(s: &str) -> Result<Timeframe> {
    match s {
        "1h" => Ok(Timeframe::H1),
        "4h" => Ok(Timeframe::H4),
        "8h" => Ok(Timeframe::H8),
        "1d" => Ok(Timeframe::D1),
        other => anyhow::bail!("invalid timeframe: {other}"),
    }
}

fn bias_str(b: Bias) -> &'static str {
    match b {
        Bias::Long => "LONG",
        Bias::Short => "SHORT",
    }
}

fn parse_bias(s: &str) -> Bias {
    if s == "SHORT" {
        Bias::Short
    } else {
        Bias::Long
    }
}

fn side_str(s: Side) -> &'static str {
    match s {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn parse_side(s: &str) -> Side {
    if s == "SELL" {
        Side::Sell
    } else {
        Side::Buy
    }
}

fn exit_rule_str(r: ExitRule) -> &'static str {
    match r {
        ExitRule::NextBarNotShortenExit => "NEXT_BAR_NOT_SHORTEN_EXIT",
    }
}

fn parse_exit_rule(_s: &str) -> ExitRule {
    ExitRule::NextBarNotShortenExit
}

fn purpose_str(p: OrderPurpose) -> &'static str {
    match p {
        OrderPurpose::Entry => "ENTRY",
        OrderPurpose::Tp1 => "TP1",
        OrderPurpose::Tp2 => "TP2",
        OrderPurpose::Exit => "EXIT",
    }
}

fn parse_purpose(s: &str) -> OrderPurpose {
    match s {
        "TP1" => OrderPurpose::Tp1,
        "TP2" => OrderPurpose::Tp2,
        "EXIT" => OrderPurpose::Exit,
        _ => OrderPurpose::Entry,
    }
}

fn order_status_str(s: OrderStatus) -> &'static str {
    match s {
        OrderStatus::PendingSubmit => "PENDING_SUBMIT",
        OrderStatus::Submitted => "SUBMITTED",
        OrderStatus::Open => "OPEN",
        OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
        OrderStatus::Filled => "FILLED",
        OrderStatus::CancelPending => "CANCEL_PENDING",
        OrderStatus::Cancelled => "CANCELLED",
        OrderStatus::ReplacePending => "REPLACE_PENDING",
        OrderStatus::Rejected => "REJECTED",
    }
}

fn parse_order_status(s: &str) -> OrderStatus {
    match s {
        "SUBMITTED" => OrderStatus::Submitted,
        "OPEN" => OrderStatus::Open,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCEL_PENDING" => OrderStatus::CancelPending,
        "CANCELLED" => OrderStatus::Cancelled,
        "REPLACE_PENDING" => OrderStatus::ReplacePending,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::PendingSubmit,
    }
}

fn position_state_str(s: PositionState) -> &'static str {
    match s {
        PositionState::Open => "OPEN",
        PositionState::Tp1Hit => "TP1_HIT",
        PositionState::Tp2Hit => "TP2_HIT",
        PositionState::Closed => "CLOSED",
    }
}

fn parse_position_state(s: &str) -> PositionState {
    match s {
        "TP1_HIT" => PositionState::Tp1Hit,
        "TP2_HIT" => PositionState::Tp2Hit,
        "CLOSED" => PositionState::Closed,
        _ => PositionState::Open,
    }
}

fn flag_str(f: FlagKind) -> &'static str {
    match f {
        FlagKind::KillSwitch => "KILL_SWITCH",
        FlagKind::RiskCircuit => "RISK_CIRCUIT",
        FlagKind::IntegrityArmed => "INTEGRITY_ARMED",
    }
}

fn parse_flag(s: &str) -> Result<FlagKind> {
    match s {
        "KILL_SWITCH" => Ok(FlagKind::KillSwitch),
        "RISK_CIRCUIT" => Ok(FlagKind::RiskCircuit),
        "INTEGRITY_ARMED" => Ok(FlagKind::IntegrityArmed),
        other => anyhow::bail!("invalid runtime flag: {other}"),
    }
}

fn snapshot_source_str(s: SnapshotSource) -> &'static str {
    match s {
        SnapshotSource::Ws => "WS",
        SnapshotSource::Rest => "REST",
    }
}

fn parse_snapshot_source(s: &str) -> SnapshotSource {
    if s == "REST" {
        SnapshotSource::Rest
    } else {
        SnapshotSource::Ws
    }
}

// ---------------------------------------------------------------------------
// bars / bar_close_emits
// ---------------------------------------------------------------------------

/// Upsert a closed (or in-progress) bar. Re-ingesting the same
/// `(symbol_id, timeframe, close_time_ms)` overwrites in place.
pub async fn upsert_bar(pool: &PgPool, bar: &Bar) -> Result<()> {
    sqlx::query(
        r#"
        insert into bars (
          symbol_id, timeframe, open_time_ms, close_time_ms,
          open, high, low, close, volume, is_complete
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        on conflict (symbol_id, timeframe, close_time_ms) do update
          set open_time_ms = excluded.open_time_ms,
              open         = excluded.open,
              high         = excluded.high,
              low          = excluded.low,
              close        = excluded.close,
              volume       = excluded.volume,
              is_complete  = excluded.is_complete
        "#,
    )
    .bind(bar.symbol_id)
    .bind(tf_str(bar.timeframe))
    .bind(bar.open_time_ms)
    .bind(bar.close_time_ms)
    .bind(bar.open)
    .bind(bar.high)
    .bind(bar.low)
    .bind(bar.close)
    .bind(bar.volume)
    .bind(bar.is_complete)
    .execute(pool)
    .await
    .context("upsert_bar failed")?;
    Ok(())
}

/// Reserve a bar-close-emit slot. Returns `false` if already reserved
/// (idempotent publish guard — a crash after reserve but before the stream
/// publish must not silently drop the bar-close).
pub async fn reserve_bar_close_emit(
    pool: &PgPool,
    emit: &BarCloseEmit,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into bar_close_emits (symbol_id, timeframe, close_time_ms, reserved_at_ms)
        values ($1, $2, $3, $4)
        on conflict (symbol_id, timeframe, close_time_ms) do nothing
        returning close_time_ms
        "#,
    )
    .bind(emit.symbol_id)
    .bind(tf_str(emit.timeframe))
    .bind(emit.close_time_ms)
    .bind(emit.reserved_at_ms)
    .fetch_optional(pool)
    .await
    .context("reserve_bar_close_emit failed")?;
    Ok(row.is_some())
}

/// Delete a reservation after a failed publish, so a retry can re-reserve.
pub async fn release_bar_close_emit(
    pool: &PgPool,
    symbol_id: i64,
    timeframe: Timeframe,
    close_time_ms: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        delete from bar_close_emits
        where symbol_id = $1 and timeframe = $2 and close_time_ms = $3
        "#,
    )
    .bind(symbol_id)
    .bind(tf_str(timeframe))
    .bind(close_time_ms)
    .execute(pool)
    .await
    .context("release_bar_close_emit failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// signals / trade_plans
// ---------------------------------------------------------------------------

/// Insert a signal, deduped on its `idempotency_key`. Returns `false` if a
/// signal with that key already exists (the three-segment divergence engine
/// must never re-emit on a re-scan of the same closed bar).
pub async fn insert_signal_if_absent(pool: &PgPool, s: &Signal) -> Result<bool> {
    let confirmations = serde_json::to_value(&s.confirmations).context("serialize confirmations")?;
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        insert into signals (
          idempotency_key, symbol_id, timeframe, close_time_ms, bias,
          confirmations, macd_hist, pivot_price, created_at_ms
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        on conflict (idempotency_key) do nothing
        returning idempotency_key
        "#,
    )
    .bind(&s.idempotency_key)
    .bind(s.symbol_id)
    .bind(tf_str(s.timeframe))
    .bind(s.close_time_ms)
    .bind(bias_str(s.bias))
    .bind(confirmations)
    .bind(s.macd_hist)
    .bind(s.pivot_price)
    .bind(s.created_at_ms)
    .fetch_optional(pool)
    .await
    .context("insert_signal_if_absent failed")?;
    Ok(row.is_some())
}

pub async fn insert_trade_plan(pool: &PgPool, p: &TradePlan) -> Result<()> {
    sqlx::query(
        r#"
        insert into trade_plans (
          plan_id, signal_idempotency_key, symbol_id, timeframe, bias,
          entry_price, stop_price, tp1_price, tp2_price, exit_rule,
          expires_at_ms, created_at_ms
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        on conflict (plan_id) do nothing
        "#,
    )
    .bind(p.plan_id)
    .bind(&p.signal_idempotency_key)
    .bind(p.symbol_id)
    .bind(tf_str(p.timeframe))
    .bind(bias_str(p.bias))
    .bind(p.entry_price)
    .bind(p.stop_price)
    .bind(p.tp1_price)
    .bind(p.tp2_price)
    .bind(exit_rule_str(p.exit_rule))
    .bind(p.expires_at_ms)
    .bind(p.created_at_ms)
    .execute(pool)
    .await
    .context("insert_trade_plan failed")?;
    Ok(())
}

fn row_to_trade_plan(row: sqlx::postgres::PgRow) -> Result<TradePlan> {
    Ok(TradePlan {
        plan_id: row.try_get("plan_id")?,
        signal_idempotency_key: row.try_get("signal_idempotency_key")?,
        symbol_id: row.try_get("symbol_id")?,
        timeframe: parse_tf(&row.try_get::<String, _>("timeframe")?)?,
        bias: parse_bias(&row.try_get::<String, _>("bias")?),
        entry_price: row.try_get("entry_price")?,
        stop_price: row.try_get("stop_price")?,
        tp1_price: row.try_get("tp1_price")?,
        tp2_price: row.try_get("tp2_price")?,
        exit_rule: parse_exit_rule(&row.try_get::<String, _>("exit_rule")?),
        expires_at_ms: row.try_get("expires_at_ms")?,
        created_at_ms: row.try_get("created_at_ms")?,
    })
}

pub async fn fetch_trade_plan(pool: &PgPool, plan_id: Uuid) -> Result<Option<TradePlan>> {
    let row = sqlx::query(
        r#"
        select plan_id, signal_idempotency_key, symbol_id, timeframe, bias,
               entry_price, stop_price, tp1_price, tp2_price, exit_rule,
               expires_at_ms, created_at_ms
        from trade_plans
        where plan_id = $1
        "#,
    )
    .bind(plan_id)
    .fetch_optional(pool)
    .await
    .context("fetch_trade_plan failed")?;
    row.map(row_to_trade_plan).transpose()
}

// ---------------------------------------------------------------------------
// orders / fills
// ---------------------------------------------------------------------------

fn row_to_order(row: sqlx::postgres::PgRow) -> Result<Order> {
    Ok(Order {
        order_id: row.try_get("order_id")?,
        plan_id: row.try_get("plan_id")?,
        symbol_id: row.try_get("symbol_id")?,
        purpose: parse_purpose(&row.try_get::<String, _>("purpose")?),
        side: parse_side(&row.try_get::<String, _>("side")?),
        qty: row.try_get("qty")?,
        limit_price: row.try_get("limit_price")?,
        client_order_id: row.try_get("client_order_id")?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        exchange_link_id: row.try_get("exchange_link_id")?,
        status: parse_order_status(&row.try_get::<String, _>("status")?),
        filled_qty: row.try_get("filled_qty")?,
        created_at_ms: row.try_get("created_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

/// Insert a new order row (PENDING_SUBMIT at creation).
pub async fn insert_order(pool: &PgPool, o: &Order) -> Result<()> {
    sqlx::query(
        r#"
        insert into orders (
          order_id, plan_id, symbol_id, purpose, side, qty, limit_price,
          client_order_id, exchange_order_id, exchange_link_id, status,
          filled_qty, created_at_ms, updated_at_ms
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
        on conflict (order_id) do nothing
        "#,
    )
    .bind(o.order_id)
    .bind(o.plan_id)
    .bind(o.symbol_id)
    .bind(purpose_str(o.purpose))
    .bind(side_str(o.side))
    .bind(o.qty)
    .bind(o.limit_price)
    .bind(&o.client_order_id)
    .bind(&o.exchange_order_id)
    .bind(&o.exchange_link_id)
    .bind(order_status_str(o.status))
    .bind(o.filled_qty)
    .bind(o.created_at_ms)
    .bind(o.updated_at_ms)
    .execute(pool)
    .await
    .context("insert_order failed")?;
    Ok(())
}

/// Apply a status/fill-qty/exchange-id transition to an existing order.
pub async fn update_order_state(
    pool: &PgPool,
    order_id: Uuid,
    status: OrderStatus,
    filled_qty: f64,
    exchange_order_id: Option<&str>,
    updated_at_ms: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        update orders
        set status = $2,
            filled_qty = $3,
            exchange_order_id = coalesce($4, exchange_order_id),
            updated_at_ms = $5
        where order_id = $1
        "#,
    )
    .bind(order_id)
    .bind(order_status_str(status))
    .bind(filled_qty)
    .bind(exchange_order_id)
    .bind(updated_at_ms)
    .execute(pool)
    .await
    .context("update_order_state failed")?;
    Ok(())
}

pub async fn fetch_order(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>> {
    let row = sqlx::query(
        r#"
        select order_id, plan_id, symbol_id, purpose, side, qty, limit_price,
               client_order_id, exchange_order_id, exchange_link_id, status,
               filled_qty, created_at_ms, updated_at_ms
        from orders
        where order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await
    .context("fetch_order failed")?;
    row.map(row_to_order).transpose()
}

/// Looked up by the private-WS ingest loop, which only learns the exchange's
/// own order id from the push message.
pub async fn fetch_order_by_exchange_id(pool: &PgPool, exchange_order_id: &str) -> Result<Option<Order>> {
    let row = sqlx::query(
        r#"
        select order_id, plan_id, symbol_id, purpose, side, qty, limit_price,
               client_order_id, exchange_order_id, exchange_link_id, status,
               filled_qty, created_at_ms, updated_at_ms
        from orders
        where exchange_order_id = $1
        "#,
    )
    .bind(exchange_order_id)
    .fetch_optional(pool)
    .await
    .context("fetch_order_by_exchange_id failed")?;
    row.map(row_to_order).transpose()
}

/// All legs (entry/TP1/TP2/exit) staged for one plan, for the bar-close
/// lifecycle consumer to settle TP1/TP2 order rows as the matching simulator
/// fills them.
pub async fn fetch_orders_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        select order_id, plan_id, symbol_id, purpose, side, qty, limit_price,
               client_order_id, exchange_order_id, exchange_link_id, status,
               filled_qty, created_at_ms, updated_at_ms
        from orders
        where plan_id = $1
        "#,
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("fetch_orders_for_plan failed")?;
    rows.into_iter().map(row_to_order).collect()
}

/// Entry orders still resting at the broker, for the abnormal-timeout tick.
pub async fn list_open_entry_orders(pool: &PgPool) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        select order_id, plan_id, symbol_id, purpose, side, qty, limit_price,
               client_order_id, exchange_order_id, exchange_link_id, status,
               filled_qty, created_at_ms, updated_at_ms
        from orders
        where purpose = 'ENTRY'
          and status in ('SUBMITTED', 'OPEN', 'PARTIALLY_FILLED')
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_open_entry_orders failed")?;
    rows.into_iter().map(row_to_order).collect()
}

/// Insert a fill, deduped on `exchange_fill_id` where the exchange provides
/// one (paper fills carry `None` and are never redelivered, so they skip the
/// dedupe check).
pub async fn insert_fill(pool: &PgPool, f: &vgx_schemas::Fill) -> Result<bool> {
    if let Some(exch_id) = &f.exchange_fill_id {
        let existing: Option<(Uuid,)> =
            sqlx::query_as("select fill_id from fills where exchange_fill_id = $1")
                .bind(exch_id)
                .fetch_optional(pool)
                .await
                .context("insert_fill dedupe check failed")?;
        if existing.is_some() {
            return Ok(false);
        }
    }

    sqlx::query(
        r#"
        insert into fills (fill_id, order_id, exchange_fill_id, qty, price, fee, ts_ms)
        values ($1,$2,$3,$4,$5,$6,$7)
        on conflict (fill_id) do nothing
        "#,
    )
    .bind(f.fill_id)
    .bind(f.order_id)
    .bind(&f.exchange_fill_id)
    .bind(f.qty)
    .bind(f.price)
    .bind(f.fee)
    .bind(f.ts_ms)
    .execute(pool)
    .await
    .context("insert_fill failed")?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// positions
// ---------------------------------------------------------------------------

fn row_to_position(row: sqlx::postgres::PgRow) -> Result<Position> {
    Ok(Position {
        position_id: row.try_get("position_id")?,
        plan_id: row.try_get("plan_id")?,
        symbol_id: row.try_get("symbol_id")?,
        bias: parse_bias(&row.try_get::<String, _>("bias")?),
        qty_open: row.try_get("qty_open")?,
        entry_avg_price: row.try_get("entry_avg_price")?,
        stop_price: row.try_get("stop_price")?,
        state: parse_position_state(&row.try_get::<String, _>("state")?),
        realized_pnl_micros: row.try_get("realized_pnl_micros")?,
        opened_at_ms: row.try_get("opened_at_ms")?,
        closed_at_ms: row.try_get("closed_at_ms")?,
    })
}

pub async fn upsert_position(pool: &PgPool, p: &Position) -> Result<()> {
    sqlx::query(
        r#"
        insert into positions (
          position_id, plan_id, symbol_id, bias, qty_open, entry_avg_price,
          stop_price, state, realized_pnl_micros, opened_at_ms, closed_at_ms
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        on conflict (position_id) do update
          set qty_open            = excluded.qty_open,
              entry_avg_price     = excluded.entry_avg_price,
              stop_price          = excluded.stop_price,
              state               = excluded.state,
              realized_pnl_micros = excluded.realized_pnl_micros,
              closed_at_ms        = excluded.closed_at_ms
        "#,
    )
    .bind(p.position_id)
    .bind(p.plan_id)
    .bind(p.symbol_id)
    .bind(bias_str(p.bias))
    .bind(p.qty_open)
    .bind(p.entry_avg_price)
    .bind(p.stop_price)
    .bind(position_state_str(p.state))
    .bind(p.realized_pnl_micros)
    .bind(p.opened_at_ms)
    .bind(p.closed_at_ms)
    .execute(pool)
    .await
    .context("upsert_position failed")?;
    Ok(())
}

/// The at-most-one-active-position-per-symbol mutex, enforced at the DB
/// layer by `uq_positions_symbol_active` — this is the read side used before
/// admitting a new plan.
pub async fn fetch_active_position_for_symbol(
    pool: &PgPool,
    symbol_id: i64,
) -> Result<Option<Position>> {
    let row = sqlx::query(
        r#"
        select position_id, plan_id, symbol_id, bias, qty_open, entry_avg_price,
               stop_price, state, realized_pnl_micros, opened_at_ms, closed_at_ms
        from positions
        where symbol_id = $1
          and state in ('OPEN', 'TP1_HIT', 'TP2_HIT')
        "#,
    )
    .bind(symbol_id)
    .fetch_optional(pool)
    .await
    .context("fetch_active_position_for_symbol failed")?;
    row.map(row_to_position).transpose()
}

// ---------------------------------------------------------------------------
// risk_state / cooldowns / runtime_flags
// ---------------------------------------------------------------------------

pub async fn upsert_risk_state(pool: &PgPool, r: &RiskState) -> Result<()> {
    sqlx::query(
        r#"
        insert into risk_state (
          trade_date, starting_equity_micros, current_equity_micros,
          min_equity_micros, max_equity_micros, drawdown_pct,
          soft_halt, hard_halt, kill_switch, consecutive_loss_count
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        on conflict (trade_date) do update
          set current_equity_micros  = excluded.current_equity_micros,
              min_equity_micros      = excluded.min_equity_micros,
              max_equity_micros      = excluded.max_equity_micros,
              drawdown_pct           = excluded.drawdown_pct,
              soft_halt              = excluded.soft_halt,
              hard_halt              = excluded.hard_halt,
              kill_switch            = excluded.kill_switch,
              consecutive_loss_count = excluded.consecutive_loss_count
        "#,
    )
    .bind(r.trade_date)
    .bind(r.starting_equity_micros)
    .bind(r.current_equity_micros)
    .bind(r.min_equity_micros)
    .bind(r.max_equity_micros)
    .bind(r.drawdown_pct)
    .bind(r.soft_halt)
    .bind(r.hard_halt)
    .bind(r.kill_switch)
    .bind(r.consecutive_loss_count as i32)
    .execute(pool)
    .await
    .context("upsert_risk_state failed")?;
    Ok(())
}

pub async fn fetch_risk_state(pool: &PgPool, trade_date: NaiveDate) -> Result<Option<RiskState>> {
    let row = sqlx::query(
        r#"
        select trade_date, starting_equity_micros, current_equity_micros,
               min_equity_micros, max_equity_micros, drawdown_pct,
               soft_halt, hard_halt, kill_switch, consecutive_loss_count
        from risk_state
        where trade_date = $1
        "#,
    )
    .bind(trade_date)
    .fetch_optional(pool)
    .await
    .context("fetch_risk_state failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(RiskState {
        trade_date: row.try_get("trade_date")?,
        starting_equity_micros: row.try_get("starting_equity_micros")?,
        current_equity_micros: row.try_get("current_equity_micros")?,
        min_equity_micros: row.try_get("min_equity_micros")?,
        max_equity_micros: row.try_get("max_equity_micros")?,
        drawdown_pct: row.try_get("drawdown_pct")?,
        soft_halt: row.try_get("soft_halt")?,
        hard_halt: row.try_get("hard_halt")?,
        kill_switch: row.try_get("kill_switch")?,
        consecutive_loss_count: row.try_get::<i32, _>("consecutive_loss_count")? as u32,
    }))
}

pub async fn upsert_cooldown(pool: &PgPool, c: &Cooldown) -> Result<()> {
    sqlx::query(
        r#"
        insert into cooldowns (symbol_id, until_ms, reason)
        values ($1, $2, $3)
        on conflict (symbol_id) do update
          set until_ms = excluded.until_ms,
              reason   = excluded.reason
        "#,
    )
    .bind(c.symbol_id)
    .bind(c.until_ms)
    .bind(&c.reason)
    .execute(pool)
    .await
    .context("upsert_cooldown failed")?;
    Ok(())
}

pub async fn fetch_cooldown(pool: &PgPool, symbol_id: i64) -> Result<Option<Cooldown>> {
    let row: Option<(i64, i64, String)> = sqlx::query_as(
        "select symbol_id, until_ms, reason from cooldowns where symbol_id = $1",
    )
    .bind(symbol_id)
    .fetch_optional(pool)
    .await
    .context("fetch_cooldown failed")?;
    Ok(row.map(|(symbol_id, until_ms, reason)| Cooldown { symbol_id, until_ms, reason }))
}

pub async fn set_runtime_flag(pool: &PgPool, f: &RuntimeFlag) -> Result<()> {
    sqlx::query(
        r#"
        insert into runtime_flags (flag, value, reason, set_at_ms)
        values ($1, $2, $3, $4)
        on conflict (flag) do update
          set value    = excluded.value,
              reason   = excluded.reason,
              set_at_ms = excluded.set_at_ms
        "#,
    )
    .bind(flag_str(f.flag))
    .bind(f.value)
    .bind(&f.reason)
    .bind(f.set_at_ms)
    .execute(pool)
    .await
    .context("set_runtime_flag failed")?;
    Ok(())
}

pub async fn fetch_runtime_flag(pool: &PgPool, flag: FlagKind) -> Result<Option<RuntimeFlag>> {
    let row: Option<(bool, Option<String>, i64)> = sqlx::query_as(
        "select value, reason, set_at_ms from runtime_flags where flag = $1",
    )
    .bind(flag_str(flag))
    .fetch_optional(pool)
    .await
    .context("fetch_runtime_flag failed")?;
    Ok(row.map(|(value, reason, set_at_ms)| RuntimeFlag { flag, value, reason, set_at_ms }))
}

/// Load every persisted runtime flag, used at daemon startup to restore
/// kill-switch/risk-circuit/integrity-armed state across a restart.
pub async fn load_all_runtime_flags(pool: &PgPool) -> Result<Vec<RuntimeFlag>> {
    let rows: Vec<(String, bool, Option<String>, i64)> = sqlx::query_as(
        "select flag, value, reason, set_at_ms from runtime_flags",
    )
    .fetch_all(pool)
    .await
    .context("load_all_runtime_flags failed")?;

    rows.into_iter()
        .map(|(flag, value, reason, set_at_ms)| {
            Ok(RuntimeFlag { flag: parse_flag(&flag)?, value, reason, set_at_ms })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// account_snapshots / wallet_snapshots
// ---------------------------------------------------------------------------

pub async fn insert_account_snapshot(pool: &PgPool, s: &AccountSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        insert into account_snapshots (source, equity, wallet_balance, ts_ms)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(snapshot_source_str(s.source))
    .bind(s.equity)
    .bind(s.wallet_balance)
    .bind(s.ts_ms)
    .execute(pool)
    .await
    .context("insert_account_snapshot failed")?;
    Ok(())
}

pub async fn insert_wallet_snapshot(pool: &PgPool, s: &WalletSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        insert into wallet_snapshots (source, coin, wallet_balance, equity, ts_ms)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(snapshot_source_str(s.source))
    .bind(&s.coin)
    .bind(s.wallet_balance)
    .bind(s.equity)
    .bind(s.ts_ms)
    .execute(pool)
    .await
    .context("insert_wallet_snapshot failed")?;
    Ok(())
}

/// Most recent snapshot from each source, used by the consistency-drift
/// check to compare WS-fed vs. REST-polled equity without scanning history.
pub async fn latest_account_snapshots(pool: &PgPool) -> Result<Vec<AccountSnapshot>> {
    let rows: Vec<(String, f64, f64, i64)> = sqlx::query_as(
        r#"
        select distinct on (source) source, equity, wallet_balance, ts_ms
        from account_snapshots
        order by source, ts_ms desc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("latest_account_snapshots failed")?;

    Ok(rows
        .into_iter()
        .map(|(source, equity, wallet_balance, ts_ms)| AccountSnapshot {
            source: parse_snapshot_source(&source),
            equity,
            wallet_balance,
            ts_ms,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// traces
// ---------------------------------------------------------------------------

/// Append a trace row. Traces are a debugging/observability journal, not a
/// correctness mechanism, so there is no dedupe — a replayed trace just adds
/// another row with a fresh `trace_id`.
pub async fn insert_trace(pool: &PgPool, t: &Trace) -> Result<()> {
    sqlx::query(
        r#"
        insert into traces (trace_id, idempotency_key, ts_ms, stage, detail)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(t.trace_id)
    .bind(&t.idempotency_key)
    .bind(t.ts_ms)
    .bind(&t.stage)
    .bind(&t.detail)
    .execute(pool)
    .await
    .context("insert_trace failed")?;
    Ok(())
}

pub async fn fetch_traces_for_key(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Vec<Trace>> {
    let rows = sqlx::query(
        r#"
        select trace_id, idempotency_key, ts_ms, stage, detail
        from traces
        where idempotency_key = $1
        order by ts_ms asc
        "#,
    )
    .bind(idempotency_key)
    .fetch_all(pool)
    .await
    .context("fetch_traces_for_key failed")?;

    rows.into_iter()
        .map(|row| {
            Ok(Trace {
                trace_id: row.try_get("trace_id")?,
                idempotency_key: row.try_get("idempotency_key")?,
                ts_ms: row.try_get("ts_ms")?,
                stage: row.try_get("stage")?,
                detail: row.try_get("detail")?,
            })
        })
        .collect()
}
