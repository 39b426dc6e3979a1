//! Wire and persistence schemas shared across every service.
//!
//! `EventEnvelope<T>` is the outer shape published to every stream; `Payload`
//! is the closed set of things that travel inside one. Entities below mirror
//! the persistence tables 1:1 (see `vgx-db`), so a row can be built directly
//! from a deserialized payload with no remapping layer.

pub mod codec;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub run_id: Uuid,
    pub engine_id: String,
    pub ts_utc: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub topic: String,
    pub event_type: String,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(
        run_id: Uuid,
        engine_id: impl Into<String>,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        correlation_id: Uuid,
        causation_id: Option<Uuid>,
        ts_utc: DateTime<Utc>,
        payload: T,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            run_id,
            engine_id: engine_id.into(),
            ts_utc,
            correlation_id,
            causation_id,
            topic: topic.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Closed set of payloads that travel over the stream broker. Tagging on
/// `event_type` keeps every consumer's match exhaustive — a new payload kind
/// forces every match arm in the codebase to be revisited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum Payload {
    BarClose(Bar),
    Signal(Signal),
    TradePlan(TradePlan),
    ExecutionReport(ExecutionReport),
    RiskEvent(RiskEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::H8 => "8h",
            Timeframe::D1 => "1d",
        }
    }

    /// Ordinal rank for the same-symbol-same-side timeframe-priority upgrade
    /// rule: a higher rank wins the mutex over an existing lower-rank OPEN
    /// position. 1h < 4h < 8h < 1d.
    pub fn rank(self) -> u8 {
        match self {
            Timeframe::H1 => 0,
            Timeframe::H4 => 1,
            Timeframe::H8 => 2,
            Timeframe::D1 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Long,
    Short,
}

/// One closed candle. Prices are `f64`: they originate as exchange decimal
/// quotes and are only ever compared with the epsilon defined in
/// `vgx-indicators`, never hashed or persisted as an exact key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub symbol_id: i64,
    pub timeframe: Timeframe,
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_complete: bool,
}

/// Reservation row guarding idempotent bar-close publish: reserved before
/// the event is put on the bus, deleted only if publish fails, so a crash
/// between reserve and publish cannot silently drop a bar-close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarCloseEmit {
    pub symbol_id: i64,
    pub timeframe: Timeframe,
    pub close_time_ms: i64,
    pub reserved_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub idempotency_key: String,
    pub symbol_id: i64,
    pub timeframe: Timeframe,
    pub close_time_ms: i64,
    pub bias: Bias,
    pub confirmations: Vec<String>,
    pub macd_hist: f64,
    pub pivot_price: f64,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitRule {
    NextBarNotShortenExit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub plan_id: Uuid,
    pub signal_idempotency_key: String,
    pub symbol_id: i64,
    pub timeframe: Timeframe,
    pub bias: Bias,
    pub entry_price: f64,
    pub stop_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub exit_rule: ExitRule,
    pub expires_at_ms: i64,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPurpose {
    Entry,
    Tp1,
    Tp2,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    CancelPending,
    Cancelled,
    ReplacePending,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub symbol_id: i64,
    pub purpose: OrderPurpose,
    pub side: Side,
    pub qty: f64,
    pub limit_price: Option<f64>,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub exchange_link_id: Option<String>,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: Uuid,
    pub order_id: Uuid,
    pub exchange_fill_id: Option<String>,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    Tp1Hit,
    Tp2Hit,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub plan_id: Uuid,
    pub symbol_id: i64,
    pub bias: Bias,
    pub qty_open: f64,
    pub entry_avg_price: f64,
    pub stop_price: f64,
    pub state: PositionState,
    /// Realized pnl in micros (1e-6 scale), see `vgx-portfolio::fixedpoint`.
    pub realized_pnl_micros: i64,
    pub opened_at_ms: i64,
    pub closed_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub trade_date: chrono::NaiveDate,
    pub starting_equity_micros: i64,
    pub current_equity_micros: i64,
    pub min_equity_micros: i64,
    pub max_equity_micros: i64,
    pub drawdown_pct: f64,
    pub soft_halt: bool,
    pub hard_halt: bool,
    pub kill_switch: bool,
    pub consecutive_loss_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cooldown {
    pub symbol_id: i64,
    pub until_ms: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagKind {
    KillSwitch,
    RiskCircuit,
    IntegrityArmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeFlag {
    pub flag: FlagKind,
    pub value: bool,
    pub reason: Option<String>,
    pub set_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Important,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// Delivery record keyed by `notification_id` (== the source event's
/// `event_id` — the dedup key across at-least-once redelivery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub stream: String,
    pub message_id: String,
    pub severity: Severity,
    pub text: String,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub next_attempt_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    Ws,
    Rest,
}

/// Account-level equity/balance snapshot, taken from either the private WS
/// feed or a REST poll. Used for drift detection: two snapshots disagreeing
/// beyond tolerance is a `RiskEventKind::ConsistencyDrift`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub source: SnapshotSource,
    pub equity: f64,
    pub wallet_balance: f64,
    pub ts_ms: i64,
}

/// Per-coin wallet balance snapshot, same drift-detection role as
/// `AccountSnapshot` but keyed by coin rather than account-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub source: SnapshotSource,
    pub coin: String,
    pub wallet_balance: f64,
    pub equity: f64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: Uuid,
    pub idempotency_key: Option<String>,
    pub ts_ms: i64,
    pub stage: String,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskEventKind {
    DataGap,
    DuplicateOrRevisedBar,
    PriceJump,
    VolumeAnomaly,
    WsReconnect,
    ConsistencyDrift,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub kind: RiskEventKind,
    pub symbol_id: Option<i64>,
    pub detail: serde_json::Value,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub avg_fill_price: Option<f64>,
    pub ts_ms: i64,
}
