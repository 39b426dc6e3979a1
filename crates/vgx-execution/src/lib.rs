//! vgx-execution
//!
//! Translates an admitted `TradePlan` into staged broker orders (entry +
//! TP1 + TP2, with the runner managed by a trailing stop rather than a
//! resting order), and hosts the single choke-point — `BrokerGateway` — that
//! every broker submit/cancel/replace must flow through.
//!
//! Pure, deterministic logic lives in `engine` and `types`. The broker
//! boundary (`order_router`, `gateway`, `id_map`, `prices`, `reconcile_guard`)
//! is generic over any `BrokerAdapter` and carries no strategy or risk logic.
//! `oms::state_machine` tracks the explicit lifecycle of a live broker order.
//! `abnormal` decides entry-order timeout/reprice/fallback-market action;
//! `ws_ingest` decodes private-WS order/execution pushes. Both are pure —
//! the daemon's execution service owns the tick/connection loops around
//! them.

mod abnormal;
mod engine;
mod gateway;
mod id_map;
mod oms;
mod order_router;
mod prices;
mod reconcile_guard;
mod types;
mod ws_ingest;

pub use abnormal::{evaluate_entry_timeout, AbnormalAction};
pub use engine::{build_staged_orders, secondary_exit_ok, update_runner_stop, TrailingStopMode};
pub use gateway::{intent_id_to_client_order_id, BrokerGateway, GateRefusal, GateVerdicts};
pub use id_map::BrokerOrderMap;
pub use oms::state_machine::{is_terminal, OmsEvent, OmsOrder, TransitionError};
pub use order_router::{
    BrokerAdapter, BrokerCancelResponse, BrokerReplaceRequest, BrokerReplaceResponse,
    BrokerSubmitRequest, BrokerSubmitResponse, OrderRouter,
};
pub use prices::{micros_to_price, price_to_micros, PricingError, MICROS_PER_UNIT};
pub use reconcile_guard::ReconcileFreshnessGuard;
pub use types::{
    entry_side, exit_side, split_qty, ExecutionDecision, ExecutionIntent, ExitReason, Leg,
    QtySplit, TP1_FRACTION, TP2_FRACTION,
};
pub use ws_ingest::{parse_fill_update, parse_order_update, WsFillUpdate, WsOrderUpdate};
