//! Builds the staged entry/TP1/TP2 leg set from an admitted `TradePlan`, and
//! the two bar-close-driven lifecycle checks that apply to every OPEN
//! position regardless of mode: the secondary exit rule and the runner
//! trailing-stop update.

use vgx_schemas::{Bias, TradePlan};

use crate::types::{entry_side, exit_side, split_qty, ExecutionDecision, ExecutionIntent};

/// Builds the three orders a freshly admitted plan submits: a market/limit
/// entry for the full size, and two reduce-only limit TPs sized 40%/40% of
/// `qty_total` (the runner's 20% has no standing order — it is managed by
/// the trailing-stop update, not a resting order).
///
/// `symbol` is the ticker string for the broker wire boundary; `TradePlan`
/// only carries `symbol_id` (the symbol registry lookup lives in `vgx-db`).
pub fn build_staged_orders(
    plan: &TradePlan,
    symbol: &str,
    qty_total: f64,
    entry_order_type: &str,
    order_id_prefix: &str,
) -> ExecutionDecision {
    let split = split_qty(qty_total);
    let entry = ExecutionIntent {
        order_id: format!("{order_id_prefix}-entry"),
        symbol: symbol.to_string(),
        side: entry_side(plan.bias),
        qty: qty_total,
        order_type: entry_order_type.to_string(),
        limit_price: (entry_order_type == "Limit").then_some(plan.entry_price),
        reduce_only: false,
        time_in_force: "GTC".to_string(),
    };
    let tp1 = ExecutionIntent {
        order_id: format!("{order_id_prefix}-tp1"),
        symbol: symbol.to_string(),
        side: exit_side(plan.bias),
        qty: split.tp1,
        order_type: "Limit".to_string(),
        limit_price: Some(plan.tp1_price),
        reduce_only: true,
        time_in_force: "GTC".to_string(),
    };
    let tp2 = ExecutionIntent {
        order_id: format!("{order_id_prefix}-tp2"),
        symbol: symbol.to_string(),
        side: exit_side(plan.bias),
        qty: split.tp2,
        order_type: "Limit".to_string(),
        limit_price: Some(plan.tp2_price),
        reduce_only: true,
        time_in_force: "GTC".to_string(),
    };
    ExecutionDecision {
        intents: vec![entry, tp1, tp2],
    }
}

/// Secondary exit rule ("next bar not shortening"), evaluated exactly once
/// on the first bar-close strictly after entry. `true` means the position
/// stays open.
pub fn secondary_exit_ok(bias: Bias, hist_entry: f64, hist_now: f64) -> bool {
    match bias {
        Bias::Long => hist_now > hist_entry,
        Bias::Short => hist_now < hist_entry,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrailingStopMode {
    Atr,
    Pivot,
}

/// Updates the runner's trailing stop. The new level is clamped so it only
/// ever moves in the position's favor (monotone: non-decreasing for longs,
/// non-increasing for shorts) — a trailing stop that could retreat would
/// defeat the point of trailing.
pub fn update_runner_stop(
    bias: Bias,
    mode: TrailingStopMode,
    old_stop: f64,
    close: f64,
    atr: f64,
    atr_mult: f64,
    pivot_price: Option<f64>,
) -> f64 {
    let candidate = match (mode, bias) {
        (TrailingStopMode::Atr, Bias::Long) => close - atr * atr_mult,
        (TrailingStopMode::Atr, Bias::Short) => close + atr * atr_mult,
        (TrailingStopMode::Pivot, _) => pivot_price.unwrap_or(old_stop),
    };
    match bias {
        Bias::Long => old_stop.max(candidate),
        Bias::Short => old_stop.min(candidate),
    }
}
