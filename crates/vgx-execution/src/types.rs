use vgx_schemas::{Bias, Side};

/// Broker-facing order request. Quantities are `f64` contract sizes (crypto
/// futures allow fractional qty); prices cross at the `prices` wire boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionIntent {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub order_type: String,
    pub limit_price: Option<f64>,
    pub reduce_only: bool,
    pub time_in_force: String,
}

/// Purpose a staged order plays in the entry/TP1/TP2 leg structure. Mirrors
/// `vgx_schemas::OrderPurpose` (kept separate so execution can reason about
/// legs before a `vgx_schemas::Order` row exists).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Leg {
    Entry,
    Tp1,
    Tp2,
}

/// Engine decision for a single evaluation: zero or more intents to route.
/// No side effects; the caller owns persistence and broker dispatch.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ExecutionDecision {
    pub intents: Vec<ExecutionIntent>,
}

impl ExecutionDecision {
    pub fn empty() -> Self {
        Self { intents: vec![] }
    }
}

/// Quantity split across the three legs: TP1 and TP2 each take 40%, the
/// runner (trailing-stop) leg keeps the remaining 20%.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QtySplit {
    pub tp1: f64,
    pub tp2: f64,
    pub runner: f64,
}

pub const TP1_FRACTION: f64 = 0.4;
pub const TP2_FRACTION: f64 = 0.4;

pub fn split_qty(qty_total: f64) -> QtySplit {
    let tp1 = qty_total * TP1_FRACTION;
    let tp2 = qty_total * TP2_FRACTION;
    QtySplit {
        tp1,
        tp2,
        runner: qty_total - tp1 - tp2,
    }
}

/// Why a position was closed. String forms match the reason codes spec.md
/// fixes for `exit_reason` / `reason` fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    PrimarySlHit,
    SecondarySlExit,
    RunnerSl,
    MutexUpgrade,
    SecondaryRule,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::PrimarySlHit => "PRIMARY_SL_HIT",
            ExitReason::SecondarySlExit => "SECONDARY_SL_EXIT",
            ExitReason::RunnerSl => "RUNNER_SL",
            ExitReason::MutexUpgrade => "mutex_upgrade",
            ExitReason::SecondaryRule => "secondary_rule",
        }
    }
}

/// The side a reduce-only TP/SL leg must trade: opposite of the position's
/// entry side.
pub fn exit_side(bias: Bias) -> Side {
    match bias {
        Bias::Long => Side::Sell,
        Bias::Short => Side::Buy,
    }
}

pub fn entry_side(bias: Bias) -> Side {
    match bias {
        Bias::Long => Side::Buy,
        Bias::Short => Side::Sell,
    }
}
