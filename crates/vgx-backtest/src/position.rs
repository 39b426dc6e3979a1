use vgx_schemas::{Bias, Timeframe, TradePlan};

/// An OPEN position being replayed through the backtest engine. Tracks
/// everything the matching simulator and the two bar-close lifecycle checks
/// (secondary exit rule, runner trailing stop) need.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenPosition {
    pub symbol_id: i64,
    pub timeframe: Timeframe,
    pub bias: Bias,

    pub entry_price: f64,
    pub primary_sl: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,

    pub qty_total: f64,
    pub qty_open: f64,
    pub tp1_filled: bool,
    pub tp2_filled: bool,

    /// Currently effective stop-loss: `primary_sl` until TP1 fills (→ entry,
    /// break-even), then the runner stop once TP2 fills.
    pub eff_sl: f64,
    /// Updated every bar close once `qty_runner > 0`, independent of whether
    /// TP2 has filled (live application to the exchange is gated on TP2
    /// fill; in backtest it only takes effect via `eff_sl` after TP2 fills).
    pub runner_stop_price: f64,

    pub hist_at_entry: f64,
    pub secondary_rule_checked: bool,

    /// (price, qty) pairs for every TP1/TP2/SL fill so far, for the
    /// weighted-average exit price on close.
    pub exec_fills: Vec<(f64, f64)>,

    pub opened_at_ms: i64,
}

impl OpenPosition {
    pub fn from_plan(plan: &TradePlan, qty_total: f64, hist_at_entry: f64) -> Self {
        Self {
            symbol_id: plan.symbol_id,
            timeframe: plan.timeframe,
            bias: plan.bias,
            entry_price: plan.entry_price,
            primary_sl: plan.stop_price,
            tp1_price: plan.tp1_price,
            tp2_price: plan.tp2_price,
            qty_total,
            qty_open: qty_total,
            tp1_filled: false,
            tp2_filled: false,
            eff_sl: plan.stop_price,
            runner_stop_price: plan.stop_price,
            hist_at_entry,
            secondary_rule_checked: false,
            exec_fills: Vec::new(),
            opened_at_ms: plan.created_at_ms,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.qty_open <= 0.0
    }

    /// Weighted-average fill price across all recorded exits.
    pub fn weighted_exit_price(&self) -> f64 {
        let total_qty: f64 = self.exec_fills.iter().map(|(_, q)| q).sum();
        if total_qty <= 0.0 {
            return self.entry_price;
        }
        let sum: f64 = self.exec_fills.iter().map(|(p, q)| p * q).sum();
        sum / total_qty
    }

    /// Realized pnl in quote currency across all recorded exits.
    pub fn realized_pnl(&self) -> f64 {
        let sign = match self.bias {
            Bias::Long => 1.0,
            Bias::Short => -1.0,
        };
        self.exec_fills
            .iter()
            .map(|(p, q)| sign * (p - self.entry_price) * q)
            .sum()
    }

    /// Realized pnl expressed in multiples of the initial risk (R = |entry - primary_sl|).
    pub fn pnl_r(&self) -> f64 {
        let unit_risk = (self.entry_price - self.primary_sl).abs();
        if unit_risk <= 0.0 {
            return 0.0;
        }
        let exit = self.weighted_exit_price();
        match self.bias {
            Bias::Long => (exit - self.entry_price) / unit_risk,
            Bias::Short => (self.entry_price - exit) / unit_risk,
        }
    }
}
