use std::collections::BTreeMap;

use vgx_execution::TrailingStopMode;
use vgx_risk::RiskConfig;
use vgx_schemas::Timeframe;
use vgx_strategy::StrategyConfig;

/// Bar interval in milliseconds, used to convert a cooldown measured in bars
/// into a cooldown deadline in epoch-ms.
pub fn timeframe_ms(tf: Timeframe) -> i64 {
    match tf {
        Timeframe::H1 => 3_600_000,
        Timeframe::H4 => 14_400_000,
        Timeframe::H8 => 28_800_000,
        Timeframe::D1 => 86_400_000,
    }
}

/// Backtest configuration. Mirrors the live execution knobs (risk_pct sizing,
/// runner trail mode, cooldown-by-timeframe) so the same bars replayed
/// through `BacktestEngine` exercise the identical decision surface as LIVE,
/// minus the exchange wire boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestConfig {
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,

    /// Starting equity in quote currency (spec default: 10_000).
    pub initial_equity: f64,
    /// Fraction of equity risked per trade (raw_qty = equity*risk_pct / unit_risk).
    pub risk_pct: f64,
    /// Quantity is floored to this step.
    pub qty_step: f64,
    /// Quantity below this floor is rejected (ERROR, no position opened).
    pub min_qty: f64,

    pub max_concurrent_positions: u32,
    /// Cooldown length per timeframe, expressed in bars of that timeframe.
    pub cooldown_bars: BTreeMap<Timeframe, i64>,

    pub runner_trail_mode: TrailingStopMode,
    pub runner_atr_period: usize,
    pub runner_atr_mult: f64,
    /// Pivot fractal width used for PIVOT-mode trailing stop, and for the
    /// rolling bar-history window kept per (symbol, timeframe) to drive ATR
    /// and pivot recomputation on every bar close.
    pub pivot_width: usize,
    /// Number of most-recent bars retained per (symbol, timeframe) for the
    /// runner trailing-stop and MACD-histogram recomputation.
    pub bar_history_len: usize,
}

impl BacktestConfig {
    /// Defaults matching spec.md's stated PAPER/BACKTEST fallbacks: 10_000
    /// equity, 1h/4h/1d cooldown of one bar, ATR(14)*3.0 runner trail.
    pub fn test_defaults() -> Self {
        let mut cooldown_bars = BTreeMap::new();
        cooldown_bars.insert(Timeframe::H1, 1);
        cooldown_bars.insert(Timeframe::H4, 1);
        cooldown_bars.insert(Timeframe::H8, 1);
        cooldown_bars.insert(Timeframe::D1, 1);

        Self {
            strategy: StrategyConfig::default(),
            risk: RiskConfig::sane_defaults(),
            initial_equity: 10_000.0,
            risk_pct: 0.01,
            qty_step: 0.001,
            min_qty: 0.001,
            max_concurrent_positions: 5,
            cooldown_bars,
            runner_trail_mode: TrailingStopMode::Atr,
            runner_atr_period: 14,
            runner_atr_mult: 3.0,
            pivot_width: 2,
            bar_history_len: 200,
        }
    }
}

/// One closed position, as recorded in `backtest_trade`.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestTrade {
    pub symbol_id: i64,
    pub timeframe: Timeframe,
    pub bias: vgx_schemas::Bias,
    pub entry_price: f64,
    /// Weighted-average price across all TP1/TP2/SL exit fills.
    pub exit_price: f64,
    pub qty_total: f64,
    /// Realized pnl in quote currency.
    pub realized_pnl: f64,
    /// Realized pnl expressed in multiples of the initial risk (R).
    pub pnl_r: f64,
    pub exit_reason: &'static str,
    pub opened_at_ms: i64,
    pub closed_at_ms: i64,
}

/// Backtest run summary.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct BacktestReport {
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub trades: Vec<BacktestTrade>,
    /// (close_time_ms, equity) pairs, one per processed bar.
    pub equity_curve: Vec<(i64, f64)>,
}
