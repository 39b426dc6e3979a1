use std::collections::BTreeSet;

use vgx_schemas::Timeframe;

/// Tunables for the three-segment MACD divergence strategy. Mirrors the
/// constants spec.md fixes as defaults; nothing here changes the strategy's
/// rules, only the thresholds it is deployed with.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyConfig {
    /// Minimum closed bars required before evaluation runs at all.
    pub min_bars: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub pivot_width: usize,
    pub vegas_fast_ema: usize,
    pub vegas_slow_ema: usize,
    pub min_confirmations: usize,
    pub fvg_tolerance_pct: f64,
    /// Timeframes that automatically build a trade_plan from a signal.
    pub auto_timeframes: BTreeSet<Timeframe>,
    /// Trade-plan validity window, in milliseconds, from close_time_ms.
    pub plan_validity_ms: i64,
    pub risk_reward_tp1_r: f64,
    pub risk_reward_tp2_r: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_bars: 120,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rsi_period: 14,
            pivot_width: 2,
            vegas_fast_ema: 144,
            vegas_slow_ema: 169,
            min_confirmations: 2,
            fvg_tolerance_pct: 0.001,
            auto_timeframes: [Timeframe::H1, Timeframe::H4, Timeframe::D1].into_iter().collect(),
            plan_validity_ms: 30 * 60 * 1000,
            risk_reward_tp1_r: 1.0,
            risk_reward_tp2_r: 2.0,
        }
    }
}

/// Result of one strategy evaluation over a closed bar: always a `Signal`
/// when confirmations clear the bar, optionally a `TradePlan` when the
/// timeframe is in `auto_timeframes`.
#[derive(Clone, Debug)]
pub struct StrategyOutput {
    pub signal: vgx_schemas::Signal,
    pub trade_plan: Option<vgx_schemas::TradePlan>,
}
