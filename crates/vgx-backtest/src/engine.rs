//! Event-driven backtest replay: feeds closed bars through the same
//! strategy/admission/execution decision surface LIVE uses, minus the
//! exchange wire boundary. One bar at a time, no lookahead — `StrategyHost`
//! only ever sees bars already pushed to it, and the matching simulator in
//! `matching.rs` only ever walks the bar currently being processed.

use std::collections::BTreeMap;
use std::fmt;

use vgx_execution::{update_runner_stop, ExitReason, TrailingStopMode};
use vgx_indicators::{atr, macd_series, pivots, PivotKind};
use vgx_risk::{
    evaluate, evaluate_admission, AdmissionInput, AdmissionReason, OpenPositionRef, RequestKind,
    RiskAction, RiskInput, RiskState, MICROS_SCALE,
};
use vgx_schemas::{Bar, Bias, Timeframe, TradePlan};
use vgx_strategy::StrategyHost;

use crate::matching::{secondary_rule_violated, simulate_bar};
use crate::position::OpenPosition;
use crate::types::{timeframe_ms, BacktestConfig, BacktestReport, BacktestTrade};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacktestError {
    IncompleteBar { symbol_id: i64, close_time_ms: i64 },
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestError::IncompleteBar { symbol_id, close_time_ms } => write!(
                f,
                "incomplete bar for symbol {symbol_id} at {close_time_ms}: replay only accepts closed candles"
            ),
        }
    }
}

impl std::error::Error for BacktestError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    symbol_id: i64,
    timeframe_rank: u8,
}

impl SeriesKey {
    fn new(symbol_id: i64, timeframe: Timeframe) -> Self {
        Self { symbol_id, timeframe_rank: timeframe.rank() }
    }
}

/// Days since the Unix epoch in UTC, used only to bucket `vgx_risk`'s daily
/// circuit-breaker reset — the risk engine doesn't care about calendar
/// semantics beyond "a new bucket starts a new day".
fn day_id_from_ms(ms: i64) -> u32 {
    ms.div_euclid(86_400_000) as u32
}

fn macd_hist_now(window: &[Bar], cfg: &vgx_strategy::StrategyConfig) -> f64 {
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
    macd_series(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal)
        .last()
        .map(|m| m.hist)
        .unwrap_or(0.0)
}

fn compute_runner_stop(cfg: &BacktestConfig, window: &[Bar], bias: Bias, old_stop: f64, close: f64) -> f64 {
    let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = window.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
    match cfg.runner_trail_mode {
        TrailingStopMode::Atr => {
            let atr_now = atr(&highs, &lows, &closes, cfg.runner_atr_period)
                .last()
                .copied()
                .unwrap_or(0.0);
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

/// Drives one full backtest replay over a sequence of closed bars. Holds its
/// own rolling bar windows (separate from `StrategyHost`'s private window)
/// because the runner trailing-stop and the secondary-rule histogram need
/// high/low series the strategy host doesn't expose.
pub struct BacktestEngine {
    cfg: BacktestConfig,
    host: StrategyHost,
    series: BTreeMap<SeriesKey, Vec<Bar>>,
    open_positions: BTreeMap<i64, OpenPosition>,
    cooldown_until_ms: BTreeMap<(i64, Timeframe), i64>,
    risk_state: RiskState,
    cash: f64,
}

impl BacktestEngine {
    pub fn new(cfg: BacktestConfig) -> Self {
        let equity_micros = (cfg.initial_equity * MICROS_SCALE as f64).round() as i64;
        let risk_state = RiskState::new(0, equity_micros, 0);
        let host = StrategyHost::new(cfg.strategy.clone());
        Self {
            cfg,
            host,
            series: BTreeMap::new(),
            open_positions: BTreeMap::new(),
            cooldown_until_ms: BTreeMap::new(),
            risk_state,
            cash: 0.0,
        }
    }

    pub fn register_symbol(&mut self, symbol_id: i64, symbol: impl Into<String>) {
        self.host.register_symbol(symbol_id, symbol);
    }

    fn equity(&self) -> f64 {
        self.cash
    }

    pub fn run(&mut self, bars: &[Bar]) -> Result<BacktestReport, BacktestError> {
        self.cash = self.cfg.initial_equity;
        let mut report = BacktestReport::default();

        for bar in bars {
            if report.halted {
                break;
            }
            if !bar.is_complete {
                return Err(BacktestError::IncompleteBar {
                    symbol_id: bar.symbol_id,
                    close_time_ms: bar.close_time_ms,
                });
            }

            self.push_window(bar);
            self.run_lifecycle(bar, &mut report);

            if let Some(output) = self.host.on_bar_close(*bar, bar.close_time_ms) {
                if let Some(plan) = output.trade_plan {
                    self.try_open(&plan, bar, &mut report);
                }
            }

            self.tick_risk(bar, &mut report);
            report.equity_curve.push((bar.close_time_ms, self.equity()));
        }

        Ok(report)
    }

    fn push_window(&mut self, bar: &Bar) {
        let key = SeriesKey::new(bar.symbol_id, bar.timeframe);
        let window = self.series.entry(key).or_default();
        window.push(*bar);
        if window.len() > self.cfg.bar_history_len {
            let excess = window.len() - self.cfg.bar_history_len;
            window.drain(0..excess);
        }
    }

    /// Runs the two bar-close lifecycle checks — secondary exit rule, then
    /// TP1/TP2/SL matching, then the runner trailing-stop update — against
    /// the OPEN position on `bar`'s (symbol, timeframe), if any.
    fn run_lifecycle(&mut self, bar: &Bar, report: &mut BacktestReport) {
        let needs_lifecycle = self
            .open_positions
            .get(&bar.symbol_id)
            .is_some_and(|pos| pos.timeframe == bar.timeframe);
        if !needs_lifecycle {
            return;
        }

        let checked_already = self.open_positions[&bar.symbol_id].secondary_rule_checked;
        if !checked_already {
            let key = SeriesKey::new(bar.symbol_id, bar.timeframe);
            let hist_now = self
                .series
                .get(&key)
                .map(|w| macd_hist_now(w, &self.cfg.strategy))
                .unwrap_or(0.0);
            let pos = &self.open_positions[&bar.symbol_id];
            if secondary_rule_violated(pos.bias, pos.hist_at_entry, hist_now) {
                self.force_close(bar.symbol_id, bar, ExitReason::SecondaryRule.as_str(), report);
                return;
            }
        }

        let pos = self.open_positions.get_mut(&bar.symbol_id).unwrap();
        pos.secondary_rule_checked = true;
        let exit_reason = simulate_bar(pos, bar);
        if let Some(reason) = exit_reason {
            let pos = self.open_positions.remove(&bar.symbol_id).unwrap();
            self.settle(pos, bar.close_time_ms, reason.as_str(), report);
            return;
        }

        let key = SeriesKey::new(bar.symbol_id, bar.timeframe);
        let window = self.series.get(&key);
        let new_stop = match window {
            Some(w) => {
                let pos = &self.open_positions[&bar.symbol_id];
                compute_runner_stop(&self.cfg, w, pos.bias, pos.runner_stop_price, bar.close)
            }
            None => return,
        };
        let pos = self.open_positions.get_mut(&bar.symbol_id).unwrap();
        pos.runner_stop_price = new_stop;
        if pos.tp2_filled {
            pos.eff_sl = new_stop;
        }
    }

    fn try_open(&mut self, plan: &TradePlan, bar: &Bar, report: &mut BacktestReport) {
        if self.risk_state.halted {
            return;
        }

        let open_refs: Vec<OpenPositionRef> = self
            .open_positions
            .values()
            .map(|p| OpenPositionRef {
                symbol_id: p.symbol_id,
                bias: p.bias,
                timeframe_priority: p.timeframe.rank(),
            })
            .collect();
        let cooldown_until_ms = self.cooldown_until_ms.get(&(plan.symbol_id, plan.timeframe)).copied();
        let input = AdmissionInput {
            symbol_id: plan.symbol_id,
            bias: plan.bias,
            timeframe_priority: plan.timeframe.rank(),
            now_ms: bar.close_time_ms,
            plan_expires_at_ms: plan.expires_at_ms,
            open_positions: &open_refs,
            max_concurrent_positions: self.cfg.max_concurrent_positions,
            cooldown_until_ms,
        };
        let decision = evaluate_admission(&input);
        match decision.reason {
            AdmissionReason::Allowed => {}
            AdmissionReason::UpgradeRequiresClose { .. } => {
                self.force_close(plan.symbol_id, bar, ExitReason::MutexUpgrade.as_str(), report);
            }
            _ => return,
        }

        let unit_risk = (plan.entry_price - plan.stop_price).abs();
        if unit_risk <= 0.0 {
            return;
        }
        let risk_amount = self.equity() * self.cfg.risk_pct;
        let raw_qty = risk_amount / unit_risk;
        let qty = (raw_qty / self.cfg.qty_step).floor() * self.cfg.qty_step;
        if qty < self.cfg.min_qty {
            return;
        }

        let key = SeriesKey::new(plan.symbol_id, plan.timeframe);
        let hist_at_entry = self
            .series
            .get(&key)
            .map(|w| macd_hist_now(w, &self.cfg.strategy))
            .unwrap_or(0.0);

        self.open_positions
            .insert(plan.symbol_id, OpenPosition::from_plan(plan, qty, hist_at_entry));
    }

    fn force_close(&mut self, symbol_id: i64, bar: &Bar, reason: &'static str, report: &mut BacktestReport) {
        if let Some(mut pos) = self.open_positions.remove(&symbol_id) {
            if pos.qty_open > 0.0 {
                pos.exec_fills.push((bar.close, pos.qty_open));
                pos.qty_open = 0.0;
            }
            self.settle(pos, bar.close_time_ms, reason, report);
        }
    }

    fn settle(&mut self, pos: OpenPosition, closed_at_ms: i64, reason: &'static str, report: &mut BacktestReport) {
        let pnl = pos.realized_pnl();
        self.cash += pnl;
        self.risk_state.record_trade_close(pnl < 0.0);

        if reason == ExitReason::PrimarySlHit.as_str() {
            let bars = self.cfg.cooldown_bars.get(&pos.timeframe).copied().unwrap_or(0);
            let until = closed_at_ms + bars * timeframe_ms(pos.timeframe);
            self.cooldown_until_ms.insert((pos.symbol_id, pos.timeframe), until);
        }

        report.trades.push(BacktestTrade {
            symbol_id: pos.symbol_id,
            timeframe: pos.timeframe,
            bias: pos.bias,
            entry_price: pos.entry_price,
            exit_price: pos.weighted_exit_price(),
            qty_total: pos.qty_total,
            realized_pnl: pnl,
            pnl_r: pos.pnl_r(),
            exit_reason: reason,
            opened_at_ms: pos.opened_at_ms,
            closed_at_ms,
        });
    }

    fn tick_risk(&mut self, bar: &Bar, report: &mut BacktestReport) {
        let equity_micros = (self.equity() * MICROS_SCALE as f64).round() as i64;
        let input = RiskInput {
            day_id: day_id_from_ms(bar.close_time_ms),
            equity_micros,
            reject_window_id: 0,
            request: RequestKind::NewOrder,
            is_risk_reducing: false,
            kill_switch: None,
        };
        let decision = evaluate(&self.cfg.risk, &mut self.risk_state, &input);
        if matches!(decision.action, RiskAction::Halt | RiskAction::FlattenAndHalt) {
            report.halted = true;
            report.halt_reason = Some(format!("{:?}", decision.reason));
            if matches!(decision.action, RiskAction::FlattenAndHalt) {
                let symbol_ids: Vec<i64> = self.open_positions.keys().copied().collect();
                for symbol_id in symbol_ids {
                    self.force_close(symbol_id, bar, "RISK_HALT", report);
                }
            }
        }
    }
}
