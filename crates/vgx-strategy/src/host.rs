//! Drives `divergence::evaluate` off a rolling per-(symbol, timeframe) bar
//! window. One strategy, one set of rules — no plugin catalog: swapping the
//! strategy out is explicitly not a supported operation.

use std::collections::BTreeMap;

use vgx_schemas::{Bar, Timeframe};

use crate::divergence;
use crate::types::{StrategyConfig, StrategyOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    symbol_id: i64,
    timeframe_rank: u8,
}

impl SeriesKey {
    fn new(symbol_id: i64, timeframe: Timeframe) -> Self {
        Self {
            symbol_id,
            timeframe_rank: timeframe.rank(),
        }
    }
}

/// Keeps the last `window` closed bars per (symbol, timeframe) and re-runs
/// the divergence evaluation each time a new bar closes.
pub struct StrategyHost {
    cfg: StrategyConfig,
    window: usize,
    series: BTreeMap<SeriesKey, Vec<Bar>>,
    symbols: BTreeMap<i64, String>,
}

impl StrategyHost {
    pub fn new(cfg: StrategyConfig) -> Self {
        let window = cfg.min_bars.max(cfg.vegas_slow_ema) + 2;
        Self {
            cfg,
            window,
            series: BTreeMap::new(),
            symbols: BTreeMap::new(),
        }
    }

    /// Registers the human-readable ticker behind a `symbol_id`, needed only
    /// for the idempotency-key hash (persistence keys everything else off
    /// `symbol_id`).
    pub fn register_symbol(&mut self, symbol_id: i64, symbol: impl Into<String>) {
        self.symbols.insert(symbol_id, symbol.into());
    }

    /// Feeds one closed bar and returns a strategy output if the three-
    /// segment divergence setup confirms on this close.
    pub fn on_bar_close(&mut self, bar: Bar, now_ms: i64) -> Option<StrategyOutput> {
        if !bar.is_complete {
            return None;
        }
        let symbol = self.symbols.get(&bar.symbol_id)?.clone();
        let key = SeriesKey::new(bar.symbol_id, bar.timeframe);
        let series = self.series.entry(key).or_default();
        series.push(bar);
        if series.len() > self.window {
            let excess = series.len() - self.window;
            series.drain(0..excess);
        }
        divergence::evaluate(&self.cfg, &symbol, series, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(symbol_id: i64, i: i64, close: f64) -> Bar {
        Bar {
            symbol_id,
            timeframe: Timeframe::H1,
            open_time_ms: i * 3_600_000,
            close_time_ms: (i + 1) * 3_600_000,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 10.0,
            is_complete: true,
        }
    }

    #[test]
    fn unregistered_symbol_is_skipped() {
        let mut host = StrategyHost::new(StrategyConfig::default());
        assert!(host.on_bar_close(bar(1, 0, 100.0), 0).is_none());
    }

    #[test]
    fn window_stays_bounded() {
        let mut host = StrategyHost::new(StrategyConfig::default());
        host.register_symbol(1, "BTCUSDT");
        for i in 0..500 {
            host.on_bar_close(bar(1, i, 100.0 + (i % 7) as f64), i);
        }
        let key = SeriesKey::new(1, Timeframe::H1);
        assert!(host.series.get(&key).unwrap().len() <= host.window);
    }
}
