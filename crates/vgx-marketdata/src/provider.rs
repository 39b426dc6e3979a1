//! Raw bar boundary type, gap-fill planning, and 8h-from-1h derivation.
//!
//! This module defines the ingestion-side types shared by `normalizer.rs`
//! and `quality.rs`. It does **not** fetch data itself (that's
//! `vgx-exchange`), write to the database, or publish to the broker.

use std::fmt;

// ---------------------------------------------------------------------------
// Raw bar
// ---------------------------------------------------------------------------

/// A single OHLCV bar as returned verbatim by the exchange (REST or WS).
///
/// Prices are kept as decimal strings so downstream callers can normalise
/// deterministically (convert to integer micros) without floating-point
/// rounding being introduced at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBar {
    pub symbol: String,
    /// Canonical timeframe string (e.g. `"1h"`, `"4h"`, `"8h"`, `"1d"`).
    pub timeframe: String,
    pub open_ts: i64,
    pub end_ts: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: i64,
    /// `true` when the bar period has fully closed (`confirm=true` on WS).
    pub is_complete: bool,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ProviderError {
    Transport(String),
    Api { code: Option<i64>, message: String },
    Decode(String),
    Config(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "transport error: {msg}"),
            ProviderError::Api { code: Some(c), message } => {
                write!(f, "provider api error code={c}: {message}")
            }
            ProviderError::Api { code: None, message } => {
                write!(f, "provider api error: {message}")
            }
            ProviderError::Decode(msg) => write!(f, "decode error: {msg}"),
            ProviderError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

// ---------------------------------------------------------------------------
// Gap planning
// ---------------------------------------------------------------------------

/// Result of comparing a newly-confirmed bar's `open_ts` against the prior
/// stored `close_ts` for the same (symbol, timeframe) series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapPlan {
    /// Number of whole bars missing strictly between `prior_close_ts` and
    /// the new bar's `open_ts`.
    pub missing_bars: i64,
    /// `open_ts` of the first missing bar, inclusive.
    pub backfill_from_ts: i64,
    /// `close_ts` of the last missing bar, inclusive.
    pub backfill_to_ts: i64,
}

/// Computes the gap, if any, between `prior_close_ts` and `new_open_ts` for
/// a series whose bar stride is `tf_secs`. Returns `None` when the new bar
/// is contiguous with the prior one (no gap) or arrives out of order.
///
/// Caller is expected to cap `missing_bars` against a configured
/// `max_gapfill_bars` before issuing the REST backfill.
pub fn plan_gap(prior_close_ts: i64, new_open_ts: i64, tf_secs: i64) -> Option<GapPlan> {
    if tf_secs <= 0 || new_open_ts <= prior_close_ts {
        return None;
    }
    let delta = new_open_ts - prior_close_ts - 1;
    if delta <= 0 {
        return None;
    }
    let missing_bars = delta / tf_secs;
    if missing_bars <= 0 {
        return None;
    }
    Some(GapPlan {
        missing_bars,
        backfill_from_ts: prior_close_ts + 1,
        backfill_to_ts: prior_close_ts + missing_bars * tf_secs,
    })
}

// ---------------------------------------------------------------------------
// 8h-from-1h derivation
// ---------------------------------------------------------------------------

const EIGHT_HOUR_SECS: i64 = 8 * 3_600;
const ONE_HOUR_SECS: i64 = 3_600;

/// Accumulates confirmed 1h bars into their enclosing 8h window and emits
/// the derived bar once all 8 expected 1h bars for that window have
/// arrived, in order, with no gaps.
#[derive(Debug, Default)]
pub struct EightHourAggregator {
    window_start: Option<i64>,
    bars: Vec<RawBar>,
}

impl EightHourAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one confirmed 1h bar. Returns `Some(derived 8h RawBar)` once the
    /// window completes; resets on window rollover or a detected gap inside
    /// the current window (caller's gap-fill path is responsible for
    /// re-delivering the missing 1h bars before the window can complete).
    pub fn push(&mut self, bar: RawBar) -> Option<RawBar> {
        let window = (bar.open_ts / EIGHT_HOUR_SECS) * EIGHT_HOUR_SECS;
        if self.window_start != Some(window) {
            self.window_start = Some(window);
            self.bars.clear();
        }

        if let Some(last) = self.bars.last() {
            if bar.open_ts != last.end_ts + 1 {
                // out-of-order or gapped bar inside the window: drop and restart
                self.window_start = Some(window);
                self.bars.clear();
            }
        }

        self.bars.push(bar);

        if self.bars.len() == 8 {
            let derived = derive_8h(&self.bars, window);
            self.bars.clear();
            self.window_start = None;
            return Some(derived);
        }
        None
    }
}

fn derive_8h(bars: &[RawBar], window_start: i64) -> RawBar {
    let first = &bars[0];
    let last = &bars[bars.len() - 1];
    let high = bars
        .iter()
        .map(|b| b.high.parse::<f64>().unwrap_or(f64::MIN))
        .fold(f64::MIN, f64::max);
    let low = bars
        .iter()
        .map(|b| b.low.parse::<f64>().unwrap_or(f64::MAX))
        .fold(f64::MAX, f64::min);
    let volume: i64 = bars.iter().map(|b| b.volume).sum();
    RawBar {
        symbol: first.symbol.clone(),
        timeframe: "8h".to_string(),
        open_ts: window_start,
        end_ts: window_start + ONE_HOUR_SECS * 8 - 1,
        open: first.open.clone(),
        high: format!("{high}"),
        low: format!("{low}"),
        close: last.close.clone(),
        volume,
        is_complete: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(symbol: &str, open_ts: i64, end_ts: i64, o: &str, h: &str, l: &str, c: &str, v: i64) -> RawBar {
        RawBar {
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
            open_ts,
            end_ts,
            open: o.to_string(),
            high: h.to_string(),
            low: l.to_string(),
            close: c.to_string(),
            volume: v,
            is_complete: true,
        }
    }

    #[test]
    fn no_gap_for_contiguous_bar() {
        assert!(plan_gap(3_600, 3_601, 3_600).is_none());
    }

    #[test]
    fn gap_plan_computes_missing_bars() {
        let plan = plan_gap(3_600, 3_600 * 4 + 1, 3_600).unwrap();
        assert_eq!(plan.missing_bars, 2);
        assert_eq!(plan.backfill_from_ts, 3_601);
        assert_eq!(plan.backfill_to_ts, 3_600 * 3);
    }

    #[test]
    fn eight_hour_window_completes_after_eight_bars() {
        let mut agg = EightHourAggregator::new();
        let mut derived = None;
        for i in 0..8 {
            let open_ts = i * ONE_HOUR_SECS;
            let end_ts = open_ts + ONE_HOUR_SECS - 1;
            let b = bar("BTCUSDT", open_ts, end_ts, "100", "110", "90", "105", 10);
            derived = agg.push(b);
        }
        let d = derived.unwrap();
        assert_eq!(d.timeframe, "8h");
        assert_eq!(d.volume, 80);
        assert_eq!(d.open, "100");
        assert_eq!(d.close, "105");
    }

    #[test]
    fn gap_inside_window_restarts_accumulation() {
        let mut agg = EightHourAggregator::new();
        agg.push(bar("BTCUSDT", 0, ONE_HOUR_SECS - 1, "1", "2", "0.5", "1.5", 1));
        // skip hour 1, jump to hour 2: gap detected, window restarts from hour 2's bar
        let derived = agg.push(bar("BTCUSDT", ONE_HOUR_SECS * 2, ONE_HOUR_SECS * 3 - 1, "1", "2", "0.5", "1.5", 1));
        assert!(derived.is_none());
    }
}
