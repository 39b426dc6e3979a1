//! Marketdata ingestion: raw-bar normalization, gap planning, 8h derivation,
//! and the data-quality report builder. Produces a complete, monotone,
//! deduplicated sequence of closed bars per (symbol, timeframe).
//!
//! This crate is pure logic — no WS/REST IO (that's `vgx-exchange`), no
//! broker publish, no DB writes. The daemon binary wires this crate's
//! functions together with `vgx-exchange`, `vgx-broker`, and `vgx-db` into
//! the running service.

pub mod normalizer;
pub mod provider;
pub mod quality;

pub use normalizer::{normalize, normalize_all, sort_normalized, NormalizedBar, NormalizerError};
pub use provider::{plan_gap, EightHourAggregator, GapPlan, ProviderError, RawBar};
pub use quality::{
    build_quality_report, BarKey, DuplicateIssue, GapIssue, MonotonicityIssue, QualityReport,
    SeriesKey,
};

/// Data-quality risk-event kinds a marketdata ingestion pass may raise.
/// These never block emission of the underlying bar_close; they are
/// observability-only signals for `vgx-schemas::RiskEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataQualityAlert {
    DataLag,
    BarDuplicate,
    PriceJump,
    VolumeAnomaly,
}

/// Flags a data-lag condition: `now_ms - close_time_ms` exceeds `threshold_ms`.
pub fn detect_data_lag(now_ms: i64, close_time_ms: i64, threshold_ms: i64) -> bool {
    now_ms - close_time_ms > threshold_ms
}

/// Flags a revised/duplicate bar: the incoming OHLCV differs from what was
/// already stored for the same (symbol, timeframe, close_time_ms) key.
pub fn detect_bar_revision(stored: &NormalizedBar, incoming: &NormalizedBar) -> bool {
    stored.open_micros != incoming.open_micros
        || stored.high_micros != incoming.high_micros
        || stored.low_micros != incoming.low_micros
        || stored.close_micros != incoming.close_micros
}

/// Flags a price jump: `|close - prev_close| / prev_close >= threshold_pct`.
pub fn detect_price_jump(prev_close_micros: i64, close_micros: i64, threshold_pct: f64) -> bool {
    if prev_close_micros == 0 {
        return false;
    }
    let delta = (close_micros - prev_close_micros).unsigned_abs() as f64;
    delta / (prev_close_micros.unsigned_abs() as f64) >= threshold_pct
}

/// Flags a volume anomaly: `volume >= spike_multiple * median(recent_volumes)`.
/// `recent_volumes` need not be sorted; the median is computed internally.
pub fn detect_volume_anomaly(volume: i64, recent_volumes: &[i64], spike_multiple: f64) -> bool {
    if recent_volumes.is_empty() {
        return false;
    }
    let mut sorted = recent_volumes.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    };
    if median <= 0.0 {
        return false;
    }
    volume as f64 >= spike_multiple * median
}

/// Market-state classification from Wilder ATR, emitted edge-triggered (only
/// on transition) by the caller, not on every bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Normal,
    HighVol,
    NewsWindow,
}

/// Classifies the current market state. `news_window` is evaluated by the
/// caller against a configured UTC time-of-day window and passed in here so
/// this function stays a pure classifier with no wall-clock access.
pub fn classify_market_state(atr_pct: f64, high_vol_threshold_pct: f64, news_window: bool) -> MarketState {
    if news_window {
        MarketState::NewsWindow
    } else if atr_pct >= high_vol_threshold_pct {
        MarketState::HighVol
    } else {
        MarketState::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lag_detected_past_threshold() {
        assert!(detect_data_lag(10_000, 1_000, 5_000));
        assert!(!detect_data_lag(10_000, 6_000, 5_000));
    }

    #[test]
    fn price_jump_detected_at_threshold() {
        assert!(detect_price_jump(100_000_000, 105_000_000, 0.05));
        assert!(!detect_price_jump(100_000_000, 102_000_000, 0.05));
    }

    #[test]
    fn volume_anomaly_uses_median_of_recent() {
        let recent = vec![100, 110, 90, 105, 95];
        assert!(detect_volume_anomaly(500, &recent, 3.0));
        assert!(!detect_volume_anomaly(150, &recent, 3.0));
    }

    #[test]
    fn market_state_news_window_takes_priority() {
        assert_eq!(classify_market_state(0.01, 0.5, true), MarketState::NewsWindow);
        assert_eq!(classify_market_state(0.6, 0.5, false), MarketState::HighVol);
        assert_eq!(classify_market_state(0.1, 0.5, false), MarketState::Normal);
    }
}
