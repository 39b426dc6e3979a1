//! Pure technical-indicator math. No IO, no state across calls — every
//! function takes a full price series and returns an aligned output series
//! or point list. Correctness of the math beyond a faithful textbook
//! implementation is out of scope; callers own anti-lookahead (only ever
//! pass `is_complete` bars in).

pub const EPSILON: f64 = 1e-9;

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// Simple moving average seed for the first EMA value, then standard EMA
/// recursion: `ema[i] = close[i] * k + ema[i-1] * (1 - k)`, `k = 2/(n+1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub hist: f64,
}

/// Classic MACD(12, 26, 9): EMA12 - EMA26, signal = EMA9 of that series.
pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<Macd> {
    if closes.len() < slow.max(fast) {
        return Vec::new();
    }
    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);
    let macd_line: Vec<f64> = ema_fast.iter().zip(ema_slow.iter()).map(|(f, s)| f - s).collect();
    let signal_line = ema(&macd_line, signal);
    macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(&m, &s)| Macd {
            macd: m,
            signal: s,
            hist: m - s,
        })
        .collect()
}

/// Wilder-smoothed RSI(period). First value seeded by a simple average of
/// the first `period` gains/losses, then Wilder recursion thereafter.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if closes.len() <= period {
        return Vec::new();
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;
    let mut out = Vec::with_capacity(closes.len() - period);
    out.push(rsi_from_avgs(avg_gain, avg_loss));

    for i in (period + 1)..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out.push(rsi_from_avgs(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// On-balance volume: cumulative volume signed by close direction.
pub fn obv(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    if closes.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(closes.len());
    let mut acc = 0.0;
    out.push(acc);
    for i in 1..closes.len() {
        if closes[i] > closes[i - 1] {
            acc += volumes[i];
        } else if closes[i] < closes[i - 1] {
            acc -= volumes[i];
        }
        out.push(acc);
    }
    out
}

/// Wilder ATR(period): true range smoothed with Wilder's recursion.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    if closes.len() <= period {
        return Vec::new();
    }
    let mut trs = Vec::with_capacity(closes.len());
    trs.push(highs[0] - lows[0]);
    for i in 1..closes.len() {
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        trs.push(tr);
    }
    let mut avg: f64 = trs[1..=period].iter().sum::<f64>() / period as f64;
    let mut out = vec![avg];
    for &tr in &trs[(period + 1)..] {
        avg = (avg * (period as f64 - 1.0) + tr) / period as f64;
        out.push(avg);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy)]
pub struct Pivot {
    pub index: usize,
    pub price: f64,
    pub kind: PivotKind,
}

/// Fractal pivot detection: a bar is a pivot high/low if its high/low is
/// strictly the extreme among its `width` left and right neighbors.
pub fn pivots(highs: &[f64], lows: &[f64], width: usize) -> Vec<Pivot> {
    let n = highs.len();
    let mut out = Vec::new();
    if n < 2 * width + 1 {
        return out;
    }
    for i in width..(n - width) {
        let is_high = (i - width..i).all(|j| highs[j] < highs[i])
            && (i + 1..=i + width).all(|j| highs[j] < highs[i]);
        if is_high {
            out.push(Pivot {
                index: i,
                price: highs[i],
                kind: PivotKind::High,
            });
            continue;
        }
        let is_low = (i - width..i).all(|j| lows[j] > lows[i])
            && (i + 1..=i + width).all(|j| lows[j] > lows[i]);
        if is_low {
            out.push(Pivot {
                index: i,
                price: lows[i],
                kind: PivotKind::Low,
            });
        }
    }
    out
}

/// A gap interval between bar `i-2`'s high/low and bar `i`'s low/high, with
/// no overlap from bar `i-1`'s range — a fair value gap.
#[derive(Debug, Clone, Copy)]
pub struct FairValueGap {
    pub start_index: usize,
    pub low: f64,
    pub high: f64,
    pub bullish: bool,
}

pub fn fair_value_gaps(highs: &[f64], lows: &[f64]) -> Vec<FairValueGap> {
    let mut out = Vec::new();
    if highs.len() < 3 {
        return out;
    }
    for i in 2..highs.len() {
        if lows[i] > highs[i - 2] {
            out.push(FairValueGap {
                start_index: i - 2,
                low: highs[i - 2],
                high: lows[i],
                bullish: true,
            });
        } else if highs[i] < lows[i - 2] {
            out.push(FairValueGap {
                start_index: i - 2,
                low: highs[i],
                high: lows[i - 2],
                bullish: false,
            });
        }
    }
    out
}

pub fn price_near_fvg(price: f64, gaps: &[FairValueGap], bullish: bool, tolerance_pct: f64) -> bool {
    gaps.iter().filter(|g| g.bullish == bullish).any(|g| {
        let span = (g.high - g.low).max(f64::EPSILON);
        let tol = span * tolerance_pct;
        price >= g.low - tol && price <= g.high + tol
    })
}

/// Bullish engulfing: prior candle bearish, current candle bullish and its
/// body fully contains the prior candle's body.
pub fn is_bullish_engulfing(
    prev_open: f64,
    prev_close: f64,
    open: f64,
    close: f64,
) -> bool {
    prev_close < prev_open && close > open && close >= prev_open && open <= prev_close
}

pub fn is_bearish_engulfing(
    prev_open: f64,
    prev_close: f64,
    open: f64,
    close: f64,
) -> bool {
    prev_close > prev_open && close < open && open >= prev_close && close <= prev_open
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_first_value_equals_seed() {
        let out = ema(&[10.0, 20.0, 30.0], 5);
        assert_eq!(out[0], 10.0);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let closes: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let out = rsi(&closes, 14);
        assert!(approx_eq(*out.last().unwrap(), 100.0));
    }

    #[test]
    fn pivot_high_detected_at_local_max() {
        let highs = vec![1.0, 2.0, 5.0, 2.0, 1.0];
        let lows = vec![0.5, 1.0, 2.0, 1.0, 0.5];
        let pv = pivots(&highs, &lows, 2);
        assert_eq!(pv.len(), 1);
        assert_eq!(pv[0].index, 2);
        assert_eq!(pv[0].kind, PivotKind::High);
    }

    #[test]
    fn bullish_engulfing_detects_full_body_containment() {
        assert!(is_bullish_engulfing(10.0, 9.0, 8.5, 11.0));
        assert!(!is_bullish_engulfing(10.0, 9.0, 9.5, 9.8));
    }

    #[test]
    fn fvg_detects_bullish_gap() {
        let highs = vec![10.0, 10.5, 13.0];
        let lows = vec![9.0, 9.5, 12.0];
        let gaps = fair_value_gaps(&highs, &lows);
        assert_eq!(gaps.len(), 1);
        assert!(gaps[0].bullish);
    }
}
