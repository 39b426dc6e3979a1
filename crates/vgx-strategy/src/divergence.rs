//! Three-segment MACD divergence: fractal pivots on price against MACD
//! histogram, confirmed by a Vegas EMA directional filter and a vote of
//! secondary signals (engulfing, RSI divergence, OBV divergence, FVG
//! proximity). Pure function — no IO, no clock reads; callers supply
//! `now_ms` for `created_at_ms`/`expires_at_ms` so results stay replayable.

use sha2::{Digest, Sha256};
use vgx_indicators::{
    ema, fair_value_gaps, is_bearish_engulfing, is_bullish_engulfing, macd_series, obv,
    price_near_fvg, pivots, rsi, PivotKind,
};
use vgx_schemas::{Bar, Bias, ExitRule, Signal, TradePlan};
use uuid::Uuid;

use crate::types::{StrategyConfig, StrategyOutput};

fn idempotency_key(symbol: &str, timeframe_str: &str, close_time_ms: i64, bias: Bias) -> String {
    let bias_str = match bias {
        Bias::Long => "LONG",
        Bias::Short => "SHORT",
    };
    let canonical = format!("{symbol}|{timeframe_str}|{close_time_ms}|{bias_str}");
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Three matching-kind pivots, oldest first, needed to read off p1 > p2 > p3
/// (or p1 < p2 < p3) without re-sorting: `pivots()` already returns them in
/// ascending bar-index order.
fn last_three(pivots: &[vgx_indicators::Pivot], kind: PivotKind) -> Option<[vgx_indicators::Pivot; 3]> {
    let matching: Vec<_> = pivots.iter().filter(|p| p.kind == kind).copied().collect();
    if matching.len() < 3 {
        return None;
    }
    let n = matching.len();
    Some([matching[n - 3], matching[n - 2], matching[n - 1]])
}

fn rsi_at(rsi_vals: &[f64], period: usize, index: usize) -> Option<f64> {
    if index < period {
        return None;
    }
    rsi_vals.get(index - period).copied()
}

/// Evaluates one closed-bar window. `bars` must be ascending by
/// `close_time_ms`, all `is_complete`, with the bar under evaluation last.
/// Returns `None` at any stage that fails to confirm — a MACD-divergence
/// setup that doesn't clear `min_confirmations` emits nothing, not a signal
/// with fewer votes.
pub fn evaluate(cfg: &StrategyConfig, symbol: &str, bars: &[Bar], now_ms: i64) -> Option<StrategyOutput> {
    if bars.len() < cfg.min_bars {
        return None;
    }
    let last_bar = bars.last()?;
    let timeframe = last_bar.timeframe;
    let symbol_id = last_bar.symbol_id;
    let close_time_ms = last_bar.close_time_ms;

    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let last = bars.len() - 1;

    let macd = macd_series(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
    if macd.len() != bars.len() {
        return None;
    }
    let pivot_list = pivots(&highs, &lows, cfg.pivot_width);
    let rsi_vals = rsi(&closes, cfg.rsi_period);
    let obv_vals = obv(&closes, &volumes);
    let ema_fast = ema(&closes, cfg.vegas_fast_ema);
    let ema_slow = ema(&closes, cfg.vegas_slow_ema);
    let fvgs = fair_value_gaps(&highs, &lows);

    let long_pivots = last_three(&pivot_list, PivotKind::Low);
    let short_pivots = last_three(&pivot_list, PivotKind::High);

    let long_ok = long_pivots.filter(|[p1, p2, p3]| {
        p1.price > p2.price
            && p2.price > p3.price
            && macd[p1.index].hist < macd[p2.index].hist
            && macd[p2.index].hist < macd[p3.index].hist
    });
    let short_ok = short_pivots.filter(|[p1, p2, p3]| {
        p1.price < p2.price
            && p2.price < p3.price
            && macd[p1.index].hist > macd[p2.index].hist
            && macd[p2.index].hist > macd[p3.index].hist
    });

    let vegas_long = closes[last] > ema_fast[last] && closes[last] > ema_slow[last];
    let vegas_short = closes[last] < ema_fast[last] && closes[last] < ema_slow[last];

    let (bias, pivots3) = match (long_ok.filter(|_| vegas_long), short_ok.filter(|_| vegas_short)) {
        (Some(p), _) => (Bias::Long, p),
        (None, Some(p)) => (Bias::Short, p),
        (None, None) => return None,
    };
    let [_, p2, p3] = pivots3;

    let mut confirmations = Vec::new();
    let engulfing = match bias {
        Bias::Long => is_bullish_engulfing(opens[last - 1], closes[last - 1], opens[last], closes[last]),
        Bias::Short => is_bearish_engulfing(opens[last - 1], closes[last - 1], opens[last], closes[last]),
    };
    if engulfing {
        confirmations.push("ENGULFING".to_string());
    }

    if let (Some(rsi_p2), Some(rsi_p3)) = (rsi_at(&rsi_vals, cfg.rsi_period, p2.index), rsi_at(&rsi_vals, cfg.rsi_period, p3.index)) {
        let diverges = match bias {
            Bias::Long => p3.price < p2.price && rsi_p3 >= rsi_p2,
            Bias::Short => p3.price > p2.price && rsi_p3 <= rsi_p2,
        };
        if diverges {
            confirmations.push("RSI_DIVERGENCE".to_string());
        }
    }

    let obv_p2 = obv_vals[p2.index];
    let obv_p3 = obv_vals[p3.index];
    let obv_diverges = match bias {
        Bias::Long => p3.price < p2.price && obv_p3 >= obv_p2,
        Bias::Short => p3.price > p2.price && obv_p3 <= obv_p2,
    };
    if obv_diverges {
        confirmations.push("OBV_DIVERGENCE".to_string());
    }

    if price_near_fvg(closes[last], &fvgs, bias == Bias::Long, cfg.fvg_tolerance_pct) {
        confirmations.push("FVG_PROXIMITY".to_string());
    }

    if confirmations.len() < cfg.min_confirmations {
        return None;
    }

    let key = idempotency_key(symbol, timeframe.as_str(), close_time_ms, bias);
    let signal = Signal {
        idempotency_key: key.clone(),
        symbol_id,
        timeframe,
        close_time_ms,
        bias,
        confirmations,
        macd_hist: macd[last].hist,
        pivot_price: p3.price,
        created_at_ms: now_ms,
    };

    let trade_plan = cfg.auto_timeframes.contains(&timeframe).then(|| {
        let entry_price = closes[last];
        let stop_price = p3.price;
        let unit_risk = (entry_price - stop_price).abs();
        let (tp1_price, tp2_price) = match bias {
            Bias::Long => (
                entry_price + cfg.risk_reward_tp1_r * unit_risk,
                entry_price + cfg.risk_reward_tp2_r * unit_risk,
            ),
            Bias::Short => (
                entry_price - cfg.risk_reward_tp1_r * unit_risk,
                entry_price - cfg.risk_reward_tp2_r * unit_risk,
            ),
        };
        TradePlan {
            plan_id: Uuid::new_v4(),
            signal_idempotency_key: key,
            symbol_id,
            timeframe,
            bias,
            entry_price,
            stop_price,
            tp1_price,
            tp2_price,
            exit_rule: ExitRule::NextBarNotShortenExit,
            expires_at_ms: close_time_ms + cfg.plan_validity_ms,
            created_at_ms: now_ms,
        }
    });

    Some(StrategyOutput { signal, trade_plan })
}
