//! Deterministic paper/backtest fill simulator (spec: intra-bar path walk).
//!
//! Reuses `vgx_execution::split_qty`/`ExitReason` so the same sizing and
//! reason-code vocabulary as the live lifecycle applies here.

use vgx_execution::{split_qty, ExitReason};
use vgx_schemas::{Bar, Bias};

use crate::position::OpenPosition;

#[derive(Clone, Copy, PartialEq)]
enum Level {
    Sl,
    Tp1,
    Tp2,
}

/// The bar's intra-bar price path. Ordered so a favorable close never lets
/// the walk "skip" an unfavorable touch earlier in the bar — this is the
/// conservative, non-lookahead tie-break the spec requires.
fn intra_bar_path(bar: &Bar) -> [f64; 4] {
    if bar.close >= bar.open {
        [bar.open, bar.high, bar.low, bar.close]
    } else {
        [bar.open, bar.low, bar.high, bar.close]
    }
}

/// Advances `pos` through one bar of the matching simulator. Returns
/// `Some(reason)` if the position closed on this bar (`qty_open` reached 0).
pub fn simulate_bar(pos: &mut OpenPosition, bar: &Bar) -> Option<ExitReason> {
    let split = split_qty(pos.qty_total);
    let path = intra_bar_path(bar);

    for window in path.windows(2) {
        let (a, b) = (window[0], window[1]);
        if pos.is_closed() {
            break;
        }

        let lo = a.min(b);
        let hi = a.max(b);
        let mut candidates: Vec<(f64, Level)> = Vec::new();
        candidates.push((pos.eff_sl, Level::Sl));
        if !pos.tp1_filled {
            candidates.push((pos.tp1_price, Level::Tp1));
        }
        if !pos.tp2_filled {
            candidates.push((pos.tp2_price, Level::Tp2));
        }
        candidates.retain(|(level, _)| *level >= lo && *level <= hi);

        if b >= a {
            candidates.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap());
        } else {
            candidates.sort_by(|x, y| y.0.partial_cmp(&x.0).unwrap());
        }

        for (level, kind) in candidates {
            if pos.is_closed() {
                break;
            }
            match kind {
                Level::Tp1 => {
                    pos.exec_fills.push((level, split.tp1));
                    pos.qty_open -= split.tp1;
                    pos.tp1_filled = true;
                    pos.eff_sl = pos.entry_price;
                }
                Level::Tp2 => {
                    pos.exec_fills.push((level, split.tp2));
                    pos.qty_open -= split.tp2;
                    pos.tp2_filled = true;
                    pos.eff_sl = pos.runner_stop_price;
                }
                Level::Sl => {
                    let remaining = pos.qty_open;
                    pos.exec_fills.push((level, remaining));
                    pos.qty_open = 0.0;
                }
            }
        }
    }

    if !pos.is_closed() {
        return None;
    }

    let reason = if pos.tp2_filled {
        ExitReason::RunnerSl
    } else if pos.tp1_filled {
        ExitReason::SecondarySlExit
    } else {
        ExitReason::PrimarySlHit
    };
    Some(reason)
}

/// Secondary exit rule, evaluated exactly once on the first bar-close
/// strictly after entry. `true` means the rule was violated and the
/// position must be force-closed at `close` with reason `"secondary_rule"`.
pub fn secondary_rule_violated(bias: Bias, hist_entry: f64, hist_now: f64) -> bool {
    !vgx_execution::secondary_exit_ok(bias, hist_entry, hist_now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgx_schemas::Timeframe;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol_id: 1,
            timeframe: Timeframe::H1,
            open_time_ms: 0,
            close_time_ms: 3_600_000,
            open,
            high,
            low,
            close,
            volume: 1.0,
            is_complete: true,
        }
    }

    fn long_position() -> OpenPosition {
        OpenPosition {
            symbol_id: 1,
            timeframe: Timeframe::H1,
            bias: Bias::Long,
            entry_price: 100.0,
            primary_sl: 90.0,
            tp1_price: 110.0,
            tp2_price: 120.0,
            qty_total: 10.0,
            qty_open: 10.0,
            tp1_filled: false,
            tp2_filled: false,
            eff_sl: 90.0,
            runner_stop_price: 90.0,
            hist_at_entry: 0.0,
            secondary_rule_checked: false,
            exec_fills: Vec::new(),
            opened_at_ms: 0,
        }
    }

    #[test]
    fn primary_sl_hit_with_no_tp_fill() {
        let mut pos = long_position();
        let reason = simulate_bar(&mut pos, &bar(100.0, 101.0, 85.0, 88.0));
        assert_eq!(reason, Some(ExitReason::PrimarySlHit));
        assert!((pos.qty_open).abs() < 1e-9);
    }

    #[test]
    fn tp1_then_tp2_same_bar_closes_with_runner_sl_reason_only_if_sl_also_hit() {
        let mut pos = long_position();
        // Path (close>=open): open,high,low,close = 100,125,95,124
        let reason = simulate_bar(&mut pos, &bar(100.0, 125.0, 95.0, 124.0));
        assert!(reason.is_none(), "position should still be open (runner leg)");
        assert!(pos.tp1_filled);
        assert!(pos.tp2_filled);
        assert!((pos.qty_open - 2.0).abs() < 1e-9);
        assert_eq!(pos.eff_sl, pos.runner_stop_price);
    }

    #[test]
    fn break_even_after_tp1_prevents_loss_on_later_sl() {
        let mut pos = long_position();
        // Bar 1: touches TP1 only.
        let r1 = simulate_bar(&mut pos, &bar(100.0, 111.0, 99.0, 105.0));
        assert!(r1.is_none());
        assert!(pos.tp1_filled);
        assert_eq!(pos.eff_sl, pos.entry_price);

        // Bar 2: drops back to entry — closes at break-even, not a loss.
        let r2 = simulate_bar(&mut pos, &bar(105.0, 106.0, 99.0, 100.0));
        assert_eq!(r2, Some(ExitReason::SecondarySlExit));
        assert!(pos.realized_pnl() >= 0.0);
    }
}
