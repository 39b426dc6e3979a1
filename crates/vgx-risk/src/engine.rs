use crate::{
    KillSwitchEvent, KillSwitchType, ReasonCode, RequestKind, RiskAction, RiskConfig, RiskDecision,
    RiskInput, RiskState,
};

// ---------------------------------------------------------------------------
// Exposure sanity clamps
// ---------------------------------------------------------------------------

/// Guard: `equity_micros` must be >= 0. Negative equity is unrepresentable;
/// a bad upstream source producing one is caught here before it can corrupt
/// running state or cause arithmetic overflow in the floor calculations
/// below.
pub fn validate_equity_input(equity_micros: i64) -> Option<RiskDecision> {
    if equity_micros < 0 {
        return Some(RiskDecision {
            action: RiskAction::Halt,
            reason: ReasonCode::BadInput,
            kill_switch: None,
        });
    }
    None
}

/// Guard: `order_qty` must be strictly positive.
pub fn validate_order_qty(qty: i64) -> Option<RiskDecision> {
    if qty <= 0 {
        return Some(RiskDecision {
            action: RiskAction::Halt,
            reason: ReasonCode::BadInput,
            kill_switch: None,
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Core engine
// ---------------------------------------------------------------------------

/// Deterministic tick maintenance: resets day_start_equity on day rollover,
/// updates peak equity, resets reject counter on reject window rollover.
pub fn tick(_cfg: &RiskConfig, st: &mut RiskState, inp: &RiskInput) {
    if inp.day_id != st.day_id {
        st.day_id = inp.day_id;
        st.day_start_equity_micros = inp.equity_micros;
    }

    if inp.equity_micros > st.peak_equity_micros {
        st.peak_equity_micros = inp.equity_micros;
    }

    if inp.reject_window_id != st.reject_window_id {
        st.reject_window_id = inp.reject_window_id;
        st.reject_count_in_window = 0;
    }
}

/// Main evaluator (pure deterministic logic + sticky flags in state).
pub fn evaluate(cfg: &RiskConfig, st: &mut RiskState, inp: &RiskInput) -> RiskDecision {
    // 0) Sanity clamp runs before tick so bad equity cannot corrupt running state.
    if validate_equity_input(inp.equity_micros).is_some() {
        st.halted = true;
        return RiskDecision {
            action: RiskAction::Halt,
            reason: ReasonCode::BadInput,
            kill_switch: None,
        };
    }

    tick(cfg, st, inp);

    // 1) Kill switch overrides everything, independent of `risk_circuit_enabled`.
    if let Some(ks) = &inp.kill_switch {
        st.halted = true;
        st.disarmed = true;
        return RiskDecision {
            action: RiskAction::FlattenAndHalt,
            reason: ReasonCode::KillSwitchTriggered,
            kill_switch: Some(ks.clone()),
        };
    }

    // 2) Sticky halt: once halted, reject anything that isn't flatten.
    if st.halted {
        return match inp.request {
            RequestKind::Flatten => RiskDecision {
                action: RiskAction::Allow,
                reason: ReasonCode::AlreadyHalted,
                kill_switch: None,
            },
            _ => RiskDecision {
                action: RiskAction::Reject,
                reason: ReasonCode::AlreadyHalted,
                kill_switch: None,
            },
        };
    }

    if !cfg.risk_circuit_enabled {
        return RiskDecision {
            action: RiskAction::Allow,
            reason: ReasonCode::Allowed,
            kill_switch: None,
        };
    }

    // 3) Daily loss limit: halt trading when breached.
    if cfg.daily_loss_limit_micros > 0 {
        match st.day_start_equity_micros.checked_sub(cfg.daily_loss_limit_micros) {
            None => {
                st.halted = true;
                return RiskDecision {
                    action: RiskAction::Halt,
                    reason: ReasonCode::BadInput,
                    kill_switch: None,
                };
            }
            Some(floor) => {
                if inp.equity_micros <= floor {
                    st.halted = true;
                    return RiskDecision {
                        action: RiskAction::Halt,
                        reason: ReasonCode::DailyLossLimitBreached,
                        kill_switch: Some(
                            KillSwitchEvent::new(KillSwitchType::Manual)
                                .with_evidence("type", "DAILY_LOSS_LIMIT")
                                .with_evidence(
                                    "day_start_equity_micros",
                                    st.day_start_equity_micros.to_string(),
                                )
                                .with_evidence("equity_micros", inp.equity_micros.to_string())
                                .with_evidence(
                                    "daily_loss_limit_micros",
                                    cfg.daily_loss_limit_micros.to_string(),
                                ),
                        ),
                    };
                }
            }
        }
    }

    // 4) Max drawdown: flatten + halt when breached.
    if cfg.max_drawdown_limit_micros > 0 {
        match st.peak_equity_micros.checked_sub(cfg.max_drawdown_limit_micros) {
            None => {
                st.halted = true;
                st.disarmed = true;
                return RiskDecision {
                    action: RiskAction::Halt,
                    reason: ReasonCode::BadInput,
                    kill_switch: None,
                };
            }
            Some(floor) => {
                if inp.equity_micros <= floor {
                    st.halted = true;
                    st.disarmed = true;
                    return RiskDecision {
                        action: RiskAction::FlattenAndHalt,
                        reason: ReasonCode::MaxDrawdownBreached,
                        kill_switch: Some(
                            KillSwitchEvent::new(KillSwitchType::Manual)
                                .with_evidence("type", "MAX_DRAWDOWN")
                                .with_evidence("peak_equity_micros", st.peak_equity_micros.to_string())
                                .with_evidence("equity_micros", inp.equity_micros.to_string())
                                .with_evidence(
                                    "max_drawdown_limit_micros",
                                    cfg.max_drawdown_limit_micros.to_string(),
                                ),
                        ),
                    };
                }
            }
        }
    }

    // 5) Reject storm.
    if st.reject_count_in_window >= cfg.reject_storm_max_rejects_in_window {
        st.halted = true;
        return RiskDecision {
            action: RiskAction::Halt,
            reason: ReasonCode::RejectStormBreached,
            kill_switch: Some(
                KillSwitchEvent::new(KillSwitchType::RejectStorm)
                    .with_evidence("reject_window_id", st.reject_window_id.to_string())
                    .with_evidence("reject_count_in_window", st.reject_count_in_window.to_string())
                    .with_evidence(
                        "reject_storm_max_rejects_in_window",
                        cfg.reject_storm_max_rejects_in_window.to_string(),
                    ),
            ),
        };
    }

    RiskDecision {
        action: RiskAction::Allow,
        reason: ReasonCode::Allowed,
        kill_switch: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(equity_micros: i64) -> RiskInput {
        RiskInput {
            day_id: 1,
            equity_micros,
            reject_window_id: 1,
            request: RequestKind::NewOrder,
            is_risk_reducing: false,
            kill_switch: None,
        }
    }

    #[test]
    fn daily_loss_limit_halts() {
        let cfg = RiskConfig {
            daily_loss_limit_micros: 100 * crate::MICROS_SCALE,
            ..RiskConfig::sane_defaults()
        };
        let mut st = RiskState::new(1, 1_000 * crate::MICROS_SCALE, 1);
        let d = evaluate(&cfg, &mut st, &input(899 * crate::MICROS_SCALE));
        assert_eq!(d.action, RiskAction::Halt);
        assert!(st.halted);
    }

    #[test]
    fn disabled_circuit_still_honors_kill_switch() {
        let cfg = RiskConfig {
            risk_circuit_enabled: false,
            ..RiskConfig::sane_defaults()
        };
        let mut st = RiskState::new(1, 1_000, 1);
        let mut inp = input(1_000);
        inp.kill_switch = Some(KillSwitchEvent::new(KillSwitchType::Manual));
        let d = evaluate(&cfg, &mut st, &inp);
        assert_eq!(d.action, RiskAction::FlattenAndHalt);
    }
}
