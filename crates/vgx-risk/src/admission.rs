//! Per-signal admission gates, evaluated once per trade plan before any
//! order is routed: max concurrent positions, same-symbol-same-side mutex
//! (with timeframe-priority upgrade), cooldown, and plan expiry.
//!
//! Pure and deterministic: callers supply the open-position set and
//! cooldown map snapshot, no IO happens here.

use vgx_schemas::Bias;

#[derive(Clone, Debug, PartialEq)]
pub struct OpenPositionRef {
    pub symbol_id: i64,
    pub bias: Bias,
    pub timeframe_priority: u8,
}

#[derive(Clone, Debug)]
pub struct AdmissionInput<'a> {
    pub symbol_id: i64,
    pub bias: Bias,
    pub timeframe_priority: u8,
    pub now_ms: i64,
    pub plan_expires_at_ms: i64,
    pub open_positions: &'a [OpenPositionRef],
    pub max_concurrent_positions: u32,
    pub cooldown_until_ms: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmissionReason {
    Allowed,
    PlanExpired,
    SymbolCoolingDown,
    MaxConcurrentPositionsReached,
    SameSymbolSameSideOpen,
    /// A higher-priority timeframe signal supersedes the existing lower
    /// priority position on the same (symbol, side) — the caller must close
    /// the existing position (reason "mutex_upgrade") before opening the new
    /// one.
    UpgradeRequiresClose { existing_timeframe_priority: u8 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: AdmissionReason,
}

pub fn evaluate_admission(inp: &AdmissionInput<'_>) -> AdmissionDecision {
    if inp.now_ms > inp.plan_expires_at_ms {
        return AdmissionDecision {
            allowed: false,
            reason: AdmissionReason::PlanExpired,
        };
    }

    if let Some(until) = inp.cooldown_until_ms {
        if inp.now_ms < until {
            return AdmissionDecision {
                allowed: false,
                reason: AdmissionReason::SymbolCoolingDown,
            };
        }
    }

    // Mutex is on (symbol, side): an opposite-side position on the same
    // symbol never blocks or upgrades here (only the max-concurrent-positions
    // gate below sees it).
    if let Some(existing) = inp
        .open_positions
        .iter()
        .find(|p| p.symbol_id == inp.symbol_id && p.bias == inp.bias)
    {
        if inp.timeframe_priority > existing.timeframe_priority {
            return AdmissionDecision {
                allowed: false,
                reason: AdmissionReason::UpgradeRequiresClose {
                    existing_timeframe_priority: existing.timeframe_priority,
                },
            };
        }
        return AdmissionDecision {
            allowed: false,
            reason: AdmissionReason::SameSymbolSameSideOpen,
        };
    }

    let open_count = inp.open_positions.len() as u32;
    if open_count >= inp.max_concurrent_positions {
        return AdmissionDecision {
            allowed: false,
            reason: AdmissionReason::MaxConcurrentPositionsReached,
        };
    }

    AdmissionDecision {
        allowed: true,
        reason: AdmissionReason::Allowed,
    }
}
