use std::collections::BTreeMap;

/// 1e-6 fixed-point scale, matches `vgx-portfolio::fixedpoint`.
pub const MICROS_SCALE: i64 = 1_000_000;

/// Risk configuration (thresholds + policies).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskConfig {
    /// If equity drops by this amount from day-start equity, halt trading.
    pub daily_loss_limit_micros: i64,

    /// If equity drops by this amount from peak equity, flatten + halt.
    pub max_drawdown_limit_micros: i64,

    /// If rejects in the current window reach this, halt (storm protection).
    pub reject_storm_max_rejects_in_window: u32,

    /// Independent of the kill-switch gate: gates the circuit breaker logic
    /// on/off without affecting the manual kill-switch's own gate.
    pub risk_circuit_enabled: bool,
}

impl RiskConfig {
    pub fn sane_defaults() -> Self {
        Self {
            daily_loss_limit_micros: 0,
            max_drawdown_limit_micros: 0,
            reject_storm_max_rejects_in_window: 10,
            risk_circuit_enabled: true,
        }
    }
}

/// What the caller is asking permission to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    NewOrder,
    ModifyOrder,
    Flatten,
}

/// Kill switch categories.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KillSwitchType {
    RejectStorm,
    Desync,
    Manual,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KillSwitchEvent {
    pub kind: KillSwitchType,
    pub code: String,
    pub evidence: BTreeMap<String, String>,
}

impl KillSwitchEvent {
    pub fn new(kind: KillSwitchType) -> Self {
        let code = match kind {
            KillSwitchType::RejectStorm => "KILL_SWITCH_REJECT_STORM",
            KillSwitchType::Desync => "KILL_SWITCH_DESYNC",
            KillSwitchType::Manual => "KILL_SWITCH_MANUAL",
        }
        .to_string();

        Self {
            kind,
            code,
            evidence: BTreeMap::new(),
        }
    }

    pub fn with_evidence(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.evidence.insert(k.into(), v.into());
        self
    }
}

/// Inputs for one risk-circuit evaluation tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskInput {
    pub day_id: u32,
    pub equity_micros: i64,
    pub reject_window_id: u32,
    pub request: RequestKind,
    pub is_risk_reducing: bool,
    pub kill_switch: Option<KillSwitchEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskDecision {
    pub action: RiskAction,
    pub reason: ReasonCode,
    pub kill_switch: Option<KillSwitchEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RiskAction {
    Allow,
    Reject,
    Halt,
    FlattenAndHalt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    Allowed,
    AlreadyHalted,
    DailyLossLimitBreached,
    MaxDrawdownBreached,
    RejectStormBreached,
    KillSwitchTriggered,
    BadInput,
}

/// Risk engine state. One row persisted per UTC trade date in `risk_state`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskState {
    pub day_id: u32,
    pub day_start_equity_micros: i64,
    pub peak_equity_micros: i64,

    pub halted: bool,
    pub disarmed: bool,

    pub reject_window_id: u32,
    pub reject_count_in_window: u32,

    pub consecutive_loss_count: u32,
}

impl RiskState {
    pub fn new(day_id: u32, equity_micros: i64, reject_window_id: u32) -> Self {
        Self {
            day_id,
            day_start_equity_micros: equity_micros,
            peak_equity_micros: equity_micros,
            halted: false,
            disarmed: false,
            reject_window_id,
            reject_count_in_window: 0,
            consecutive_loss_count: 0,
        }
    }

    pub fn record_reject(&mut self, reject_window_id: u32) {
        if reject_window_id != self.reject_window_id {
            self.reject_window_id = reject_window_id;
            self.reject_count_in_window = 0;
        }
        self.reject_count_in_window = self.reject_count_in_window.saturating_add(1);
    }

    pub fn record_trade_close(&mut self, was_loss: bool) {
        if was_loss {
            self.consecutive_loss_count = self.consecutive_loss_count.saturating_add(1);
        } else {
            self.consecutive_loss_count = 0;
        }
    }
}
