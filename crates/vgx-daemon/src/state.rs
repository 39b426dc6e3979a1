//! Shared runtime state for vgx-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;
use vgx_integrity::IntegrityState;

// ---------------------------------------------------------------------------
// BusMsg - SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of daemon state, returned by GET /v1/status and
/// carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub active_run_id: Option<Uuid>,
    /// "idle" | "running" | "halted"
    pub state: String,
    pub notes: Option<String>,
    /// Reflects `IntegrityState::is_execution_blocked()` negation: true = armed.
    pub integrity_armed: bool,
}

// ---------------------------------------------------------------------------
// DevTradingSnapshot
// ---------------------------------------------------------------------------

/// Dev-only snapshot of the trading domain, injectable via
/// `POST /v1/trading/snapshot` and gated behind `VGX_DEV_ALLOW_SNAPSHOT_INJECT`.
///
/// Populated from the same entity types `vgx-db` persists and `vgx-reconcile`
/// compares against the exchange. This lets a local UI or integration test
/// exercise the read endpoints without a live exchange connection or database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DevTradingSnapshot {
    pub account: vgx_schemas::AccountSnapshot,
    pub positions: Vec<vgx_schemas::Position>,
    pub orders: Vec<vgx_schemas::Order>,
    pub fills: Vec<vgx_schemas::Fill>,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Mutable run/status state.
    pub status: Arc<RwLock<StatusSnapshot>>,
    /// Integrity engine state (arm / disarm).
    pub integrity: Arc<RwLock<IntegrityState>>,
    /// Dev-only injected trading snapshot; `None` until an operator injects one.
    pub dev_snapshot: Arc<RwLock<Option<DevTradingSnapshot>>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let initial_status = StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            active_run_id: None,
            state: "idle".to_string(),
            notes: Some("placeholder status; wire run loop next".to_string()),
            integrity_armed: false, // fail-closed boot; requires explicit operator arm
        };

        // Fail-closed boot: the daemon never trusts a prior armed state. An
        // explicit POST /v1/integrity/arm is required every session.
        let mut integrity = IntegrityState::new();
        integrity.disarmed = true;

        Self {
            bus,
            build: BuildInfo {
                service: "vgx-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            status: Arc::new(RwLock::new(initial_status)),
            integrity: Arc::new(RwLock::new(integrity)),
            dev_snapshot: Arc::new(RwLock::new(None)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn a background task that periodically checks for drift between the
/// locally-believed OMS state and the broker's view, disarming the system on
/// any detected drift (see `vgx_reconcile::reconcile_tick`).
///
/// `local_fn` and `broker_fn` are supplied by the run orchestrator once a run
/// is active; `broker_fn` returning `None` means no snapshot is available yet
/// and the tick is skipped.
pub fn spawn_reconcile_tick<L, B>(
    state: Arc<AppState>,
    local_fn: L,
    broker_fn: B,
    interval: Duration,
) where
    L: Fn() -> vgx_reconcile::LocalSnapshot + Send + 'static,
    B: Fn() -> Option<vgx_reconcile::BrokerSnapshot> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let broker = match broker_fn() {
                Some(b) => b,
                None => continue,
            };
            let local = local_fn();

            match vgx_reconcile::reconcile_tick(&local, &broker) {
                vgx_reconcile::DriftAction::Continue => {}
                vgx_reconcile::DriftAction::HaltAndDisarm { report } => {
                    {
                        let mut ig = state.integrity.write().await;
                        ig.disarmed = true;
                    }

                    let snap = {
                        let mut s = state.status.write().await;
                        s.state = "halted".to_string();
                        s.integrity_armed = false;
                        s.notes = Some(format!("reconcile drift detected: {:?}", report.reasons));
                        s.clone()
                    };

                    let _ = state.bus.send(BusMsg::Status(snap));
                    let _ = state.bus.send(BusMsg::LogLine {
                        level: "ERROR".to_string(),
                        msg: "reconcile drift: integrity disarmed".to_string(),
                    });
                }
            }
        }
    });
}
