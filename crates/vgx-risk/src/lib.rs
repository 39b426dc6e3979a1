//! Risk engine.
//!
//! Two cooperating layers, both pure/deterministic, no IO, no wall-clock:
//! - `engine`: equity-based circuit breakers (daily loss limit, max
//!   drawdown, reject storm, kill switch) evaluated per run tick.
//! - `admission`: per-signal admission gates (max concurrent positions,
//!   same-symbol-same-side mutex with timeframe-priority upgrade, cooldown,
//!   plan expiry) evaluated once per trade plan before any order is routed.

mod admission;
mod engine;
mod types;

pub use admission::{evaluate_admission, AdmissionDecision, AdmissionInput, AdmissionReason, OpenPositionRef};
pub use engine::{evaluate, tick, validate_equity_input, validate_order_qty};
pub use types::*;
