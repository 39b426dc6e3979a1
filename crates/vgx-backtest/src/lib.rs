//! vgx-backtest
//!
//! Deterministic replay of the crypto futures divergence strategy over a
//! sequence of closed bars.
//!
//! Pipeline per bar: BAR -> STRATEGY -> ADMISSION -> MATCHING SIMULATOR -> RISK
//!
//! - Deterministic replay (same bars + config => identical results)
//! - No lookahead (incomplete bars rejected)
//! - Intra-bar matching simulator walks the conservative OHLC path (spec's
//!   non-lookahead tie-break), not "fill at close"
//! - Risk enforcement via `vgx_risk` (daily loss limit, max drawdown)
//! - Same admission gates as LIVE (`vgx_risk::evaluate_admission`) and the
//!   same staged sizing/trailing-stop rules as LIVE (`vgx_execution`)

mod engine;
mod matching;
mod position;
pub mod types;

pub use engine::{BacktestEngine, BacktestError};
pub use matching::{secondary_rule_violated, simulate_bar};
pub use position::OpenPosition;
pub use types::{BacktestConfig, BacktestReport, BacktestTrade};
