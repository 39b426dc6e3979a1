//! Three-segment MACD divergence strategy. Fixed rules, fixed confirmation
//! set — see `divergence::evaluate` for the algorithm and `host::StrategyHost`
//! for the rolling-window driver.

mod divergence;
mod host;
mod types;

pub use divergence::evaluate;
pub use host::StrategyHost;
pub use types::{StrategyConfig, StrategyOutput};
