//! Fill-driven FIFO portfolio accounting.
//!
//! - Fill-driven ledger is the source of truth.
//! - FIFO lot accounting, realized vs unrealized PnL.
//! - Equity + exposure metrics.
//! - Pure deterministic logic (no IO, no time, no broker wiring).
//!
//! Entry/exit prices stay `f64` end-to-end (they originate as exchange
//! decimal quotes); only the accounting aggregates below — realized PnL,
//! equity, exposure — are fixed-point (`fixedpoint::Micros`), so they
//! round-trip exactly across restarts.

mod accounting;
pub mod fixedpoint;
mod metrics;
mod ordering;
mod types;

pub mod ledger;

pub use accounting::{apply_entry, apply_fill, recompute_from_ledger};
pub use ledger::{Ledger, LedgerError, LedgerSnapshot};

pub use metrics::{
    compute_equity_micros, compute_exposure_micros, compute_unrealized_pnl_micros,
    enforce_max_gross_exposure, EquityMetrics, ExposureBreach, ExposureMetrics,
};

pub use ordering::{apply_fills_canonical, sort_fills_canonical, TaggedFill};

pub use types::{CashEntry, Fill, LedgerEntry, Lot, PortfolioState, PositionState, Side};

use std::collections::BTreeMap;

/// Price/cash scale: micros (1e-6).
pub const MICROS_SCALE: i64 = 1_000_000;

/// Canonical mark map type (symbol -> price_micros).
pub type MarkMap = BTreeMap<String, i64>;

/// Helper to build a MarkMap with minimal boilerplate.
pub fn marks<I, S>(items: I) -> MarkMap
where
    I: IntoIterator<Item = (S, i64)>,
    S: Into<String>,
{
    let mut m = MarkMap::new();
    for (sym, px) in items {
        m.insert(sym.into(), px);
    }
    m
}
