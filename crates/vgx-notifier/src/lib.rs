//! vgx-notifier
//!
//! Turns `execution_report` / `risk_event` stream messages into delivered
//! notifications: dedups by `event_id`, gates outbound sends on severity,
//! and tracks PENDING/SENT/FAILED status with exponential-backoff retry.
//!
//! Persistence (the notifications table) and the stream consumer / retry
//! loops live outside this crate. `NotifierHost::dispatch` and `::retry`
//! take the caller's DB lookup as an explicit argument and return the
//! record's next state for the caller to persist — the same shape
//! `vgx_risk::evaluate` takes explicit state rather than owning storage,
//! so this crate stays pure enough to unit test without a database.

mod engine;
mod host;
mod sink;
mod templates;
mod types;

pub use engine::{
    apply_send_result, backoff_seconds, decide_dispatch, is_due_for_retry, should_page,
    DispatchAction,
};
pub use host::{candidate_from_envelope, NotifierHost};
pub use sink::{MessageSink, NullSink, TelegramError, TelegramSink};
pub use templates::render_event_text;
pub use types::NotifierConfig;
