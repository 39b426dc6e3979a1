//! Exchange boundary: REST + WS clients for the venue, a token-bucket rate
//! limiter, and a retry policy. No strategy/risk/portfolio logic lives here —
//! this crate only knows how to talk to the exchange and degrade gracefully
//! when it misbehaves.

mod broker_adapter;
mod rate_limit;
mod retry;
mod rest;
mod ws_private;
mod ws_public;

pub use broker_adapter::ExchangeBrokerAdapter;
pub use rate_limit::{Priority, RateLimiter};
pub use retry::{classify_retryable, retry_after_ms, with_retry, RetryPolicy};
pub use rest::{
    ExchangeClient, ExchangeError, Instrument, Kline, OrderAck, PlaceOrderRequest, PositionSnap,
    WalletBalance,
};
pub use ws_private::{PrivateWsClient, PrivateWsEvent};
pub use ws_public::{KlineUpdate, PublicWsClient};
