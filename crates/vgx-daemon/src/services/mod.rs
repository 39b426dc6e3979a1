//! The four background task sets that make up the trading engine proper —
//! marketdata, strategy, execution, notifier — each an independent consumer
//! loop (plus, for execution, its own sub-loops) talking to the rest of the
//! process only through `vgx-broker` streams and the shared `vgx-db` pool.
//! The HTTP control plane (`routes.rs`/`state.rs`) is a separate concern and
//! is wired up independently in `main.rs`.

pub mod execution;
pub mod marketdata;
pub mod notifier;
pub mod strategy;

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;
use vgx_broker::Broker;
use vgx_config::Config;

/// Spawns all four task sets. Each `spawn` takes ownership of its own clone
/// of `cfg`/`broker`/`pool`/`engine_id`; `run_id` is `Copy`.
pub fn spawn_all(cfg: Arc<Config>, broker: Broker, pool: PgPool, run_id: Uuid, engine_id: String) {
    marketdata::spawn(Arc::clone(&cfg), broker.clone(), pool.clone(), run_id, engine_id.clone());
    strategy::spawn(Arc::clone(&cfg), broker.clone(), pool.clone(), run_id, engine_id.clone());
    execution::spawn(Arc::clone(&cfg), broker.clone(), pool.clone(), run_id, engine_id.clone());
    notifier::spawn(cfg, broker, pool, run_id, engine_id);
}
