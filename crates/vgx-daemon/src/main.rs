//! vgx-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, builds the shared
//! state, wires middleware, and starts the HTTP server.  All route handlers
//! live in `routes.rs`; all shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use uuid::Uuid;
use vgx_daemon::{routes, services, state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    // AppState boots fail-closed (integrity disarmed). An explicit
    // POST /v1/integrity/arm from the operator is required before any run
    // can start.
    let shared = Arc::new(state::AppState::new());

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    spawn_trading_services().await;

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("vgx-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

/// Boots the four trading task sets (marketdata/strategy/execution/notifier)
/// as background tokio tasks. Failure to reach Postgres/Redis at startup is
/// logged and the HTTP control plane still comes up — the operator can see
/// the failure in logs/health rather than the process refusing to bind.
async fn spawn_trading_services() {
    let cfg = match vgx_config::Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            warn!(error = %e, "trading services disabled: config load failed");
            return;
        }
    };
    let pool = match vgx_db::connect_from_env().await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "trading services disabled: db connect failed");
            return;
        }
    };
    let broker = match vgx_broker::Broker::new(&cfg.redis_url) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "trading services disabled: broker connect failed");
            return;
        }
    };

    let run_id = Uuid::new_v4();
    let engine_id = "vgx-daemon".to_string();
    info!(%run_id, "starting trading services");
    services::spawn_all(cfg, broker, pool, run_id, engine_id);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("VGX_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:1420",
        "http://127.0.0.1:1420",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
