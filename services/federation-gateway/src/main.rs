//! Federation gateway: the HTTP transport over the round coordinator.
//!
//! Clients fetch the global model from `GET /model`, train locally, and
//! submit weight updates to `POST /submit`. `GET /round` exposes the round
//! snapshot and counters operators watch for stuck rounds.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use federation_core::{load_config, load_seed_model, Coordinator, LogLedger, MemoryArtifactStore};

mod routes;
mod wire;

#[tokio::main]
async fn main() -> Result<()> {
    federation_core::init_tracing("federation-gateway")?;
    federation_core::init_metrics()?;
    let cfg = load_config()?;
    info!(quorum = cfg.quorum_threshold, seed = ?cfg.seed_model_path, "gateway_starting");

    let seed = load_seed_model(cfg.seed_model_path.as_deref())?;
    let coordinator = Arc::new(Coordinator::new(
        seed,
        cfg.quorum_threshold,
        Arc::new(LogLedger),
        Arc::new(MemoryArtifactStore::new()),
    ));

    let port: u16 = std::env::var("FED_GATEWAY_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "gateway_listening");
    federation_core::mark_ready();

    axum::serve(listener, routes::router(coordinator))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    federation_core::clear_ready();
    info!("gateway_stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl_c wait failed");
    }
    info!("shutdown_signal_received");
}
