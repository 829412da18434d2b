//! Liveness endpoint.
//!
//! A single `GET /health` route so the hosting platform can see the
//! service is up while the real work happens over the chat transport and
//! background tasks.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::sync::watch;
use tracing::info;

async fn health() -> &'static str {
    "ok"
}

/// Serve `/health` until shutdown is signalled.
pub async fn run_health_server(port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = Router::new().route("/health", get(health));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind health port {port}"))?;
    info!(port, "Health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("Health server failed")?;

    Ok(())
}
