//! WebSocket bridge between a browser-based editor and a locally spawned
//! language server.
//!
//! `GET /lsp` upgrades to a WebSocket; each connection owns exactly one child
//! process. WebSocket payloads carry one unframed JSON-RPC object per
//! message; the `Content-Length` framing exists only on the child's stdio
//! side.

pub mod config;

pub(crate) mod bridge;
pub(crate) mod command;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

pub use config::BridgeConfig;

#[must_use]
pub fn router(config: BridgeConfig) -> Router {
    Router::new()
        .route("/lsp", get(bridge::lsp_websocket))
        .route("/health", get(health))
        .with_state(Arc::new(config))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

pub async fn serve(config: BridgeConfig) -> Result<()> {
    let addr = config.bind;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("sketchbridge listening on http://{addr}");
    axum::serve(listener, router(config)).await?;
    Ok(())
}
