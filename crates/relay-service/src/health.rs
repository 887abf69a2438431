//! Loopback `/healthz` endpoint (spec §4.10, §6).
//!
//! Bind-and-serve shape mirrors `skynet_gateway::main`'s
//! `TcpListener::bind` + `axum::serve`; this listener never leaves
//! loopback, so it carries none of the gateway's auth/tracing middleware.

use std::time::Instant;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn serve(port: u16, started_at: Instant, cancel: CancellationToken) -> std::io::Result<()> {
    let app = Router::new().route("/healthz", get(move || healthz(started_at)));
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "health endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn healthz(started_at: Instant) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeMs": started_at.elapsed().as_millis() as u64,
    }))
}
