// http.rs — Webhook endpoint for external CI notifications.
//
// POST /build-events takes one BuildEvent as JSON and queues it for the
// correlator. The response only acknowledges receipt (202); correlation
// happens later on the correlator task. GET /health is for liveness checks.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bt_goal::BuildEvent;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct HttpState {
    notifications: mpsc::UnboundedSender<BuildEvent>,
}

impl HttpState {
    pub fn new(notifications: mpsc::UnboundedSender<BuildEvent>) -> Self {
        Self { notifications }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/build-events", post(receive_build_event))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn receive_build_event(
    State(state): State<HttpState>,
    Json(event): Json<BuildEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    tracing::info!(
        commit = %event.commit,
        status = %event.status,
        provider = %event.provider,
        "build notification received"
    );
    match state.notifications.send(event) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "accepted": true })),
        ),
        Err(_) => {
            tracing::error!("correlator is not running, rejecting notification");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "accepted": false, "error": "correlator unavailable" })),
            )
        }
    }
}

/// Serve until Ctrl-C.
pub async fn serve(listen: SocketAddr, state: HttpState) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    tracing::info!("listening for build notifications on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;
    Ok(())
}
