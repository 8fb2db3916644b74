// src/routes/health.rs
//! Health check endpoint.
//!
//! `GET /health` reports whether the service can still read from its store,
//! so orchestrators can tell a live process from one whose database is gone.
//! Follows the same EMBP split as the other routes: handler and response type
//! stay private, the gateway only sees [`router`].

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::error;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Number of nodes with a latest-state row, when the store is reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<usize>,
}

/// Handle `GET /health`.
///
/// 200 with the known node count, or 503 when the store call fails.
async fn health(State(store): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // ---
    match store.list_latest().await {
        Ok(rows) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                nodes: Some(rows.len()),
            }),
        ),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "store unavailable",
                    nodes: None,
                }),
            )
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
