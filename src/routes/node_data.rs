//! Latest-state endpoints.
//!
//! - `GET   /api/nodeData/`            all nodes, newest first
//! - `PUT   /api/nodeData/{node_id}/`  full update of an existing node
//! - `PATCH /api/nodeData/{node_id}/`  partial update of an existing node
//!
//! Updates here are an independent writer next to ingestion; the next reading
//! for the node simply overwrites them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::AppState;
use crate::{NodeUpdate, WorkerPresence, WorkerState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/nodeData/", get(list))
        .route("/api/nodeData/{node_id}/", put(update_full).patch(update_partial))
}

/// Body of a full update; every field is required.
#[derive(Debug, Deserialize)]
struct FullUpdate {
    timestamp: DateTime<Utc>,
    temperature: i32,
    humidity: i32,
    pm25: i32,
    worker_state: WorkerState,
    worker_presence: WorkerPresence,
}

impl From<FullUpdate> for NodeUpdate {
    fn from(u: FullUpdate) -> Self {
        NodeUpdate {
            timestamp: Some(u.timestamp),
            temperature: Some(u.temperature),
            humidity: Some(u.humidity),
            pm25: Some(u.pm25),
            worker_state: Some(u.worker_state),
            worker_presence: Some(u.worker_presence),
        }
    }
}

async fn list(State(store): State<AppState>) -> Response {
    // ---
    match store.list_latest().await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => {
            error!("Failed to list node data: {}", e);
            internal_error()
        }
    }
}

async fn update_full(
    Path(node_id): Path<String>,
    State(store): State<AppState>,
    Json(body): Json<FullUpdate>,
) -> Response {
    update(store, node_id, body.into()).await
}

async fn update_partial(
    Path(node_id): Path<String>,
    State(store): State<AppState>,
    Json(body): Json<NodeUpdate>,
) -> Response {
    update(store, node_id, body).await
}

async fn update(store: AppState, node_id: String, changes: NodeUpdate) -> Response {
    // ---
    match store.update_latest(&node_id, &changes).await {
        Ok(Some(row)) => {
            info!(%node_id, "Updated node data");
            (StatusCode::OK, Json(row)).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("node {node_id} not found") })),
        )
            .into_response(),
        Err(e) => {
            error!(%node_id, "Failed to update node data: {}", e);
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": "store error" })),
    )
        .into_response()
}
