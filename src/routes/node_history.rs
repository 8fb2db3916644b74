//! History endpoints.
//!
//! - `GET  /api/nodeHistory/`  every entry in sequence order
//! - `POST /api/nodeHistory/`  create an entry; `timestamp` defaults to now

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::{error, info};

use super::AppState;
use crate::NewHistoryEntry;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/nodeHistory/", get(list).post(create))
}

async fn list(State(store): State<AppState>) -> Response {
    // ---
    match store.list_history().await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => {
            error!("Failed to list node history: {}", e);
            store_error()
        }
    }
}

async fn create(State(store): State<AppState>, Json(entry): Json<NewHistoryEntry>) -> Response {
    // ---
    match store.append_history(&entry).await {
        Ok(row) => {
            info!(node_id = %row.node_id, id = row.id, "Created history entry");
            (StatusCode::CREATED, Json(row)).into_response()
        }
        Err(e) => {
            error!(node_id = %entry.node_id, "Failed to create history entry: {}", e);
            store_error()
        }
    }
}

fn store_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": "store error" })),
    )
        .into_response()
}
