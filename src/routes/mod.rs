//! Query/update API gateway.
//!
//! Merges the per-resource subrouters and binds the shared store as state so
//! `main.rs` does not need to know about individual endpoints.

use std::sync::Arc;

use axum::Router;

use crate::NodeStore;

mod health;
mod node_data;
mod node_history;

/// State shared by every handler.
pub type AppState = Arc<dyn NodeStore>;

// ---

pub fn router(store: AppState) -> Router {
    // ---
    Router::new()
        .merge(node_data::router())
        .merge(node_history::router())
        .merge(health::router())
        .with_state(store)
}
