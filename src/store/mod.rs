//! Persistence store abstraction.
//!
//! The ingestion core depends on two operations only, [`NodeStore::upsert_latest`]
//! and [`NodeStore::append_history`]. The remaining methods back the query API.
//!
//! # Implementations
//!
//! - [`PgStore`] -- PostgreSQL via `sqlx`
//! - [`MemoryStore`] -- in-process, used by tests and `DATABASE_URL=memory:`

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{HistoryEntry, LatestNodeState, NewHistoryEntry, NodeUpdate};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Create or replace the latest-state row for `state.node_id`. Every
    /// field is overwritten unconditionally.
    async fn upsert_latest(&self, state: &LatestNodeState) -> Result<(), StoreError>;

    /// Append a history row and return it with its assigned sequence id.
    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry, StoreError>;

    /// All latest-state rows, newest timestamp first.
    async fn list_latest(&self) -> Result<Vec<LatestNodeState>, StoreError>;

    async fn get_latest(&self, node_id: &str) -> Result<Option<LatestNodeState>, StoreError>;

    /// Apply an external update to an existing row. `Ok(None)` when the node
    /// has no row.
    async fn update_latest(
        &self,
        node_id: &str,
        update: &NodeUpdate,
    ) -> Result<Option<LatestNodeState>, StoreError>;

    /// All history rows in sequence order.
    async fn list_history(&self) -> Result<Vec<HistoryEntry>, StoreError>;
}
