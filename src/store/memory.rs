//! In-process store with the same semantics as the PostgreSQL backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::NodeStore;
use crate::error::StoreError;
use crate::models::{HistoryEntry, LatestNodeState, NewHistoryEntry, NodeUpdate};

#[derive(Debug, Default)]
struct Inner {
    latest: HashMap<String, LatestNodeState>,
    history: Vec<HistoryEntry>,
    next_id: i64,
}

/// Store backed by a mutex-guarded map and vector. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn upsert_latest(&self, state: &LatestNodeState) -> Result<(), StoreError> {
        // ---
        self.lock()
            .latest
            .insert(state.node_id.clone(), state.clone());
        Ok(())
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        // ---
        let mut inner = self.lock();
        inner.next_id += 1;
        let row = HistoryEntry {
            id: inner.next_id,
            timestamp: entry.timestamp,
            node_id: entry.node_id.clone(),
            temperature: entry.temperature,
            humidity: entry.humidity,
            pm25: entry.pm25,
            worker_state: entry.worker_state,
            worker_presence: entry.worker_presence,
        };
        inner.history.push(row.clone());
        Ok(row)
    }

    async fn list_latest(&self) -> Result<Vec<LatestNodeState>, StoreError> {
        // ---
        let mut rows: Vec<_> = self.lock().latest.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        Ok(rows)
    }

    async fn get_latest(&self, node_id: &str) -> Result<Option<LatestNodeState>, StoreError> {
        Ok(self.lock().latest.get(node_id).cloned())
    }

    async fn update_latest(
        &self,
        node_id: &str,
        update: &NodeUpdate,
    ) -> Result<Option<LatestNodeState>, StoreError> {
        // ---
        let mut inner = self.lock();
        Ok(inner.latest.get_mut(node_id).map(|row| {
            row.apply_update(update);
            row.clone()
        }))
    }

    async fn list_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.lock().history.clone())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{WorkerPresence, WorkerState};
    use chrono::{TimeZone, Utc};

    fn state(node_id: &str, hour: u32, temperature: i32) -> LatestNodeState {
        // ---
        LatestNodeState {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap(),
            node_id: node_id.to_string(),
            temperature,
            humidity: 40,
            pm25: 10,
            worker_state: WorkerState::Normal,
            worker_presence: WorkerPresence::Present,
        }
    }

    #[tokio::test]
    async fn test_upsert_always_overwrites() {
        // ---
        let store = MemoryStore::new();
        store.upsert_latest(&state("N01", 12, 30)).await.unwrap();
        store.upsert_latest(&state("N01", 11, 99)).await.unwrap();

        let row = store.get_latest("N01").await.unwrap().unwrap();
        assert_eq!(row.temperature, 99);
        assert_eq!(row.timestamp, state("N01", 11, 99).timestamp);
        assert_eq!(store.list_latest().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_latest_newest_first() {
        // ---
        let store = MemoryStore::new();
        store.upsert_latest(&state("OLD", 8, 1)).await.unwrap();
        store.upsert_latest(&state("NEW", 9, 2)).await.unwrap();

        let ids: Vec<_> = store
            .list_latest()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.node_id)
            .collect();
        assert_eq!(ids, ["NEW", "OLD"]);
    }

    #[tokio::test]
    async fn test_update_missing_node_is_none() {
        // ---
        let store = MemoryStore::new();
        let res = store
            .update_latest("ZZZ", &NodeUpdate::default())
            .await
            .unwrap();
        assert!(res.is_none());
    }

    #[tokio::test]
    async fn test_history_ids_are_monotonic() {
        // ---
        let store = MemoryStore::new();
        let entry = state("N01", 1, 1);
        let first = store
            .append_history(&NewHistoryEntry {
                timestamp: entry.timestamp,
                node_id: entry.node_id.clone(),
                temperature: 1,
                humidity: 2,
                pm25: 3,
                worker_state: WorkerState::Normal,
                worker_presence: WorkerPresence::Absent,
            })
            .await
            .unwrap();
        let second = store
            .append_history(&NewHistoryEntry {
                timestamp: entry.timestamp,
                node_id: entry.node_id,
                temperature: 1,
                humidity: 2,
                pm25: 3,
                worker_state: WorkerState::Normal,
                worker_presence: WorkerPresence::Absent,
            })
            .await
            .unwrap();

        assert!(second.id > first.id);
        assert_eq!(store.list_history().await.unwrap().len(), 2);
    }
}
