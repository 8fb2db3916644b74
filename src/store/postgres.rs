//! PostgreSQL store.
//!
//! Tables are created by [`crate::schema::create_schema`]. Each call is its
//! own statement; there is no transaction spanning the latest-state upsert and
//! the history append.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::NodeStore;
use crate::error::StoreError;
use crate::models::{
    HistoryEntry, LatestNodeState, NewHistoryEntry, NodeUpdate, WorkerPresence, WorkerState,
};

const LATEST_COLUMNS: &str =
    "timestamp, node_id, temperature, humidity, pm25, worker_state, worker_presence";

const HISTORY_COLUMNS: &str =
    "id, timestamp, node_id, temperature, humidity, pm25, worker_state, worker_presence";

// ---

/// [`NodeStore`] over a shared `sqlx` connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LatestRow {
    timestamp: DateTime<Utc>,
    node_id: String,
    temperature: i32,
    humidity: i32,
    pm25: i32,
    worker_state: i16,
    worker_presence: i16,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    timestamp: DateTime<Utc>,
    node_id: String,
    temperature: i32,
    humidity: i32,
    pm25: i32,
    worker_state: i16,
    worker_presence: i16,
}

fn worker_state(v: i16) -> Result<WorkerState, StoreError> {
    u8::try_from(v)
        .ok()
        .and_then(|v| WorkerState::try_from(v).ok())
        .ok_or(StoreError::InvalidValue {
            field: "worker_state",
            value: v.into(),
        })
}

fn worker_presence(v: i16) -> Result<WorkerPresence, StoreError> {
    u8::try_from(v)
        .ok()
        .and_then(|v| WorkerPresence::try_from(v).ok())
        .ok_or(StoreError::InvalidValue {
            field: "worker_presence",
            value: v.into(),
        })
}

impl TryFrom<LatestRow> for LatestNodeState {
    type Error = StoreError;

    fn try_from(row: LatestRow) -> Result<Self, Self::Error> {
        Ok(LatestNodeState {
            timestamp: row.timestamp,
            node_id: row.node_id,
            temperature: row.temperature,
            humidity: row.humidity,
            pm25: row.pm25,
            worker_state: worker_state(row.worker_state)?,
            worker_presence: worker_presence(row.worker_presence)?,
        })
    }
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistoryEntry {
            id: row.id,
            timestamp: row.timestamp,
            node_id: row.node_id,
            temperature: row.temperature,
            humidity: row.humidity,
            pm25: row.pm25,
            worker_state: worker_state(row.worker_state)?,
            worker_presence: worker_presence(row.worker_presence)?,
        })
    }
}

fn flag<T: Into<u8>>(v: T) -> i16 {
    i16::from(v.into())
}

#[async_trait]
impl NodeStore for PgStore {
    async fn upsert_latest(&self, state: &LatestNodeState) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO node_data (
                node_id, timestamp, temperature, humidity, pm25,
                worker_state, worker_presence
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (node_id) DO UPDATE SET
                timestamp       = EXCLUDED.timestamp,
                temperature     = EXCLUDED.temperature,
                humidity        = EXCLUDED.humidity,
                pm25            = EXCLUDED.pm25,
                worker_state    = EXCLUDED.worker_state,
                worker_presence = EXCLUDED.worker_presence
            "#,
        )
        .bind(&state.node_id)
        .bind(state.timestamp)
        .bind(state.temperature)
        .bind(state.humidity)
        .bind(state.pm25)
        .bind(flag(state.worker_state))
        .bind(flag(state.worker_presence))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        // ---
        let row: HistoryRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO node_history (
                timestamp, node_id, temperature, humidity, pm25,
                worker_state, worker_presence
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {HISTORY_COLUMNS}
            "#
        ))
        .bind(entry.timestamp)
        .bind(&entry.node_id)
        .bind(entry.temperature)
        .bind(entry.humidity)
        .bind(entry.pm25)
        .bind(flag(entry.worker_state))
        .bind(flag(entry.worker_presence))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn list_latest(&self) -> Result<Vec<LatestNodeState>, StoreError> {
        // ---
        let rows: Vec<LatestRow> = sqlx::query_as(&format!(
            "SELECT {LATEST_COLUMNS} FROM node_data ORDER BY timestamp DESC, node_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_latest(&self, node_id: &str) -> Result<Option<LatestNodeState>, StoreError> {
        // ---
        let row: Option<LatestRow> = sqlx::query_as(&format!(
            "SELECT {LATEST_COLUMNS} FROM node_data WHERE node_id = $1"
        ))
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_latest(
        &self,
        node_id: &str,
        update: &NodeUpdate,
    ) -> Result<Option<LatestNodeState>, StoreError> {
        // ---
        let row: Option<LatestRow> = sqlx::query_as(&format!(
            r#"
            UPDATE node_data SET
                timestamp       = COALESCE($2, timestamp),
                temperature     = COALESCE($3, temperature),
                humidity        = COALESCE($4, humidity),
                pm25            = COALESCE($5, pm25),
                worker_state    = COALESCE($6, worker_state),
                worker_presence = COALESCE($7, worker_presence)
            WHERE node_id = $1
            RETURNING {LATEST_COLUMNS}
            "#
        ))
        .bind(node_id)
        .bind(update.timestamp)
        .bind(update.temperature)
        .bind(update.humidity)
        .bind(update.pm25)
        .bind(update.worker_state.map(flag))
        .bind(update.worker_presence.map(flag))
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        // ---
        let rows: Vec<HistoryRow> = sqlx::query_as(&format!(
            "SELECT {HISTORY_COLUMNS} FROM node_history ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
