//! Database schema management for `subsecure-ingest`.
//!
//! Ensures the node tables and indexes exist before ingestion starts.
//! Applied once on startup from `main.rs` when running against PostgreSQL.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `node_data` (one row per node, latest observation) and
/// `node_history` (append-only log). Safe to call on every startup.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Latest state, keyed by node id for the ingestion upsert
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS node_data (
            node_id         TEXT        PRIMARY KEY,
            timestamp       TIMESTAMPTZ NOT NULL,
            temperature     INTEGER     NOT NULL DEFAULT 0,
            humidity        INTEGER     NOT NULL DEFAULT 0,
            pm25            INTEGER     NOT NULL DEFAULT 0,
            worker_state    SMALLINT    NOT NULL DEFAULT 0 CHECK (worker_state IN (0, 1)),
            worker_presence SMALLINT    NOT NULL DEFAULT 0 CHECK (worker_presence IN (0, 1))
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // History, never updated by the ingestion path
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS node_history (
            id              BIGSERIAL   PRIMARY KEY,
            timestamp       TIMESTAMPTZ NOT NULL,
            node_id         TEXT        NOT NULL,
            temperature     INTEGER     NOT NULL,
            humidity        INTEGER     NOT NULL,
            pm25            INTEGER     NOT NULL,
            worker_state    SMALLINT    NOT NULL CHECK (worker_state IN (0, 1)),
            worker_presence SMALLINT    NOT NULL CHECK (worker_presence IN (0, 1))
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_node_history_node_id
            ON node_history (node_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_node_history_timestamp
            ON node_history (timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
