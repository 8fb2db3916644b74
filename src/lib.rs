//! Ingestion pipeline for Subsecure sensor nodes.
//!
//! Nodes publish comma-separated, fixed-width segments over MQTT. This crate
//! decodes each segment, keeps one latest-state row per node, and appends
//! every reading to an immutable history log.
//!
//! Follows the Explicit Module Boundary Pattern (EMBP): the public types are
//! re-exported here, so `main.rs`, the route modules and the integration
//! tests depend on this one surface.
//!
//! - [`decoder`] – one 11-character segment → [`Reading`]
//! - [`splitter`] – payload → per-segment outcomes
//! - [`applier`] – latest-state upsert plus history append per reading
//! - [`subscription`] – broker session and receive loop
//! - [`store`] – PostgreSQL and in-memory backends
//! - [`routes`] – thin query/update API over the same store

pub mod applier;
pub mod config;
pub mod decoder;
pub mod error;
pub mod models;
pub mod routes;
pub mod schema;
pub mod splitter;
pub mod store;
pub mod subscription;

pub use applier::{Applier, IngestReport};
pub use config::{Config, MqttConfig};
pub use decoder::decode;
pub use error::{ConnectionError, DecodeError, PersistError, StoreError};
pub use models::{
    HistoryEntry, LatestNodeState, NewHistoryEntry, NodeUpdate, Reading, WorkerPresence,
    WorkerState,
};
pub use splitter::{split, SegmentOutcome};
pub use store::{MemoryStore, NodeStore, PgStore};
pub use subscription::{SessionEvent, SessionState, SubscriptionManager};
