//! Data models for the node ingestion pipeline.
//!
//! [`Reading`] is what the segment decoder produces. [`LatestNodeState`] and
//! [`HistoryEntry`] are the two persisted views, and [`NodeUpdate`] /
//! [`NewHistoryEntry`] are the write shapes accepted from the query API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Worker safety flag reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum WorkerState {
    Normal = 0,
    Alert = 1,
}

/// Whether a worker is present at the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum WorkerPresence {
    Absent = 0,
    Present = 1,
}

impl From<WorkerState> for u8 {
    fn from(v: WorkerState) -> u8 {
        v as u8
    }
}

impl TryFrom<u8> for WorkerState {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(WorkerState::Normal),
            1 => Ok(WorkerState::Alert),
            _ => Err(format!("worker_state must be 0 or 1, got {v}")),
        }
    }
}

impl From<WorkerPresence> for u8 {
    fn from(v: WorkerPresence) -> u8 {
        v as u8
    }
}

impl TryFrom<u8> for WorkerPresence {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(WorkerPresence::Absent),
            1 => Ok(WorkerPresence::Present),
            _ => Err(format!("worker_presence must be 0 or 1, got {v}")),
        }
    }
}

/// One node's decoded segment. Carries no timestamp; the caller assigns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    // ---
    pub node_id: String,
    pub temperature: u8,
    pub humidity: u8,
    pub pm25: u8,
    pub worker_state: WorkerState,
    pub worker_presence: WorkerPresence,
}

/// Most recent observation for a node. One row per `node_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestNodeState {
    // ---
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub temperature: i32,
    pub humidity: i32,
    pub pm25: i32,
    pub worker_state: WorkerState,
    pub worker_presence: WorkerPresence,
}

/// Immutable history row. `id` is assigned by the store on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    // ---
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub temperature: i32,
    pub humidity: i32,
    pub pm25: i32,
    pub worker_state: WorkerState,
    pub worker_presence: WorkerPresence,
}

/// History row before the store has assigned its sequence id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewHistoryEntry {
    // ---
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub temperature: i32,
    pub humidity: i32,
    pub pm25: i32,
    pub worker_state: WorkerState,
    pub worker_presence: WorkerPresence,
}

/// Field changes applied to an existing [`LatestNodeState`] by an external
/// writer. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeUpdate {
    // ---
    pub timestamp: Option<DateTime<Utc>>,
    pub temperature: Option<i32>,
    pub humidity: Option<i32>,
    pub pm25: Option<i32>,
    pub worker_state: Option<WorkerState>,
    pub worker_presence: Option<WorkerPresence>,
}

impl Reading {
    // ---
    /// Latest-state row for this reading observed at `observed_at`.
    pub fn to_latest(&self, observed_at: DateTime<Utc>) -> LatestNodeState {
        // ---
        LatestNodeState {
            timestamp: observed_at,
            node_id: self.node_id.clone(),
            temperature: self.temperature.into(),
            humidity: self.humidity.into(),
            pm25: self.pm25.into(),
            worker_state: self.worker_state,
            worker_presence: self.worker_presence,
        }
    }

    /// History row for this reading observed at `observed_at`.
    pub fn to_history(&self, observed_at: DateTime<Utc>) -> NewHistoryEntry {
        // ---
        NewHistoryEntry {
            timestamp: observed_at,
            node_id: self.node_id.clone(),
            temperature: self.temperature.into(),
            humidity: self.humidity.into(),
            pm25: self.pm25.into(),
            worker_state: self.worker_state,
            worker_presence: self.worker_presence,
        }
    }
}

impl LatestNodeState {
    // ---
    /// Apply an external update in place.
    pub fn apply_update(&mut self, update: &NodeUpdate) {
        // ---
        if let Some(ts) = update.timestamp {
            self.timestamp = ts;
        }
        if let Some(v) = update.temperature {
            self.temperature = v;
        }
        if let Some(v) = update.humidity {
            self.humidity = v;
        }
        if let Some(v) = update.pm25 {
            self.pm25 = v;
        }
        if let Some(v) = update.worker_state {
            self.worker_state = v;
        }
        if let Some(v) = update.worker_presence {
            self.worker_presence = v;
        }
    }
}
