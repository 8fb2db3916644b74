//! Error taxonomy for the ingestion pipeline.
//!
//! Decode and persist errors are per segment / per reading and never abort a
//! batch. [`ConnectionError`] is the only one that ends a run.

use std::fmt;

use thiserror::Error;

// ---

/// Why a segment could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid segment length: expected 11 characters, got {0}")]
    InvalidLength(usize),

    #[error("malformed field '{field}': {reason}")]
    MalformedField { field: &'static str, reason: String },
}

/// Store-level failure of a single call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: i64 },
}

/// Failure to persist one reading. Either step may have failed independently.
#[derive(Debug)]
pub struct PersistError {
    pub node_id: String,
    pub latest: Option<StoreError>,
    pub history: Option<StoreError>,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "failed to persist reading for node {}", self.node_id)?;
        if let Some(e) = &self.latest {
            write!(f, "; latest state: {e}")?;
        }
        if let Some(e) = &self.history {
            write!(f, "; history: {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PersistError {}

/// Broker session could not be established or was refused.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to broker {broker}: {source}")]
    Connect {
        broker: String,
        #[source]
        source: rumqttc::ConnectionError,
    },

    #[error("broker {broker} refused connection: {code:?}")]
    Refused {
        broker: String,
        code: rumqttc::ConnectReturnCode,
    },

    #[error("failed to issue request to broker: {0}")]
    Client(#[from] rumqttc::ClientError),
}
