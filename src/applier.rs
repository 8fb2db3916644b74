//! Applies decoded readings to the store.
//!
//! Every reading is two independent store calls: an upsert of the node's
//! latest state and an append to history. Neither step blocks the other, and
//! a failing reading never blocks the rest of its message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::error::PersistError;
use crate::models::Reading;
use crate::splitter::split;
use crate::store::NodeStore;

/// Per-message tally produced by [`Applier::ingest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Readings whose latest-state upsert and history append both succeeded.
    pub stored: usize,
    /// Segments that failed to decode.
    pub skipped: usize,
    /// Readings where at least one store call failed.
    pub failed: usize,
}

// ---

#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn NodeStore>,
}

impl Applier {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Persist one reading observed at `observed_at`.
    pub async fn apply(
        &self,
        reading: &Reading,
        observed_at: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        // ---
        let latest = self
            .store
            .upsert_latest(&reading.to_latest(observed_at))
            .await
            .err();

        let history = match self.store.append_history(&reading.to_history(observed_at)).await {
            Ok(entry) => {
                debug!(node_id = %reading.node_id, history_id = entry.id, "Appended history entry");
                None
            }
            Err(e) => Some(e),
        };

        if latest.is_none() && history.is_none() {
            return Ok(());
        }

        Err(PersistError {
            node_id: reading.node_id.clone(),
            latest,
            history,
        })
    }

    /// Decode and persist every segment of `payload`, all stamped `observed_at`.
    ///
    /// Decode and persist failures are logged here and counted in the report;
    /// nothing is returned to the caller as an error.
    pub async fn ingest(&self, payload: &str, observed_at: DateTime<Utc>) -> IngestReport {
        // ---
        let mut report = IngestReport::default();

        for seg in split(payload) {
            let reading = match seg.outcome {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(segment = %seg.segment, error = %e, "Skipping invalid segment");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.apply(&reading, observed_at).await {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    error!(node_id = %reading.node_id, error = %e, "Failed to persist reading");
                    report.failed += 1;
                }
            }
        }

        report
    }
}
