//! Push side of the progress reporting facade
//!
//! Every meaningful ledger write is followed by a notification on a subject
//! scoped to the batch id, so only a client that knows its batch id can
//! observe the run.

use anyhow::Result;
use async_nats::Client;
use tracing::debug;

use crate::types::{ImportBatch, ImportProgressEvent};

const PROGRESS_SUBJECT_PREFIX: &str = "quayside.import.progress";

/// Publishes per-batch progress events over core NATS
#[derive(Clone)]
pub struct ProgressPublisher {
    client: Client,
}

impl ProgressPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Subject for one batch's private progress channel
    pub fn subject_for(batch_id: i64) -> String {
        format!("{PROGRESS_SUBJECT_PREFIX}.{batch_id}")
    }

    /// Publish the current ledger snapshot as a progress event
    pub async fn publish(&self, batch: &ImportBatch) -> Result<()> {
        let event = ImportProgressEvent {
            batch_id: batch.id,
            status: batch.status(),
            processed_rows: batch.processed_rows,
            total_rows: batch.total_rows,
            percentage: batch.percentage(),
        };

        let payload = serde_json::to_vec(&event)?;
        self.client
            .publish(Self::subject_for(batch.id), payload.into())
            .await?;

        debug!(
            "Published progress for batch {}: {} {}/{}",
            batch.id,
            event.status.as_str(),
            event.processed_rows,
            event.total_rows
        );
        Ok(())
    }
}
