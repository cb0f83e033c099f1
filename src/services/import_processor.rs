//! Import job runner with JetStream integration
//!
//! Wraps the chunked import pipeline with JetStream for:
//! - Deferred execution off the request path
//! - Persistence across restarts
//! - Real-time progress updates
//!
//! Each queued job runs as an explicit bounded attempt loop: validate the
//! file, count its rows, then drive the chunked engine, all under a
//! per-attempt wall-clock timeout and a single-flight guard on the batch
//! id. The stored upload is removed exactly once, after the attempt
//! sequence concludes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::db::queries;
use crate::services::error::ImportError;
use crate::services::import_engine::ImportEngine;
use crate::services::progress::ProgressPublisher;
use crate::services::single_flight::IMPORT_LOCKS;
use crate::services::{spreadsheet, storage};
use crate::types::QueuedImportJob;

// Stream and consumer names
const STREAM_NAME: &str = "QUAYSIDE_IMPORT_JOBS";
const CONSUMER_NAME: &str = "import_workers";
const SUBJECT: &str = "quayside.jobs.import";

/// Bounded retries per batch; each attempt restarts the pipeline from
/// validation
const MAX_ATTEMPTS: u32 = 3;

/// Wall-clock timeout per attempt
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Import job processor with JetStream integration
pub struct ImportProcessor {
    js: JsContext,
    pool: PgPool,
    publisher: ProgressPublisher,
}

impl ImportProcessor {
    /// Create a new import processor, initializing the JetStream stream
    pub async fn new(client: Client, pool: PgPool) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 1_000,
            max_bytes: 10 * 1024 * 1024,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream import stream '{}' ready", STREAM_NAME);

        Ok(Self {
            js,
            pool,
            publisher: ProgressPublisher::new(client),
        })
    }

    /// Enqueue a deferred import for an already-created ledger row
    pub async fn submit_job(&self, batch_id: i64, file_path: &str) -> Result<()> {
        let job = QueuedImportJob::new(batch_id, file_path.to_string());
        let payload = serde_json::to_vec(&job)?;
        self.js.publish(SUBJECT, payload.into()).await?.await?;

        info!("Import job queued for batch {} ({})", batch_id, file_path);
        Ok(())
    }

    /// Consume import jobs from the queue, one at a time
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            // Retries are an in-process bounded loop, not redeliveries
            max_deliver: 1,
            filter_subject: SUBJECT.to_string(),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(CONSUMER_NAME, consumer_config)
            .await?;
        info!("JetStream import consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    // Sequential on purpose: chunk inserts are heavy and the
                    // ledger update discipline assumes one writer per batch
                    if let Err(e) = self.process_job(&msg).await {
                        error!("Failed to process import job: {}", e);
                    }
                    if let Err(e) = msg.ack().await {
                        error!("Failed to ack import job: {:?}", e);
                    }
                }
                Err(e) => {
                    error!("Error receiving import message: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Process one queued job end to end: single-flight guard, attempt
    /// loop, terminal failure handling, artifact cleanup.
    async fn process_job(&self, msg: &jetstream::Message) -> Result<()> {
        let job: QueuedImportJob = serde_json::from_slice(&msg.payload)?;
        let batch_id = job.batch_id;

        let _guard = match IMPORT_LOCKS.try_acquire(batch_id) {
            Some(guard) => guard,
            None => {
                warn!(
                    "Import for batch {} already in flight, rejecting concurrent attempt",
                    batch_id
                );
                return Ok(());
            }
        };

        info!("Starting import job for batch {} ({})", batch_id, job.file_path);
        let result = self.run_attempts(batch_id, &job.file_path).await;

        // Exactly once per attempt sequence, success or failure
        storage::remove_upload(Path::new(&job.file_path));

        if let Err(e) = result {
            self.handle_failure(batch_id, &e).await;
        }

        Ok(())
    }

    /// Bounded attempt loop. Deterministic faults (structural file errors,
    /// the error ceiling) fail immediately; infrastructure faults and
    /// timeouts are retried with a fresh attempt that restarts counters.
    async fn run_attempts(&self, batch_id: i64, file_path: &str) -> Result<()> {
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                info!("Retrying import for batch {} (attempt {})", batch_id, attempt);
            }

            match tokio::time::timeout(ATTEMPT_TIMEOUT, self.run_attempt(batch_id, file_path))
                .await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    if e.downcast_ref::<ImportError>().is_some() {
                        // Deterministic: the file will not get better
                        return Err(e);
                    }
                    warn!(
                        "Import attempt {} for batch {} failed: {}",
                        attempt, batch_id, e
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        "Import attempt {} for batch {} timed out after {}s",
                        attempt,
                        batch_id,
                        ATTEMPT_TIMEOUT.as_secs()
                    );
                    last_error = Some(anyhow!(
                        "import attempt timed out after {}s",
                        ATTEMPT_TIMEOUT.as_secs()
                    ));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("import failed with no recorded error")))
    }

    /// One attempt: validate, count, load, process. Re-runs from scratch on
    /// retry; it never resumes mid-file.
    async fn run_attempt(&self, batch_id: i64, file_path: &str) -> Result<()> {
        let batch = queries::import_batch::get_batch(&self.pool, batch_id)
            .await?
            .ok_or_else(|| anyhow!("import batch {} not found", batch_id))?;

        if batch.completed_at.is_some() {
            warn!("Batch {} is already finalized, skipping", batch_id);
            return Ok(());
        }

        let path = Path::new(file_path);
        spreadsheet::validate_file(path)?;

        if let Some(updated) = queries::import_batch::mark_processing(
            &self.pool,
            batch_id,
            "Reading file and counting rows...",
        )
        .await?
        {
            self.publisher.publish(&updated).await?;
        }

        let total_rows = spreadsheet::count_data_rows(path)?;
        if total_rows == 0 {
            return Err(ImportError::NoDataRows.into());
        }

        info!("File analysis complete for batch {}: {} rows", batch_id, total_rows);

        if let Some(updated) = queries::import_batch::set_total_rows(
            &self.pool,
            batch_id,
            total_rows,
            &format!("Processing {total_rows} rows..."),
        )
        .await?
        {
            self.publisher.publish(&updated).await?;
        }

        let sheet = spreadsheet::open_sheet(path)?;
        let engine = ImportEngine::new(self.pool.clone(), self.publisher.clone());
        engine.run(batch_id, sheet).await
    }

    /// Dedicated failure handler, distinct from the engine's in-run path:
    /// infrastructure-level failures still reach the user even when the
    /// engine never started. The terminal guard in the ledger queries makes
    /// this a no-op for batches the engine already finalized.
    async fn handle_failure(&self, batch_id: i64, err: &anyhow::Error) {
        let message = failure_message(err);
        error!("Import job failed for batch {}: {}", batch_id, message);

        match queries::import_batch::mark_failed(&self.pool, batch_id, &message).await {
            Ok(Some(batch)) => {
                if let Err(e) = self.publisher.publish(&batch).await {
                    warn!("Failed to publish failure event for batch {}: {}", batch_id, e);
                }
            }
            Ok(None) => {} // already terminal
            Err(e) => {
                error!(
                    "Failed to update batch {} status on job failure: {}",
                    batch_id, e
                );
            }
        }
    }
}

/// User-facing terminal message, worded per failure category
fn failure_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ImportError>() {
        // Structural problems carry their own user-facing wording
        Some(e) if e.is_structural() => e.to_string(),
        Some(ImportError::TooManyErrors) => ImportError::TooManyErrors.to_string(),
        _ => format!("Job failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        assert_eq!(STREAM_NAME, "QUAYSIDE_IMPORT_JOBS");
        assert!(SUBJECT.starts_with("quayside.jobs.import"));
    }

    #[test]
    fn test_retry_policy_constants() {
        assert_eq!(MAX_ATTEMPTS, 3);
        assert_eq!(ATTEMPT_TIMEOUT, Duration::from_secs(3600));
    }

    #[test]
    fn test_failure_message_structural() {
        let err: anyhow::Error = ImportError::UnsupportedFormat("pdf".into()).into();
        assert_eq!(
            failure_message(&err),
            "Unsupported file format: pdf. Allowed formats: xlsx, xls, csv"
        );
    }

    #[test]
    fn test_failure_message_generic_is_prefixed() {
        let err = anyhow!("database connection refused");
        assert_eq!(
            failure_message(&err),
            "Job failed: database connection refused"
        );
    }

    #[test]
    fn test_failure_message_too_many_errors() {
        let err: anyhow::Error = ImportError::TooManyErrors.into();
        assert_eq!(failure_message(&err), "Import failed due to too many errors");
    }
}
