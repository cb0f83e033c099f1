//! Chunked import engine
//!
//! Pulls rows off the sheet reader in fixed-size chunks: transform every
//! row, accumulate rejects, persist the valid drafts as one grouped insert
//! per chunk, then push one atomic ledger update and a progress event. The
//! engine never lets a row-level problem escape as a fault; only the
//! transformation-error ceiling and infrastructure errors abort the run.

use std::collections::HashSet;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::db::queries;
use crate::services::error::ImportError;
use crate::services::progress::ProgressPublisher;
use crate::services::spreadsheet::SheetReader;
use crate::services::transform::{transform_row, TransformOutcome};
use crate::types::{BatchStatus, NewCargo, RowFailure};

/// Rows per chunk; also the grouped-insert batch size
pub const CHUNK_SIZE: usize = 1000;

/// Hard ceiling on unexpected transformation errors for a whole run
pub const MAX_TRANSFORM_ERRORS: usize = 100;

/// Mid-run status for a chunk update. A single error or validation failure
/// poisons the run: the badge turns red immediately and stays red, even if
/// every later chunk is clean.
fn chunk_status(error_count: usize, failure_count: usize) -> (BatchStatus, Option<String>) {
    if error_count > 0 || failure_count > 0 {
        (
            BatchStatus::Failed,
            Some(format!(
                "Import failing with {error_count} error(s) and {failure_count} validation failure(s)"
            )),
        )
    } else {
        (BatchStatus::Processing, None)
    }
}

/// Terminal status at end of file
fn final_status(error_count: usize, failure_count: usize) -> (BatchStatus, String) {
    if error_count == 0 && failure_count == 0 {
        (
            BatchStatus::Completed,
            "Import completed successfully".to_string(),
        )
    } else {
        (
            BatchStatus::Failed,
            format!(
                "Import failed with {error_count} error(s) and {failure_count} validation failure(s)"
            ),
        )
    }
}

pub struct ImportEngine {
    pool: PgPool,
    publisher: ProgressPublisher,
}

impl ImportEngine {
    pub fn new(pool: PgPool, publisher: ProgressPublisher) -> Self {
        Self { pool, publisher }
    }

    /// Drive one open sheet through the chunk pipeline for `batch_id`.
    pub async fn run(&self, batch_id: i64, mut sheet: SheetReader) -> Result<()> {
        let mut error_count: usize = 0;
        let mut failures: Vec<RowFailure> = Vec::new();
        // Numbers accepted earlier in this same file
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let chunk = sheet.next_chunk(CHUNK_SIZE);
            if chunk.is_empty() {
                break;
            }

            let mut drafts: Vec<(i64, NewCargo)> = Vec::with_capacity(chunk.len());

            // Duplicate pre-check is resolved once per chunk against the
            // database; the unique index remains the final arbiter below.
            let candidates: Vec<String> = chunk
                .iter()
                .filter_map(|r| r.cells.as_ref().ok())
                .filter_map(|cells| {
                    let raw = sheet.raw_row(cells);
                    raw.get("cargo_no").map(|v| v.trim().to_string())
                })
                .filter(|no| !no.is_empty())
                .collect();
            let mut known = queries::cargo::existing_cargo_numbers(&self.pool, &candidates).await?;
            known.extend(seen.iter().cloned());

            for record in &chunk {
                let cells = match &record.cells {
                    Ok(cells) => cells,
                    Err(reason) => {
                        error_count += 1;
                        error!(
                            "Cargo import error at row {} of batch {}: {}",
                            record.number, batch_id, reason
                        );
                        if error_count > MAX_TRANSFORM_ERRORS {
                            self.abort_too_many_errors(batch_id).await?;
                            return Err(ImportError::TooManyErrors.into());
                        }
                        continue;
                    }
                };

                let raw = sheet.raw_row(cells);
                match transform_row(record.number, &raw, &known) {
                    TransformOutcome::Draft(draft) => {
                        known.insert(draft.cargo_no.clone());
                        seen.insert(draft.cargo_no.clone());
                        drafts.push((record.number, draft));
                    }
                    TransformOutcome::Empty => {}
                    TransformOutcome::Rejected(failure) => failures.push(failure),
                }
            }

            // One grouped insert per chunk. A concurrent import racing on
            // the same cargo number shows up as a missing row here and is
            // folded back into the failure list.
            let to_insert: Vec<NewCargo> = drafts.iter().map(|(_, d)| d.clone()).collect();
            let inserted = queries::cargo::insert_chunk(&self.pool, batch_id, &to_insert).await?;
            for (row_number, draft) in &drafts {
                if !inserted.contains(&draft.cargo_no) {
                    warn!(
                        "Insert conflict on cargo {} (batch {}, row {})",
                        draft.cargo_no, batch_id, row_number
                    );
                    failures.push(RowFailure {
                        row: *row_number,
                        attribute: "cargo_no".to_string(),
                        errors: vec!["Cargo number already exists".to_string()],
                        values: serde_json::json!({ "cargo_no": draft.cargo_no }),
                    });
                }
            }

            let (status, message) = chunk_status(error_count, failures.len());
            let updated = queries::import_batch::apply_chunk_progress(
                &self.pool,
                batch_id,
                chunk.len() as i32,
                status,
                message.as_deref(),
            )
            .await?;

            if let Some(batch) = updated {
                info!(
                    "Chunk processed for batch {}: {}/{} rows, status {}",
                    batch_id,
                    batch.processed_rows,
                    batch.total_rows,
                    status.as_str()
                );
                self.publisher.publish(&batch).await?;
            }
        }

        let (status, message) = final_status(error_count, failures.len());
        let finalized = queries::import_batch::finalize(
            &self.pool,
            batch_id,
            status,
            &message,
            error_count as i32,
            &serde_json::to_value(&failures)?,
        )
        .await?;

        if let Some(batch) = finalized {
            info!(
                "Import finished for batch {}: {} ({} errors, {} validation failures)",
                batch_id,
                status.as_str(),
                error_count,
                failures.len()
            );
            self.publisher.publish(&batch).await?;
        }

        Ok(())
    }

    /// Ceiling breach: stamp the terminal failure before propagating, so
    /// the user sees it even though the run aborts mid-file.
    async fn abort_too_many_errors(&self, batch_id: i64) -> Result<()> {
        if let Some(batch) = queries::import_batch::mark_failed(
            &self.pool,
            batch_id,
            "Too many errors encountered",
        )
        .await?
        {
            self.publisher.publish(&batch).await?;
        }
        Ok(())
    }
}
