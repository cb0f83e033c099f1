//! Import batch ledger queries
//!
//! Every mutation carries `completed_at IS NULL` so a ledger row that has
//! reached a terminal state can never change again, no matter which code
//! path fires late.

use anyhow::Result;
use sqlx::PgPool;

use crate::types::{BatchStatus, ImportBatch};

const BATCH_COLUMNS: &str = "id, file_name, file_path, status, total_rows, processed_rows, \
     progress::float8 AS progress, error_count, validation_errors, message, \
     started_at, completed_at, created_at";

/// Create a pending ledger row for a freshly stored upload. Returns its id.
pub async fn create_batch(pool: &PgPool, file_name: &str, file_path: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO import_batches (file_name, file_path, status) \
         VALUES ($1, $2, 'pending') RETURNING id",
    )
    .bind(file_name)
    .bind(file_path)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Fetch one ledger row
pub async fn get_batch(pool: &PgPool, batch_id: i64) -> Result<Option<ImportBatch>> {
    let batch = sqlx::query_as::<_, ImportBatch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM import_batches WHERE id = $1"
    ))
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;
    Ok(batch)
}

/// Most recent batches for the dashboard, newest first
pub async fn recent_batches(pool: &PgPool, limit: i64) -> Result<Vec<ImportBatch>> {
    let batches = sqlx::query_as::<_, ImportBatch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM import_batches ORDER BY created_at DESC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(batches)
}

/// Transition the batch into `processing` at the start of an attempt.
///
/// Also resets the counters: a retry restarts from scratch, and stale
/// progress from an aborted earlier attempt must be overwritten, not merged.
pub async fn mark_processing(
    pool: &PgPool,
    batch_id: i64,
    message: &str,
) -> Result<Option<ImportBatch>> {
    let batch = sqlx::query_as::<_, ImportBatch>(&format!(
        "UPDATE import_batches \
         SET status = 'processing', started_at = now(), message = $2, \
             processed_rows = 0, progress = 0, error_count = 0, validation_errors = NULL \
         WHERE id = $1 AND completed_at IS NULL \
         RETURNING {BATCH_COLUMNS}"
    ))
    .bind(batch_id)
    .bind(message)
    .fetch_optional(pool)
    .await?;
    Ok(batch)
}

/// Record the pre-scanned data-row count before any chunk is processed
pub async fn set_total_rows(
    pool: &PgPool,
    batch_id: i64,
    total_rows: i32,
    message: &str,
) -> Result<Option<ImportBatch>> {
    let batch = sqlx::query_as::<_, ImportBatch>(&format!(
        "UPDATE import_batches SET total_rows = $2, message = $3 \
         WHERE id = $1 AND completed_at IS NULL \
         RETURNING {BATCH_COLUMNS}"
    ))
    .bind(batch_id)
    .bind(total_rows)
    .bind(message)
    .fetch_optional(pool)
    .await?;
    Ok(batch)
}

/// One atomic read-modify-write per processed chunk.
///
/// processed_rows is incremented and progress recomputed in the same
/// statement, so updates stay monotonic without a round trip.
pub async fn apply_chunk_progress(
    pool: &PgPool,
    batch_id: i64,
    rows_in_chunk: i32,
    status: BatchStatus,
    message: Option<&str>,
) -> Result<Option<ImportBatch>> {
    let batch = sqlx::query_as::<_, ImportBatch>(&format!(
        "UPDATE import_batches \
         SET processed_rows = processed_rows + $2, \
             progress = COALESCE(LEAST(100, ROUND((processed_rows + $2) * 100.0 / NULLIF(total_rows, 0), 2)), 0), \
             status = $3, \
             message = COALESCE($4, message) \
         WHERE id = $1 AND completed_at IS NULL \
         RETURNING {BATCH_COLUMNS}"
    ))
    .bind(batch_id)
    .bind(rows_in_chunk)
    .bind(status.as_str())
    .bind(message)
    .fetch_optional(pool)
    .await?;
    Ok(batch)
}

/// Terminal update at end of file: reconcile processed_rows to total_rows,
/// persist the failure list, stamp completed_at exactly once.
pub async fn finalize(
    pool: &PgPool,
    batch_id: i64,
    status: BatchStatus,
    message: &str,
    error_count: i32,
    validation_errors: &serde_json::Value,
) -> Result<Option<ImportBatch>> {
    let batch = sqlx::query_as::<_, ImportBatch>(&format!(
        "UPDATE import_batches \
         SET status = $2, message = $3, error_count = $4, validation_errors = $5, \
             processed_rows = total_rows, progress = 100, completed_at = now() \
         WHERE id = $1 AND completed_at IS NULL \
         RETURNING {BATCH_COLUMNS}"
    ))
    .bind(batch_id)
    .bind(status.as_str())
    .bind(message)
    .bind(error_count)
    .bind(validation_errors)
    .fetch_optional(pool)
    .await?;
    Ok(batch)
}

/// Terminal failure written by the job runner's failure handler, used when
/// the engine never got far enough to finalize (structural errors, timeout,
/// retry exhaustion).
pub async fn mark_failed(
    pool: &PgPool,
    batch_id: i64,
    message: &str,
) -> Result<Option<ImportBatch>> {
    let batch = sqlx::query_as::<_, ImportBatch>(&format!(
        "UPDATE import_batches \
         SET status = 'failed', message = $2, completed_at = now() \
         WHERE id = $1 AND completed_at IS NULL \
         RETURNING {BATCH_COLUMNS}"
    ))
    .bind(batch_id)
    .bind(message)
    .fetch_optional(pool)
    .await?;
    Ok(batch)
}
