//! Import batch ledger types
//!
//! The ledger is the single durable record of one upload's import lifecycle.
//! It is mutated only by the job runner and the chunked engine, never by
//! request handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an import batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BatchStatus::Pending),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses are never overwritten once completed_at is stamped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// One ledger row, as stored in `import_batches`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub status: String,
    pub total_rows: i32,
    pub processed_rows: i32,
    pub progress: f64,
    pub error_count: i32,
    pub validation_errors: Option<serde_json::Value>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ImportBatch {
    pub fn status(&self) -> BatchStatus {
        BatchStatus::parse(&self.status).unwrap_or(BatchStatus::Pending)
    }

    /// Percentage reported to clients: 100 once completed, 0 while the total
    /// is still unknown and the batch is not terminal, otherwise the stored
    /// progress value.
    pub fn percentage(&self) -> f64 {
        match self.status() {
            BatchStatus::Completed => 100.0,
            status if self.total_rows == 0 && !status.is_terminal() => 0.0,
            _ => self.progress,
        }
    }
}

/// A single rejected row, kept in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    /// 1-based spreadsheet row number (header is row 1)
    pub row: i64,
    /// The field that failed validation
    pub attribute: String,
    pub errors: Vec<String>,
    /// Raw cell values of the offending row, keyed by normalized header
    pub values: serde_json::Value,
}

/// Request to submit a spreadsheet for import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSubmitRequest {
    pub file_name: String,
    /// File content, base64-encoded
    pub content: String,
}

/// Response once the import has been queued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSubmitResponse {
    pub batch_id: i64,
    pub file_name: String,
    pub message: String,
}

/// A queued import job as carried through JetStream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedImportJob {
    /// Queue message id, distinct from the ledger id
    pub id: Uuid,
    pub batch_id: i64,
    pub file_path: String,
    pub submitted_at: DateTime<Utc>,
}

impl QueuedImportJob {
    pub fn new(batch_id: i64, file_path: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            file_path,
            submitted_at: Utc::now(),
        }
    }
}

/// Request for the state of one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgressRequest {
    pub batch_id: i64,
}

/// Pull-side progress snapshot for one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgressResponse {
    pub id: i64,
    pub progress: f64,
    pub status: BatchStatus,
    pub processed_rows: i32,
    pub total_rows: i32,
    pub error_count: i32,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ImportBatch> for ImportProgressResponse {
    fn from(batch: &ImportBatch) -> Self {
        Self {
            id: batch.id,
            progress: batch.percentage(),
            status: batch.status(),
            processed_rows: batch.processed_rows,
            total_rows: batch.total_rows,
            error_count: batch.error_count,
            message: batch.message.clone(),
            created_at: batch.created_at,
            completed_at: batch.completed_at,
        }
    }
}

/// Push-side event published on the per-batch progress subject
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgressEvent {
    pub batch_id: i64,
    pub status: BatchStatus,
    pub processed_rows: i32,
    pub total_rows: i32,
    pub percentage: f64,
}

/// Request for the recent-batches dashboard listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentBatchesRequest {
    #[serde(default = "default_recent_limit")]
    pub limit: i64,
}

fn default_recent_limit() -> i64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(status: &str, total: i32, progress: f64) -> ImportBatch {
        ImportBatch {
            id: 1,
            file_name: "cargo.xlsx".to_string(),
            file_path: "imports/1700000000_cargo.xlsx".to_string(),
            status: status.to_string(),
            total_rows: total,
            processed_rows: 0,
            progress,
            error_count: 0,
            validation_errors: None,
            message: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_round_trips() {
        for s in ["pending", "processing", "completed", "failed"] {
            assert_eq!(BatchStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(BatchStatus::parse("cancelled").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
    }

    #[test]
    fn test_percentage_zero_while_total_unknown() {
        assert_eq!(batch("pending", 0, 0.0).percentage(), 0.0);
        assert_eq!(batch("processing", 0, 37.5).percentage(), 0.0);
    }

    #[test]
    fn test_percentage_forced_to_100_when_completed() {
        assert_eq!(batch("completed", 0, 42.0).percentage(), 100.0);
        assert_eq!(batch("completed", 10, 99.98).percentage(), 100.0);
    }

    #[test]
    fn test_percentage_uses_stored_progress_mid_run() {
        assert_eq!(batch("processing", 200, 37.5).percentage(), 37.5);
        // failed is sticky mid-run but progress still reflects the run
        assert_eq!(batch("failed", 200, 37.5).percentage(), 37.5);
    }

    #[test]
    fn test_progress_event_wire_shape() {
        let event = ImportProgressEvent {
            batch_id: 9,
            status: BatchStatus::Processing,
            processed_rows: 1000,
            total_rows: 4000,
            percentage: 25.0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"batchId\":9"));
        assert!(json.contains("\"status\":\"processing\""));
        assert!(json.contains("\"percentage\":25.0"));
    }

    #[test]
    fn test_recent_request_default_limit() {
        let req: RecentBatchesRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.limit, 10);
    }
}
