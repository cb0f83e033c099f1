//! Import message handlers: upload submission and progress queries
//!
//! The submit path is deliberately short: validate the request, stage the
//! file, create the pending ledger row, enqueue the job, reply with the
//! batch id. Everything after that is visible only through the progress
//! query and the per-batch push subject.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::services::import_processor::ImportProcessor;
use crate::services::progress::ProgressPublisher;
use crate::services::spreadsheet::SUPPORTED_EXTENSIONS;
use crate::services::storage;
use crate::types::{
    ErrorResponse, ImportProgressRequest, ImportProgressResponse, ImportSubmitRequest,
    ImportSubmitResponse, RecentBatchesRequest, Request, SuccessResponse,
};

/// Maximum accepted upload size after base64 decoding
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Field-level validation of an upload request. Returns the messages for
/// the `file` field; an empty vec means the request is acceptable.
fn validate_upload(file_name: &str, decoded_len: usize) -> Vec<String> {
    let mut errors = Vec::new();

    if decoded_len == 0 {
        errors.push("A file is required".to_string());
    }

    let ext = file_name
        .rsplit('.')
        .next()
        .filter(|e| *e != file_name)
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        errors.push("File must be one of: xlsx, xls, csv".to_string());
    }

    if decoded_len > MAX_UPLOAD_BYTES {
        errors.push("File must not exceed 10MB".to_string());
    }

    errors
}

/// Handle import.submit messages
pub async fn handle_submit(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    processor: Arc<ImportProcessor>,
    storage_dir: String,
) -> Result<()> {
    let publisher = ProgressPublisher::new(client.clone());

    while let Some(msg) = subscriber.next().await {
        debug!("Received import.submit message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ImportSubmitRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import submit request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let upload = &request.payload;

        let bytes = match BASE64.decode(&upload.content) {
            Ok(bytes) => bytes,
            Err(_) => {
                let error = ErrorResponse::new(request.id, "INVALID_FILE", "Upload rejected")
                    .with_details(serde_json::json!({
                        "file": ["File content is not valid base64"]
                    }));
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let field_errors = validate_upload(&upload.file_name, bytes.len());
        if !field_errors.is_empty() {
            // Nothing is stored or scheduled for an invalid request
            let error = ErrorResponse::new(request.id, "INVALID_FILE", "Upload rejected")
                .with_details(serde_json::json!({ "file": field_errors }));
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let outcome = async {
            let path = storage::store_upload(&storage_dir, &upload.file_name, &bytes)?;
            let path_str = path.display().to_string();

            let batch_id =
                queries::import_batch::create_batch(&pool, &upload.file_name, &path_str).await?;

            processor.submit_job(batch_id, &path_str).await?;

            // Initial pending snapshot so subscribers see the batch exists
            if let Some(batch) = queries::import_batch::get_batch(&pool, batch_id).await? {
                publisher.publish(&batch).await?;
            }

            anyhow::Ok(batch_id)
        }
        .await;

        match outcome {
            Ok(batch_id) => {
                info!(
                    "Import batch {} queued for file {}",
                    batch_id, upload.file_name
                );
                let response = SuccessResponse::new(
                    request.id,
                    ImportSubmitResponse {
                        batch_id,
                        file_name: upload.file_name.clone(),
                        message: "Import queued".to_string(),
                    },
                );
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to queue import: {}", e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle import.progress messages (pull side of the facade)
pub async fn handle_progress(client: Client, mut subscriber: Subscriber, pool: PgPool) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.progress message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ImportProgressRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import progress request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let batch_id = request.payload.batch_id;
        match queries::import_batch::get_batch(&pool, batch_id).await {
            Ok(Some(batch)) => {
                let response =
                    SuccessResponse::new(request.id, ImportProgressResponse::from(&batch));
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Ok(None) => {
                let error = ErrorResponse::new(
                    request.id,
                    "NOT_FOUND",
                    format!("Import batch {} not found", batch_id),
                );
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                error!("Failed to load batch {}: {}", batch_id, e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle import.recent messages for the progress dashboard
pub async fn handle_recent(client: Client, mut subscriber: Subscriber, pool: PgPool) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.recent message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<RecentBatchesRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse recent batches request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let limit = request.payload.limit.clamp(1, 100);
        match queries::import_batch::recent_batches(&pool, limit).await {
            Ok(batches) => {
                let items: Vec<ImportProgressResponse> =
                    batches.iter().map(ImportProgressResponse::from).collect();
                let response = SuccessResponse::new(request.id, items);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to list recent batches: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
