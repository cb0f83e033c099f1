//! NATS message handlers

pub mod import;
pub mod ping;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tracing::{error, info};

use crate::config::Config;
use crate::services::import_processor::ImportProcessor;

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    // Subscribe to all subjects
    let ping_sub = client.subscribe("quayside.ping").await?;
    let import_submit_sub = client.subscribe("quayside.import.submit").await?;
    let import_progress_sub = client.subscribe("quayside.import.progress").await?;
    let import_recent_sub = client.subscribe("quayside.import.recent").await?;

    info!("Subscribed to NATS subjects");

    // Import processor owns the JetStream stream and the consumer loop
    let processor = Arc::new(ImportProcessor::new(client.clone(), pool.clone()).await?);

    let client_ping = client.clone();
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub).await
    });

    let client_submit = client.clone();
    let pool_submit = pool.clone();
    let processor_submit = Arc::clone(&processor);
    let storage_dir = config.import_storage_dir.clone();
    let submit_handle = tokio::spawn(async move {
        import::handle_submit(client_submit, import_submit_sub, pool_submit, processor_submit, storage_dir).await
    });

    let client_progress = client.clone();
    let pool_progress = pool.clone();
    let progress_handle = tokio::spawn(async move {
        import::handle_progress(client_progress, import_progress_sub, pool_progress).await
    });

    let client_recent = client.clone();
    let pool_recent = pool.clone();
    let recent_handle = tokio::spawn(async move {
        import::handle_recent(client_recent, import_recent_sub, pool_recent).await
    });

    let processor_main = Arc::clone(&processor);
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = processor_main.start_processing().await {
            error!("Import processor error: {}", e);
        }
    });

    info!("All handlers started");

    // Handlers run until the connection drops
    let _ = tokio::try_join!(
        ping_handle,
        submit_handle,
        progress_handle,
        recent_handle,
        consumer_handle,
    )?;

    Ok(())
}
