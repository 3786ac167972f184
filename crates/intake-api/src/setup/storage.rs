//! Storage setup and initialization

use anyhow::{Context, Result};
use intake_core::Config;
use intake_storage::{create_storage, Storage};
use std::sync::Arc;

/// Create the configured storage backend.
pub async fn setup_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    tracing::info!("Initializing storage...");
    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage backend")?;
    tracing::info!(
        backend = %storage.backend_type(),
        path = config.local_storage_path().unwrap_or("-"),
        "Storage initialized successfully"
    );
    Ok(storage)
}
