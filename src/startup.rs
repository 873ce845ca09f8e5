use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use anyhow::{Context, Result};

use crate::config::ServerConfig;
use crate::inference::{self, Captioner};
use crate::staging;

/// Prepare the staging directory and load the captioner, once per process.
/// The server binds only after this returns.
pub async fn initialize(config: &ServerConfig) -> Result<Arc<dyn Captioner>> {
    config.validate()?;
    config.ensure_directories()?;

    let removed = staging::remove_stale(&config.staging_directory)?;
    if removed > 0 {
        info!("Removed {} stale staging directories from {:?}", removed, config.staging_directory);
    }

    let captioner = inference::from_config(&config.captioner)?;

    info!("Loading model ({} backend), please wait...", captioner.name());
    let started = Instant::now();
    captioner
        .load()
        .await
        .with_context(|| format!("failed to load {} captioner", captioner.name()))?;
    info!("Model loaded in {:.2?}", started.elapsed());

    Ok(captioner)
}
