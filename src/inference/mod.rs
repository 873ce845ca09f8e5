pub mod command;
pub mod fixed;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::{CaptionerBackend, CaptionerConfig};

pub use command::CommandCaptioner;
pub use fixed::FixedCaptioner;

/// The inference collaborator: turns a staged image into a caption.
///
/// `load` runs once per process before any connection is accepted; after
/// that the captioner is only read, from many handler tasks at once.
#[async_trait]
pub trait Captioner: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn caption(&self, image: &Path) -> anyhow::Result<String>;
}

pub fn from_config(config: &CaptionerConfig) -> anyhow::Result<Arc<dyn Captioner>> {
    let captioner: Arc<dyn Captioner> = match config.backend {
        CaptionerBackend::Command => Arc::new(CommandCaptioner::from_config(config)?),
        CaptionerBackend::Fixed => Arc::new(FixedCaptioner::new(config.fixed_caption.clone())),
    };
    Ok(captioner)
}
