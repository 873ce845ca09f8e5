use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use anyhow::Result;

use crate::protocol::{DEFAULT_PORT, MAX_ENCODABLE_SIZE};

pub const DEFAULT_CONFIG_FILE: &str = "captiond.toml";

/// Below this a header split across TCP segments is decoded from its first part
pub const MIN_HEADER_GRACE_MS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub staging_directory: PathBuf,
    pub auto_create_directories: bool,
    /// Largest payload the server accepts; capped by what the size header can carry
    pub max_payload_size: u64,
    /// Admission limit on concurrently served connections, unbounded when unset
    pub max_connections: Option<usize>,
    /// Idle time after which a partially received size header is accepted
    pub header_grace_ms: u64,
    /// Bound on each read or write step of a connection
    pub io_timeout_secs: Option<u64>,
    pub metrics_address: Option<String>,
    pub log_level: String,
    pub captioner: CaptionerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptionerBackend {
    Command,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionerConfig {
    pub backend: CaptionerBackend,
    /// Program and arguments; `{image}` is replaced by the staged image path
    pub command: Vec<String>,
    /// Run once at startup before the listener accepts connections
    pub warmup: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub fixed_caption: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            staging_directory: std::env::temp_dir().join("captiond"),
            auto_create_directories: true,
            max_payload_size: 64 * 1024 * 1024,
            max_connections: None,
            header_grace_ms: 250,
            io_timeout_secs: None,
            metrics_address: None,
            log_level: "info".to_string(),
            captioner: CaptionerConfig::default(),
        }
    }
}

impl Default for CaptionerConfig {
    fn default() -> Self {
        Self {
            backend: CaptionerBackend::Command,
            command: vec![
                "python3".to_string(),
                "caption.py".to_string(),
                "{image}".to_string(),
            ],
            warmup: Vec::new(),
            timeout_secs: None,
            fixed_caption: "an image".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load_or_create(config_path: Option<&str>) -> Result<Self> {
        let config_file = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        if std::path::Path::new(config_file).exists() {
            let content = std::fs::read_to_string(config_file)?;
            let config: ServerConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(config_file)?;
            tracing::info!("Wrote default configuration to {}", config_file);
            Ok(config)
        }
    }

    pub fn save(&self, config_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 || self.max_payload_size > MAX_ENCODABLE_SIZE {
            anyhow::bail!(
                "max_payload_size must be between 1 and {}, got {}",
                MAX_ENCODABLE_SIZE,
                self.max_payload_size
            );
        }
        if self.header_grace_ms < MIN_HEADER_GRACE_MS {
            anyhow::bail!(
                "header_grace_ms must be at least {}, got {}",
                MIN_HEADER_GRACE_MS,
                self.header_grace_ms
            );
        }
        if self.max_connections == Some(0) {
            anyhow::bail!("max_connections must be positive when set");
        }
        if self.captioner.backend == CaptionerBackend::Command && self.captioner.command.is_empty() {
            anyhow::bail!("captioner.command must name a program");
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if self.auto_create_directories && !self.staging_directory.exists() {
            std::fs::create_dir_all(&self.staging_directory)?;
            tracing::info!("Created staging directory: {:?}", self.staging_directory);
        }
        Ok(())
    }

    pub fn header_grace(&self) -> Duration {
        Duration::from_millis(self.header_grace_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }
}
