use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use anyhow::{anyhow, bail, Context};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::CaptionerConfig;
use crate::inference::Captioner;

const IMAGE_PLACEHOLDER: &str = "{image}";

/// Runs an external program per image and reads the caption from its stdout
#[derive(Debug, Clone)]
pub struct CommandCaptioner {
    program: String,
    args: Vec<String>,
    warmup: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandCaptioner {
    pub fn new(argv: Vec<String>) -> anyhow::Result<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next().ok_or_else(|| anyhow!("captioner command is empty"))?;
        Ok(Self {
            program,
            args: argv.collect(),
            warmup: Vec::new(),
            timeout: None,
        })
    }

    pub fn from_config(config: &CaptionerConfig) -> anyhow::Result<Self> {
        let mut captioner = Self::new(config.command.clone())?;
        captioner.warmup = config.warmup.clone();
        if let Some(secs) = config.timeout_secs {
            captioner = captioner.with_timeout(Duration::from_secs(secs));
        }
        Ok(captioner)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Arguments for one invocation, the image path appended when no placeholder is present
    fn args_for(&self, image: &Path) -> Vec<String> {
        let image = image.to_string_lossy();
        if self.args.iter().any(|arg| arg.contains(IMAGE_PLACEHOLDER)) {
            self.args
                .iter()
                .map(|arg| arg.replace(IMAGE_PLACEHOLDER, &image))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(image.into_owned());
            args
        }
    }

    async fn run(&self, program: &str, args: &[String]) -> anyhow::Result<String> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", program))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| anyhow!("{} timed out after {:?}", program, limit))??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", program, output.status, stderr.trim());
        }

        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("{} wrote non UTF-8 output", program))?;
        Ok(stdout.trim().to_string())
    }
}

#[async_trait]
impl Captioner for CommandCaptioner {
    fn name(&self) -> &str {
        "command"
    }

    async fn load(&self) -> anyhow::Result<()> {
        let Some((program, args)) = self.warmup.split_first() else {
            debug!("No warmup command configured");
            return Ok(());
        };

        info!("Running warmup: {} {:?}", program, args);
        let output = self.run(program, args).await?;
        if !output.is_empty() {
            debug!("Warmup output: {}", output);
        }
        Ok(())
    }

    async fn caption(&self, image: &Path) -> anyhow::Result<String> {
        let args = self.args_for(image);
        debug!("Invoking {} {:?}", self.program, args);

        let caption = self.run(&self.program, &args).await?;
        if caption.is_empty() {
            warn!("{} produced no caption for {:?}", self.program, image);
            bail!("{} produced an empty caption", self.program);
        }
        Ok(caption)
    }
}
