use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const STAGING_PREFIX: &str = "upload-";
const PROCESS_DIR_PREFIX: &str = "proc-";

static NEXT_STAGING_ID: AtomicU64 = AtomicU64::new(0);

/// Directory under `root` that holds this process's uploads
pub fn process_dir(root: &Path) -> PathBuf {
    process_dir_for(root, std::process::id())
}

fn process_dir_for(root: &Path, pid: u32) -> PathBuf {
    root.join(format!("{}{}", PROCESS_DIR_PREFIX, pid))
}

/// Transient copy of one received payload.
///
/// Lives in the per-process directory under the staging root, with a name
/// unique within the process. The file is removed when the guard is dropped,
/// whichever way the handler exits.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    pub async fn create(root: &Path, data: &[u8]) -> Result<Self> {
        let dir = process_dir(root);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => debug!("Created process staging directory {:?}", dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let id = NEXT_STAGING_ID.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{}{}.img", STAGING_PREFIX, id));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        let staged = Self { path };

        file.write_all(data).await?;
        file.flush().await?;
        debug!("Staged {} bytes at {:?}", data.len(), staged.path);

        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        // Drop cannot await; unlinking one small file does not stall the worker.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staging file {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staging file {:?}: {}", self.path, e),
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// No portable liveness check here, so every owner is assumed alive.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Remove the staging directories of processes that have exited.
///
/// Directories of live processes, this one included, are left alone so
/// several servers can share one staging root. Returns how many were removed.
pub fn remove_stale(root: &Path) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let own_pid = std::process::id();
    let mut removed = 0;
    for entry in std::fs::read_dir(root)?.flatten() {
        let name = entry.file_name();
        let Some(pid) = name
            .to_string_lossy()
            .strip_prefix(PROCESS_DIR_PREFIX)
            .and_then(|pid| pid.parse::<u32>().ok())
        else {
            continue;
        };

        if pid == own_pid || process_alive(pid) || !entry.path().is_dir() {
            continue;
        }

        std::fs::remove_dir_all(entry.path())?;
        info!("Removed staging directory of exited process {}", pid);
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
pub fn staged_count(root: &Path) -> usize {
    std::fs::read_dir(process_dir(root))
        .map(|entries| entries.count())
        .unwrap_or(0)
}
