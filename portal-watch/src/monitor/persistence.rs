// Persistence helpers for the daemon's runtime files
// status.json is rewritten atomically after every cycle; daemon.pid is held
// under an exclusive lock for the life of the process.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::monitor::runner::CycleOutcome;
use crate::monitor::session::SessionStatus;

/// Observable daemon status. Never read back into the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pid: u32,
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub session: SessionStatus,
    pub has_baseline: bool,
    pub baseline_len: usize,
    pub last_outcome: Option<CycleOutcome>,
}

/// Location of the status file
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, status: &MonitorStatus) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(status).with_context(|| "Failed to serialize status")?;
        atomic_write(&self.path, &contents)
    }

    /// Load the last written status, `None` if the daemon never wrote one
    pub fn read(&self) -> Result<Option<MonitorStatus>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read status file: {}", self.path.display()))?;

        if contents.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&contents)
            .map(Some)
            .with_context(|| format!("Failed to parse status file: {}", self.path.display()))
    }
}

/// Exclusive lock on the PID file; a second daemon fails to acquire it.
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open PID file: {}", path.display()))?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            bail!("Another portal-watch daemon holds {}", path.display());
        }

        file.set_len(0)
            .with_context(|| "Failed to truncate PID file")?;
        write!(file, "{}", std::process::id()).with_context(|| "Failed to write PID file")?;
        file.flush().with_context(|| "Failed to flush PID file")?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Unlock and remove the PID file
    pub fn release(self) -> Result<()> {
        FileExt::unlock(&self.file).with_context(|| "Failed to unlock PID file")?;
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove PID file: {}", self.path.display()))
    }
}

/// Atomically save data to a file using write-to-temp + rename
/// so readers never see a half-written file
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Invalid path: {}", path.display()))?;

    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    // Temp file in the same directory keeps the rename on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
