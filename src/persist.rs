//! JSON files shared between processes
//!
//! The daemon and one-shot CLI commands open the same data directory.
//! Writers hold an exclusive `flock` on a sibling lock file, re-read the
//! current file, apply their change and replace the file atomically.
//! Readers need no lock: a rename is never observed half-done.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Directory under the data dir holding lock files
pub const LOCKS_DIR: &str = "locks";

/// Exclusive advisory lock, released on drop or process exit
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block (off the runtime threads) until the lock is ours
    pub async fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let path_str = path.display().to_string();

        let lock = tokio::task::spawn_blocking(move || -> std::io::Result<FileLock> {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(FileLock { file, path })
        })
        .await
        .map_err(|e| Error::Storage(format!("Lock task for {} failed: {}", path_str, e)))?
        .map_err(|e| Error::Storage(format!("Failed to lock {}: {}", path_str, e)))?;

        debug!("Locked {}", path_str);
        Ok(lock)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Unlock of {} failed: {}", self.path.display(), e);
        }
    }
}

/// Read a JSON file; `None` if it does not exist yet
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write pretty JSON to a synced sibling temp file, then rename over the target
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Storage(format!("Failed to serialize {}: {}", path.display(), e)))?;

    let tmp = path.with_extension("json.tmp");
    let write_err = |e: std::io::Error| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e));

    let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
    file.write_all(json.as_bytes()).await.map_err(write_err)?;
    // Contents must be on disk before the rename can expose them
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Storage(format!("Failed to replace {}: {}", path.display(), e)))
}
