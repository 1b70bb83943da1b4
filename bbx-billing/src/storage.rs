//! Atomic document writes
//!
//! Documents are written to a sibling temp file, flushed, then renamed over
//! the destination. The temp file is removed on every failure path.

use crate::error::{BillingError, BillingResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Removes the temp file unless the rename succeeded
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
    }
}

fn temp_path_for(target: &Path) -> BillingResult<PathBuf> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            BillingError::Validation(format!("invalid document path: {}", target.display()))
        })?;
    Ok(target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple())))
}

/// Blocking atomic write
pub fn write_atomic_blocking(target: &Path, contents: &[u8]) -> BillingResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(target)?;
    let mut guard = TempFileGuard::new(temp_path.clone());

    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, target)?;
    guard.disarm();

    Ok(())
}

/// Atomic write on the blocking pool
pub async fn write_atomic(target: PathBuf, contents: Vec<u8>) -> BillingResult<()> {
    tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &contents))
        .await
        .map_err(|e| BillingError::ExternalService(format!("document writer task failed: {}", e)))?
}
