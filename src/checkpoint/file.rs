// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-file checkpoint.
//!
//! The file holds one line: the position text (`<time>-<ordinal>`).
//! Saves write `<path>.tmp`, fsync it, rename over `<path>`, then fsync the
//! directory so the rename itself survives a power loss. A reader never sees
//! a half-written value.

use super::{parse_stored, CheckpointResult, PositionStore};
use crate::error::CheckpointError;
use crate::position::LogPosition;
use crate::BoxFuture;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Checkpoint stored as a text file.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
        }
    }

    /// Path of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> CheckpointResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CheckpointError::io(parent, e))?;
        }
        Ok(())
    }

    async fn write_atomic(&self, content: &str) -> CheckpointResult<()> {
        let mut file = tokio::fs::File::create(&self.tmp_path)
            .await
            .map_err(|e| CheckpointError::io(&self.tmp_path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| CheckpointError::io(&self.tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| CheckpointError::io(&self.tmp_path, e))?;
        drop(file);

        tokio::fs::rename(&self.tmp_path, &self.path)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;

        sync_parent(&self.path).await
    }
}

/// Flush the directory entry of `path` to disk.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> CheckpointResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let handle = tokio::fs::File::open(dir)
        .await
        .map_err(|e| CheckpointError::io(dir, e))?;
    handle.sync_all().await.map_err(|e| CheckpointError::io(dir, e))
}

/// Directories cannot be opened for syncing here; rename is the best we get.
#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> CheckpointResult<()> {
    Ok(())
}

impl PositionStore for FileCheckpoint {
    fn probe(&self) -> BoxFuture<'_, CheckpointResult<()>> {
        Box::pin(async move {
            self.ensure_parent().await?;

            // Must be able to create the temp file next to the checkpoint
            tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.tmp_path)
                .await
                .map_err(|e| CheckpointError::io(&self.tmp_path, e))?;
            tokio::fs::remove_file(&self.tmp_path)
                .await
                .map_err(|e| CheckpointError::io(&self.tmp_path, e))?;

            info!(path = %self.path.display(), "Checkpoint file is writable");
            Ok(())
        })
    }

    fn load(&self) -> BoxFuture<'_, CheckpointResult<Option<LogPosition>>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => parse_stored(&content),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "No checkpoint file");
                    Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    // Not UTF-8
                    Err(CheckpointError::Malformed {
                        content: "<binary>".to_string(),
                    })
                }
                Err(e) => Err(CheckpointError::io(&self.path, e)),
            }
        })
    }

    fn save(&self, position: LogPosition) -> BoxFuture<'_, CheckpointResult<()>> {
        Box::pin(async move {
            self.write_atomic(&position.to_string()).await?;
            debug!(position = %position, "Checkpoint saved");
            Ok(())
        })
    }
}
