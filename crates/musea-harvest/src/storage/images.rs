//! Filesystem image store

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ImageStore;
use crate::error::{HarvestError, Result};

/// Writes images into one directory via temp-file + rename
#[derive(Debug, Clone)]
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete every stored image; returns the number of files removed
    pub async fn purge(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Reject bytes that do not sniff as an image
pub fn ensure_image(bytes: &[u8]) -> Result<&'static str> {
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(kind.mime_type()),
        Some(kind) => Err(HarvestError::image(format!(
            "expected image data, got {}",
            kind.mime_type()
        ))),
        None => Err(HarvestError::image(format!(
            "unrecognised image data ({} bytes)",
            bytes.len()
        ))),
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, bytes: &[u8], filename: &str) -> Result<PathBuf> {
        let mime = ensure_image(bytes)?;
        let path = self.dir.join(filename);
        let data = bytes.to_vec();
        let target = path.clone();

        tokio::task::spawn_blocking(move || musea_common::fs::write_atomic(&target, &data))
            .await
            .map_err(|e| HarvestError::persistence(format!("image write task failed: {}", e)))??;

        debug!(path = %path.display(), mime, bytes = bytes.len(), "Stored image");
        Ok(path)
    }
}
