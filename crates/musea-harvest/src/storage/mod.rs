//! Capabilities the orchestrator consumes: fetching image bytes, storing
//! them, and upserting metadata rows

pub mod images;
pub mod repository;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::NormalizedArtwork;

pub use images::FsImageStore;
pub use repository::SqliteArtworkRepository;

/// Fetch raw image bytes
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;
}

/// Persist image bytes under a generated filename
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, bytes: &[u8], filename: &str) -> Result<PathBuf>;
}

/// Idempotent metadata store keyed by (museum code, original id)
#[async_trait]
pub trait ArtworkRepository: Send + Sync {
    async fn upsert_artwork(
        &self,
        record: &NormalizedArtwork,
        museum_code: &str,
        image_path: &Path,
        checksum: Option<&str>,
    ) -> Result<()>;

    async fn exists(&self, museum_code: &str, original_id: &str) -> Result<bool>;

    async fn count(&self, museum_code: &str) -> Result<u64>;

    /// Remove every row for one museum; returns the number removed
    async fn delete_source(&self, museum_code: &str) -> Result<u64>;

    async fn clear(&self) -> Result<u64>;
}
