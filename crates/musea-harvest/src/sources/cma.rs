//! Cleveland Museum of Art: open-access API listing and bulk-dump traversal

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{CollectionQuery, Harvested, IdListing, SourceAdapter};
use crate::error::{HarvestError, Result};
use crate::http::HttpClient;
use crate::model::{compare_ids, Breadcrumb, ImageReference, NormalizedArtwork, SourceCode};
use crate::normalize::{id_value, CmaFactory, MetadataFactory};
use crate::progress::{DumpFileCursor, ProgressTracker};

/// Ids requested per listing call
pub const CMA_PAGE_LIMIT: usize = 1000;

pub struct CmaListing {
    http: HttpClient,
    base_url: String,
    factory: CmaFactory,
}

impl CmaListing {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            factory: CmaFactory,
        }
    }
}

#[async_trait]
impl IdListing for CmaListing {
    fn source(&self) -> SourceCode {
        SourceCode::Cma
    }

    async fn list_ids(&self, query: &CollectionQuery) -> Result<Vec<String>> {
        let url = format!("{}/artworks/", self.base_url);
        let base_params = query.pairs_without(&["fields", "skip", "limit"]);
        let mut ids = Vec::new();
        let mut skip = 0usize;

        loop {
            let mut params = base_params.clone();
            params.push(("fields".to_string(), "id".to_string()));
            params.push(("skip".to_string(), skip.to_string()));
            params.push(("limit".to_string(), CMA_PAGE_LIMIT.to_string()));

            let body = self.http.get_json(&url, &params).await?;
            let data = body
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| HarvestError::validation("CMA listing has no data array"))?;
            let total = body.pointer("/info/total").and_then(Value::as_u64);

            ids.extend(data.iter().filter_map(|item| id_value(item.get("id"))));
            skip += data.len();
            debug!(source = "cma", fetched = ids.len(), total = ?total, "Listed ids");

            let done = match total {
                Some(total) => skip as u64 >= total,
                None => data.len() < CMA_PAGE_LIMIT,
            };
            if data.is_empty() || done {
                break;
            }
        }

        Ok(ids)
    }

    async fn fetch_details(&self, id: &str) -> Result<NormalizedArtwork> {
        let url = format!("{}/artworks/{}", self.base_url, id);
        let body = self.http.get_json(&url, &[]).await?;
        let data = body
            .get("data")
            .ok_or_else(|| HarvestError::validation(format!("artwork {} response has no data", id)))?;
        self.factory.create_metadata(data)
    }

    fn image_url(&self, reference: &ImageReference) -> Option<String> {
        match reference {
            ImageReference::Url(url) => Some(url.clone()),
            ImageReference::IiifId(_) => None,
        }
    }
}

/// Reads one JSON record per file from a local CMA dump
pub struct CmaDumpAdapter {
    dump_dir: PathBuf,
    factory: CmaFactory,
    files: Vec<PathBuf>,
    position: usize,
}

impl CmaDumpAdapter {
    pub fn new(dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            factory: CmaFactory,
            files: Vec::new(),
            position: 0,
        }
    }

    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    async fn list_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dump_dir).await.map_err(|e| {
            HarvestError::config(format!(
                "cannot read dump directory {}: {}",
                self.dump_dir.display(),
                e
            ))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        files.sort_by(|a, b| compare_ids(&file_id(a), &file_id(b)).then_with(|| a.cmp(b)));
        Ok(files)
    }
}

fn file_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl SourceAdapter for CmaDumpAdapter {
    type Cursor = DumpFileCursor;

    fn source(&self) -> SourceCode {
        SourceCode::CmaDump
    }

    async fn iter_collection(
        &mut self,
        _query: &CollectionQuery,
        tracker: &mut ProgressTracker<DumpFileCursor>,
    ) -> Result<()> {
        self.files = self.list_files().await?;
        self.position = tracker.cursor().last_processed_index.min(self.files.len());

        info!(
            source = "cma-dump",
            dir = %self.dump_dir.display(),
            files = self.files.len(),
            start_index = self.position,
            "Dump directory ready"
        );
        Ok(())
    }

    async fn next_artwork(
        &mut self,
        tracker: &mut ProgressTracker<DumpFileCursor>,
    ) -> Result<Option<Harvested>> {
        let total_files = self.files.len();

        while self.position < total_files {
            let index = self.position;
            self.position += 1;

            let path = &self.files[index];
            let breadcrumb = Breadcrumb::DumpFile { index, total_files };
            let fallback_id = file_id(path);

            let parsed = match tokio::fs::read(path).await {
                Ok(bytes) => serde_json::from_slice::<Value>(&bytes).map_err(|e| {
                    HarvestError::validation(format!("{}: {}", path.display(), e))
                }),
                Err(e) => Err(HarvestError::from(e)),
            };

            let normalized = parsed.and_then(|raw| self.factory.create_metadata(&raw));

            let art = match normalized {
                Ok(art) => art,
                Err(error) => {
                    if tracker.is_processed(&fallback_id) {
                        tracker.advance_cursor(&breadcrumb);
                        continue;
                    }
                    warn!(source = "cma-dump", file = %path.display(), error = %error, "Unusable dump file");
                    return Ok(Some(Harvested::Failed {
                        id: fallback_id,
                        error,
                        breadcrumb: Some(breadcrumb),
                    }));
                },
            };

            if tracker.is_processed(&art.id) {
                tracker.advance_cursor(&breadcrumb);
                continue;
            }
            if !art.is_public_domain {
                debug!(source = "cma-dump", id = %art.id, "Filtered non-public-domain record");
                tracker.advance_cursor(&breadcrumb);
                continue;
            }

            return Ok(Some(Harvested::Record(art.with_breadcrumb(breadcrumb))));
        }

        Ok(None)
    }

    async fn get_artwork_details(&self, id: &str) -> Result<NormalizedArtwork> {
        let path = self.dump_dir.join(format!("{}.json", id));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HarvestError::download(format!("no dump file for artwork {}", id)));
            },
            Err(e) => return Err(e.into()),
        };
        let raw: Value = serde_json::from_slice(&bytes)?;
        self.factory.create_metadata(&raw)
    }

    fn image_url(&self, reference: &ImageReference) -> Option<String> {
        match reference {
            ImageReference::Url(url) => Some(url.clone()),
            ImageReference::IiifId(_) => None,
        }
    }

    fn is_remote(&self) -> bool {
        false
    }
}
