//! Candidate-id-list traversal
//!
//! The complete, sorted list of candidate ids for a query is fetched once and
//! cached on disk. Resumption starts right after the tracker's
//! `last_object_id`; if that id is not in the current list, every candidate
//! not yet in `processed_ids` is visited instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CollectionQuery, Harvested, SourceAdapter};
use crate::error::Result;
use crate::model::{compare_ids, Breadcrumb, ImageReference, NormalizedArtwork, SourceCode};
use crate::progress::{ObjectCursor, ProgressTracker};

pub const DEFAULT_CANDIDATE_TTL_HOURS: u64 = 24;

/// A source that lists ids and fetches records one by one
#[async_trait]
pub trait IdListing: Send + Sync {
    fn source(&self) -> SourceCode;

    /// Every id matching the query, in any order
    async fn list_ids(&self, query: &CollectionQuery) -> Result<Vec<String>>;

    async fn fetch_details(&self, id: &str) -> Result<NormalizedArtwork>;

    fn image_url(&self, reference: &ImageReference) -> Option<String>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedCandidates {
    fingerprint: String,
    fetched_at: DateTime<Utc>,
    ids: Vec<String>,
}

/// On-disk cache of a candidate id list
#[derive(Debug, Clone)]
pub struct CandidateCache {
    path: PathBuf,
    ttl: Duration,
}

impl CandidateCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached ids if the cache matches `fingerprint` and is fresh
    pub fn load(&self, fingerprint: &str) -> Option<Vec<String>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read candidate cache");
                return None;
            },
        };

        let cached: CachedCandidates = match serde_json::from_slice(&bytes) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt candidate cache");
                return None;
            },
        };

        if cached.fingerprint != fingerprint {
            info!(path = %self.path.display(), "Candidate cache was built for another query");
            return None;
        }

        let age = Utc::now().signed_duration_since(cached.fetched_at);
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        if age > ttl {
            info!(
                path = %self.path.display(),
                age_hours = age.num_hours(),
                "Candidate cache expired"
            );
            return None;
        }

        debug!(path = %self.path.display(), ids = cached.ids.len(), "Using cached candidates");
        Some(cached.ids)
    }

    pub fn store(&self, fingerprint: &str, ids: &[String]) -> Result<()> {
        let cached = CachedCandidates {
            fingerprint: fingerprint.to_string(),
            fetched_at: Utc::now(),
            ids: ids.to_vec(),
        };
        let bytes = serde_json::to_vec(&cached)?;
        musea_common::fs::write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    pub fn invalidate(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sort numerically (then lexicographically) and drop duplicates
pub fn sort_candidates(mut ids: Vec<String>) -> Vec<String> {
    ids.sort_by(|a, b| compare_ids(a, b));
    ids.dedup();
    ids
}

pub struct IdListAdapter<L> {
    listing: L,
    cache: CandidateCache,
    queue: VecDeque<String>,
    total: usize,
}

impl<L: IdListing> IdListAdapter<L> {
    pub fn new(listing: L, cache: CandidateCache) -> Self {
        Self {
            listing,
            cache,
            queue: VecDeque::new(),
            total: 0,
        }
    }

    pub fn listing(&self) -> &L {
        &self.listing
    }

    /// Ids still queued for this run
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    async fn candidates(&self, query: &CollectionQuery) -> Result<Vec<String>> {
        let fingerprint = format!("{}?{}", self.listing.source(), query.fingerprint());
        if let Some(ids) = self.cache.load(&fingerprint) {
            return Ok(ids);
        }

        info!(source = %self.listing.source(), "Fetching candidate id list");
        let ids = sort_candidates(self.listing.list_ids(query).await?);
        if let Err(e) = self.cache.store(&fingerprint, &ids) {
            warn!(
                source = %self.listing.source(),
                path = %self.cache.path().display(),
                error = %e,
                "Failed to cache candidate ids"
            );
        }
        Ok(ids)
    }
}

#[async_trait]
impl<L: IdListing> SourceAdapter for IdListAdapter<L> {
    type Cursor = ObjectCursor;

    fn source(&self) -> SourceCode {
        self.listing.source()
    }

    async fn iter_collection(
        &mut self,
        query: &CollectionQuery,
        tracker: &mut ProgressTracker<ObjectCursor>,
    ) -> Result<()> {
        let ids = self.candidates(query).await?;
        self.total = ids.len();

        let start = match tracker.cursor().last_object_id.as_deref() {
            Some(last) => match ids.iter().position(|id| id == last) {
                Some(index) => index + 1,
                None => {
                    warn!(
                        source = %self.listing.source(),
                        last_object_id = last,
                        "Last object id not in candidate list; falling back to set difference"
                    );
                    0
                },
            },
            None => 0,
        };

        self.queue = ids
            .into_iter()
            .skip(start)
            .filter(|id| !tracker.is_processed(id))
            .collect();

        info!(
            source = %self.listing.source(),
            candidates = self.total,
            resume_index = start,
            remaining = self.queue.len(),
            "Candidate list ready"
        );
        Ok(())
    }

    async fn next_artwork(
        &mut self,
        tracker: &mut ProgressTracker<ObjectCursor>,
    ) -> Result<Option<Harvested>> {
        while let Some(id) = self.queue.pop_front() {
            if tracker.is_processed(&id) {
                continue;
            }

            let breadcrumb = Breadcrumb::Object {
                object_id: id.clone(),
                total_objects: self.total,
            };
            return match self.listing.fetch_details(&id).await {
                Ok(art) => Ok(Some(Harvested::Record(art.with_breadcrumb(breadcrumb)))),
                Err(error) if error.is_fatal() => Err(error),
                Err(error) => {
                    warn!(source = %self.listing.source(), id = %id, error = %error, "Detail fetch failed");
                    Ok(Some(Harvested::Failed {
                        id,
                        error,
                        breadcrumb: Some(breadcrumb),
                    }))
                },
            };
        }
        Ok(None)
    }

    async fn get_artwork_details(&self, id: &str) -> Result<NormalizedArtwork> {
        self.listing.fetch_details(id).await
    }

    fn image_url(&self, reference: &ImageReference) -> Option<String> {
        self.listing.image_url(reference)
    }
}
