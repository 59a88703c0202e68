//! Shared fakes for orchestrator and source tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use musea_harvest::model::{Breadcrumb, ImageReference};
use musea_harvest::observer::{MemoryObserver, RunEvent, RunObserver};
use musea_harvest::progress::{ObjectCursor, Outcome, ProgressTracker};
use musea_harvest::sources::{CollectionQuery, Harvested, SourceAdapter};
use musea_harvest::storage::{ArtworkRepository, ImageFetcher, ImageStore};
use musea_harvest::{Collaborators, HarvestError, NormalizedArtwork, Result, SourceCode};

/// Smallest byte string `infer` recognises as a JPEG
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

pub fn artwork(id: &str) -> NormalizedArtwork {
    NormalizedArtwork {
        id: id.to_string(),
        title: format!("Work {}", id),
        artist: "Jane Doe".to_string(),
        is_public_domain: true,
        image: Some(ImageReference::Url(image_url(id))),
        ..NormalizedArtwork::default()
    }
}

pub fn image_url(id: &str) -> String {
    format!("https://images.test/{}.jpg", id)
}

/// In-memory id-list source with resumption by `last_object_id`
pub struct StaticAdapter {
    items: Vec<NormalizedArtwork>,
    queue: VecDeque<NormalizedArtwork>,
    listing_failures: usize,
    pub listing_calls: usize,
}

impl StaticAdapter {
    pub fn new(items: Vec<NormalizedArtwork>) -> Self {
        Self {
            items,
            queue: VecDeque::new(),
            listing_failures: 0,
            listing_calls: 0,
        }
    }

    pub fn with_ids(ids: &[&str]) -> Self {
        Self::new(ids.iter().map(|id| artwork(id)).collect())
    }

    /// Fail the first `n` listing calls with a network error
    pub fn failing_listing(mut self, n: usize) -> Self {
        self.listing_failures = n;
        self
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    type Cursor = ObjectCursor;

    fn source(&self) -> SourceCode {
        SourceCode::Met
    }

    async fn iter_collection(
        &mut self,
        _query: &CollectionQuery,
        tracker: &mut ProgressTracker<ObjectCursor>,
    ) -> Result<()> {
        self.listing_calls += 1;
        if self.listing_failures > 0 {
            self.listing_failures -= 1;
            return Err(HarvestError::network("listing unavailable"));
        }

        let start = tracker
            .cursor()
            .last_object_id
            .as_deref()
            .and_then(|last| self.items.iter().position(|a| a.id == last))
            .map_or(0, |i| i + 1);
        self.queue = self
            .items
            .iter()
            .skip(start)
            .filter(|a| !tracker.is_processed(&a.id))
            .cloned()
            .collect();
        Ok(())
    }

    async fn next_artwork(
        &mut self,
        _tracker: &mut ProgressTracker<ObjectCursor>,
    ) -> Result<Option<Harvested>> {
        let total_objects = self.items.len();
        Ok(self.queue.pop_front().map(|art| {
            let breadcrumb = Breadcrumb::Object {
                object_id: art.id.clone(),
                total_objects,
            };
            Harvested::Record(art.with_breadcrumb(breadcrumb))
        }))
    }

    async fn get_artwork_details(&self, id: &str) -> Result<NormalizedArtwork> {
        self.items
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| HarvestError::download(format!("no artwork {}", id)))
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

/// One scripted fetch response
pub enum Fetch {
    Bytes(Vec<u8>),
    NetworkError,
    Corrupt,
    Fatal,
    Panic,
}

/// Image fetcher answering from a script, then with [`JPEG`]
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Fetch>>,
    per_url: Mutex<HashMap<String, Fetch>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, step: Fetch) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn on(self, url: &str, step: Fetch) -> Self {
        self.per_url.lock().unwrap().insert(url.to_string(), step);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageFetcher for ScriptedFetcher {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(url.to_string());
        let step = self
            .per_url
            .lock()
            .unwrap()
            .remove(url)
            .or_else(|| self.script.lock().unwrap().pop_front());

        match step {
            None => Ok(JPEG.to_vec()),
            Some(Fetch::Bytes(bytes)) => Ok(bytes),
            Some(Fetch::NetworkError) => Err(HarvestError::network(format!("connection reset: {}", url))),
            Some(Fetch::Corrupt) => Err(HarvestError::image(format!("undecodable image: {}", url))),
            Some(Fetch::Fatal) => Err(HarvestError::fatal("disk full")),
            Some(Fetch::Panic) => panic!("simulated crash fetching {}", url),
        }
    }
}

#[derive(Default)]
pub struct MemoryImageStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn save(&self, bytes: &[u8], filename: &str) -> Result<PathBuf> {
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
        Ok(PathBuf::from("/memory").join(filename))
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    rows: Mutex<HashMap<(String, String), (NormalizedArtwork, PathBuf, Option<String>)>>,
    crash_after: Mutex<Option<String>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panic right after the row for `id` has been written
    pub fn crash_after_upsert(self, id: &str) -> Self {
        *self.crash_after.lock().unwrap() = Some(id.to_string());
        self
    }

    pub fn insert(&self, museum_code: &str, art: NormalizedArtwork) {
        self.rows.lock().unwrap().insert(
            (museum_code.to_string(), art.id.clone()),
            (art, PathBuf::new(), None),
        );
    }

    pub fn checksum(&self, museum_code: &str, id: &str) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .get(&(museum_code.to_string(), id.to_string()))
            .and_then(|(_, _, checksum)| checksum.clone())
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl ArtworkRepository for MemoryRepository {
    async fn upsert_artwork(
        &self,
        record: &NormalizedArtwork,
        museum_code: &str,
        image_path: &Path,
        checksum: Option<&str>,
    ) -> Result<()> {
        self.rows.lock().unwrap().insert(
            (museum_code.to_string(), record.id.clone()),
            (record.clone(), image_path.to_path_buf(), checksum.map(str::to_string)),
        );
        if self.crash_after.lock().unwrap().as_deref() == Some(record.id.as_str()) {
            panic!("simulated crash after storing {}", record.id);
        }
        Ok(())
    }

    async fn exists(&self, museum_code: &str, original_id: &str) -> Result<bool> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .contains_key(&(museum_code.to_string(), original_id.to_string())))
    }

    async fn count(&self, museum_code: &str) -> Result<u64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(code, _)| code == museum_code)
            .count() as u64)
    }

    async fn delete_source(&self, museum_code: &str) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|(code, _), _| code != museum_code);
        Ok((before - rows.len()) as u64)
    }

    async fn clear(&self) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let removed = rows.len() as u64;
        rows.clear();
        Ok(removed)
    }
}

/// Cancels a token once `after` items have succeeded
pub struct CancelAfter {
    pub token: CancellationToken,
    pub after: usize,
    seen: AtomicUsize,
    inner: MemoryObserver,
}

impl CancelAfter {
    pub fn new(token: CancellationToken, after: usize) -> Self {
        Self {
            token,
            after,
            seen: AtomicUsize::new(0),
            inner: MemoryObserver::new(),
        }
    }

    pub fn events(&self) -> &MemoryObserver {
        &self.inner
    }
}

impl RunObserver for CancelAfter {
    fn on_event(&self, event: &RunEvent) {
        self.inner.on_event(event);
        if let RunEvent::Item { outcome: Outcome::Success, .. } = event {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.token.cancel();
            }
        }
    }
}

/// Fakes bundled with handles for assertions
pub struct Harness {
    pub fetcher: Arc<ScriptedFetcher>,
    pub store: Arc<MemoryImageStore>,
    pub repository: Arc<MemoryRepository>,
    pub observer: Arc<MemoryObserver>,
}

impl Harness {
    pub fn new(fetcher: ScriptedFetcher) -> Self {
        Self::with_repository(fetcher, MemoryRepository::new())
    }

    pub fn with_repository(fetcher: ScriptedFetcher, repository: MemoryRepository) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            store: Arc::new(MemoryImageStore::new()),
            repository: Arc::new(repository),
            observer: Arc::new(MemoryObserver::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            repository: self.repository.clone(),
            observer: self.observer.clone(),
        }
    }
}
