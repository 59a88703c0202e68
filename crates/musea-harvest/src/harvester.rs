//! Wires configured sources to their adapters and runs them side by side
//!
//! Each source owns its tracker, rate limit and candidate cache, so sources
//! run concurrently with no shared mutable state apart from the metadata
//! repository (which is keyed by museum code).

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::http::HttpClient;
use crate::model::SourceCode;
use crate::observer::{RunObserver, TracingObserver};
use crate::orchestrator::{panic_message, Collaborators, Orchestrator};
use crate::progress::{
    DumpFileCursor, ObjectCursor, PageCursor, ProgressStatistics, ProgressTracker, Requeue,
    SourceCursor,
};
use crate::sources::{
    AicAdapter, CandidateCache, CmaDumpAdapter, CmaListing, CollectionQuery, IdListAdapter,
    MetListing, SourceAdapter,
};
use crate::storage::{ArtworkRepository, FsImageStore, SqliteArtworkRepository};
use crate::summary::RunSummary;

/// Outcome of one source run
#[derive(Debug)]
pub struct SourceReport {
    pub source: SourceCode,
    pub result: Result<RunSummary>,
}

impl SourceReport {
    pub fn is_fatal(&self) -> bool {
        self.result.is_err()
    }
}

/// Snapshot of a source's progress file
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: SourceCode,
    pub enabled: bool,
    pub started: bool,
    pub statistics: ProgressStatistics,
    pub error_breakdown: BTreeMap<String, usize>,
    pub cursor: String,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled = if self.enabled { "enabled" } else { "disabled" };
        writeln!(f, "{} ({}, {})", self.source, self.source.museum_name(), enabled)?;
        if !self.started {
            return write!(f, "  not started");
        }
        let stats = &self.statistics;
        writeln!(f, "  processed:  {}", stats.total_processed)?;
        writeln!(f, "  successful: {}", stats.successful)?;
        writeln!(f, "  failed:     {}", stats.failed)?;
        writeln!(f, "  skipped:    {}", stats.skipped)?;
        for (category, count) in &self.error_breakdown {
            writeln!(f, "    {}: {}", category, count)?;
        }
        write!(f, "  position:   {}", self.cursor)
    }
}

/// What a reset removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    /// Ids forgotten by the tracker
    pub forgotten: usize,
    pub rows_deleted: u64,
    pub images_removed: usize,
}

pub struct Harvester {
    config: HarvestConfig,
    repository: Arc<dyn ArtworkRepository>,
    observer: Arc<dyn RunObserver>,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(
        config: HarvestConfig,
        repository: Arc<dyn ArtworkRepository>,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            config,
            repository,
            observer,
            cancel: CancellationToken::new(),
        }
    }

    /// Open the configured SQLite repository and log through `tracing`
    pub async fn open(config: HarvestConfig) -> Result<Self> {
        let repository = match &config.database_url {
            Some(url) => SqliteArtworkRepository::connect(url).await?,
            None => SqliteArtworkRepository::open(&config.database_path()).await?,
        };
        Ok(Self::new(config, Arc::new(repository), Arc::new(TracingObserver)))
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Run the given sources, at most `max_workers` at a time. Reports come
    /// back in source order.
    pub async fn run(&self, sources: &[SourceCode]) -> Vec<SourceReport> {
        info!(
            sources = ?sources,
            max_workers = self.config.max_workers,
            "Starting harvest"
        );

        let mut reports: Vec<SourceReport> = stream::iter(sources.iter().copied())
            .map(|source| async move {
                // A panicking source must not take its siblings' reports with it
                let result = match AssertUnwindSafe(self.run_source(source)).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(HarvestError::fatal(format!(
                        "source run panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                };
                if let Err(e) = &result {
                    warn!(source = %source, error = %e, "Source run failed");
                }
                SourceReport { source, result }
            })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        reports.sort_by_key(|report| report.source);
        reports
    }

    pub async fn run_source(&self, code: SourceCode) -> Result<RunSummary> {
        let source = self.config.source(code)?;
        let http = HttpClient::new(&source.user_agent, source.timeout(), source.max_retries)?;

        match code {
            SourceCode::Aic => {
                let image_base = source.image_base_url.clone().unwrap_or_default();
                let adapter = AicAdapter::new(http.clone(), &source.base_url, image_base);
                self.drive(code, adapter, http).await
            },
            SourceCode::Met => {
                let adapter = IdListAdapter::new(
                    MetListing::new(http.clone(), &source.base_url),
                    self.candidate_cache(code)?,
                );
                self.drive(code, adapter, http).await
            },
            SourceCode::Cma => {
                let adapter = IdListAdapter::new(
                    CmaListing::new(http.clone(), &source.base_url),
                    self.candidate_cache(code)?,
                );
                self.drive(code, adapter, http).await
            },
            SourceCode::CmaDump => {
                let dump_dir = source.dump_dir.clone().ok_or_else(|| {
                    HarvestError::config("cma-dump: dump_dir is not configured")
                })?;
                self.drive(code, CmaDumpAdapter::new(dump_dir), http).await
            },
        }
    }

    async fn drive<A: SourceAdapter>(
        &self,
        code: SourceCode,
        adapter: A,
        http: HttpClient,
    ) -> Result<RunSummary> {
        let source = self.config.source(code)?;
        tokio::fs::create_dir_all(self.config.source_dir(code)).await?;

        let tracker = ProgressTracker::<A::Cursor>::load(self.config.progress_path(code));
        let stored = self.repository.count(code.museum_code()).await?;
        info!(
            source = %code,
            stored,
            processed = tracker.statistics().total_processed,
            "Resuming source"
        );
        let deps = Collaborators {
            fetcher: Arc::new(http),
            store: Arc::new(FsImageStore::new(self.config.images_dir(code))),
            repository: Arc::clone(&self.repository),
            observer: Arc::clone(&self.observer),
        };

        let mut orchestrator = Orchestrator::new(adapter, tracker, deps, self.config.run_policy(code)?)
            .with_query(CollectionQuery::from(source.query.clone()))
            .with_cancellation(self.cancel.clone());
        orchestrator.run().await
    }

    fn candidate_cache(&self, code: SourceCode) -> Result<CandidateCache> {
        let source = self.config.source(code)?;
        Ok(CandidateCache::new(
            self.config.candidates_path(code),
            source.candidate_cache_ttl(),
        ))
    }

    pub fn status(&self, code: SourceCode) -> SourceStatus {
        source_status(&self.config, code)
    }

    /// Forget a source's progress.
    ///
    /// With `requeue`, only the selected ids are forgotten and stored images
    /// and rows are kept. Otherwise the tracker is cleared, the candidate
    /// cache dropped, downloaded images deleted and the museum's rows
    /// removed. `cma` and `cma-dump` share the museum code `cma`, so a full
    /// reset of either removes rows written by both.
    pub async fn reset(&self, code: SourceCode, requeue: Option<Requeue>) -> Result<ResetReport> {
        if let Some(filter) = requeue {
            return Ok(self.requeue(code, filter));
        }
        let mut report = self.forget(code).await?;
        report.rows_deleted = self.repository.delete_source(code.museum_code()).await?;

        info!(
            source = %code,
            forgotten = report.forgotten,
            images_removed = report.images_removed,
            rows_deleted = report.rows_deleted,
            "Source reset"
        );
        Ok(report)
    }

    /// Reset every source. A full reset empties the whole repository,
    /// including rows of museums no longer configured; the deleted row
    /// count is returned alongside the per-source reports.
    pub async fn reset_all(&self, requeue: Option<Requeue>) -> Result<(Vec<(SourceCode, ResetReport)>, u64)> {
        let mut reports = Vec::with_capacity(SourceCode::ALL.len());
        if let Some(filter) = requeue {
            for code in SourceCode::ALL {
                reports.push((code, self.requeue(code, filter)));
            }
            return Ok((reports, 0));
        }

        for code in SourceCode::ALL {
            reports.push((code, self.forget(code).await?));
        }
        let rows_deleted = self.repository.clear().await?;
        info!(rows_deleted, "Repository cleared");
        Ok((reports, rows_deleted))
    }

    fn requeue(&self, code: SourceCode, filter: Requeue) -> ResetReport {
        let forgotten = with_tracker(&self.config.progress_path(code), code, |path| match code {
            SourceCode::Aic => requeue_tracker::<PageCursor>(path, filter),
            SourceCode::Met | SourceCode::Cma => requeue_tracker::<ObjectCursor>(path, filter),
            SourceCode::CmaDump => requeue_tracker::<DumpFileCursor>(path, filter),
        });
        info!(source = %code, requeued = forgotten, filter = ?filter, "Ids requeued");
        ResetReport {
            forgotten,
            ..ResetReport::default()
        }
    }

    /// Clear tracker, candidate cache and images; rows are left to the caller
    async fn forget(&self, code: SourceCode) -> Result<ResetReport> {
        let forgotten = with_tracker(&self.config.progress_path(code), code, |path| match code {
            SourceCode::Aic => clear_tracker::<PageCursor>(path),
            SourceCode::Met | SourceCode::Cma => clear_tracker::<ObjectCursor>(path),
            SourceCode::CmaDump => clear_tracker::<DumpFileCursor>(path),
        });
        CandidateCache::new(self.config.candidates_path(code), std::time::Duration::ZERO).invalidate()?;
        let images_removed = FsImageStore::new(self.config.images_dir(code)).purge().await?;
        Ok(ResetReport {
            forgotten,
            rows_deleted: 0,
            images_removed,
        })
    }
}

/// Progress snapshot read from the source's progress file. Never writes to
/// the source directory.
pub fn source_status(config: &HarvestConfig, code: SourceCode) -> SourceStatus {
    let path = config.progress_path(code);
    let enabled = config.source(code).map(|s| s.enabled).unwrap_or(false);
    match code {
        SourceCode::Aic => status_of::<PageCursor>(code, enabled, &path),
        SourceCode::Met | SourceCode::Cma => status_of::<ObjectCursor>(code, enabled, &path),
        SourceCode::CmaDump => status_of::<DumpFileCursor>(code, enabled, &path),
    }
}

fn status_of<C: SourceCursor>(source: SourceCode, enabled: bool, path: &Path) -> SourceStatus {
    match ProgressTracker::<C>::peek(path) {
        Some(tracker) => SourceStatus {
            source,
            enabled,
            started: true,
            statistics: tracker.statistics(),
            error_breakdown: tracker.error_breakdown(),
            cursor: tracker.cursor().describe(),
        },
        None => SourceStatus {
            source,
            enabled,
            started: false,
            statistics: ProgressStatistics::default(),
            error_breakdown: BTreeMap::new(),
            cursor: C::default().describe(),
        },
    }
}

/// Run `f` when the source has a progress file; 0 otherwise
fn with_tracker(path: &Path, code: SourceCode, f: impl FnOnce(&Path) -> usize) -> usize {
    if path.exists() {
        f(path)
    } else {
        debug!(source = %code, "No progress file");
        0
    }
}

fn requeue_tracker<C: SourceCursor>(path: &Path, filter: Requeue) -> usize {
    ProgressTracker::<C>::load(path).requeue(filter)
}

fn clear_tracker<C: SourceCursor>(path: &Path) -> usize {
    let mut tracker = ProgressTracker::<C>::load(path);
    let forgotten = tracker.processed_ids().len();
    tracker.clear();
    forgotten
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::observer::MemoryObserver;
    use crate::progress::Outcome;
    use crate::storage::SqliteArtworkRepository;
    use tempfile::TempDir;

    async fn harvester(dir: &TempDir) -> Harvester {
        let mut config = HarvestConfig::default();
        config.data_dir = dir.path().to_path_buf();
        let repository = SqliteArtworkRepository::open(&dir.path().join("test.db")).await.unwrap();
        Harvester::new(config, Arc::new(repository), Arc::new(MemoryObserver::new()))
    }

    #[tokio::test]
    async fn test_status_without_progress_file() {
        let dir = TempDir::new().unwrap();
        let harvester = harvester(&dir).await;

        let status = harvester.status(SourceCode::Met);
        assert!(!status.started);
        assert!(status.enabled);
        assert!(!harvester.config().progress_path(SourceCode::Met).exists());
        assert!(status.to_string().contains("not started"));
    }

    #[tokio::test]
    async fn test_reset_failed_only_requeues() {
        let dir = TempDir::new().unwrap();
        let harvester = harvester(&dir).await;
        let path = harvester.config().progress_path(SourceCode::Cma);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let mut tracker = ProgressTracker::<ObjectCursor>::load(&path);
        tracker.log_status("1", Outcome::Success, None);
        tracker.log_status("2", Outcome::Failed(ErrorCategory::NetworkError), Some("timeout"));
        tracker.log_status("3", Outcome::Skipped, Some("not public domain"));

        let report = harvester.reset(SourceCode::Cma, Some(Requeue::Failed)).await.unwrap();
        assert_eq!(report.forgotten, 1);

        let status = harvester.status(SourceCode::Cma);
        assert_eq!(status.statistics.total_processed, 2);
        assert_eq!(status.statistics.failed, 0);
    }

    #[tokio::test]
    async fn test_full_reset_clears_everything() {
        let dir = TempDir::new().unwrap();
        let harvester = harvester(&dir).await;
        let path = harvester.config().progress_path(SourceCode::Aic);
        let images = harvester.config().images_dir(SourceCode::Aic);
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("AIC_1_Untitled_Unknown Artist.jpg"), b"x").unwrap();

        let mut tracker = ProgressTracker::<PageCursor>::load(&path);
        tracker.log_status("1", Outcome::Success, None);

        let report = harvester.reset(SourceCode::Aic, None).await.unwrap();
        assert_eq!(report.forgotten, 1);
        assert_eq!(report.images_removed, 1);
        assert_eq!(report.rows_deleted, 0);
        assert_eq!(harvester.status(SourceCode::Aic).statistics.total_processed, 0);
    }

    #[tokio::test]
    async fn test_requeue_by_category() {
        let dir = TempDir::new().unwrap();
        let harvester = harvester(&dir).await;
        let path = harvester.config().progress_path(SourceCode::Met);

        let mut tracker = ProgressTracker::<ObjectCursor>::load(&path);
        tracker.log_status("1", Outcome::Skipped, Some("limits reached"));
        tracker.log_status("2", Outcome::Skipped, Some("not public domain"));
        tracker.log_status("3", Outcome::Failed(ErrorCategory::NetworkError), Some("timeout"));

        let report = harvester
            .reset(SourceCode::Met, Some(Requeue::Category(ErrorCategory::Skipped)))
            .await
            .unwrap();
        assert_eq!(report.forgotten, 2);

        let status = harvester.status(SourceCode::Met);
        assert_eq!(status.statistics.total_processed, 1);
        assert_eq!(status.statistics.failed, 1);
    }

    #[tokio::test]
    async fn test_reset_all_empties_repository() {
        let dir = TempDir::new().unwrap();
        let harvester = harvester(&dir).await;
        let art = crate::model::NormalizedArtwork {
            id: "7".to_string(),
            ..Default::default()
        };
        for museum in ["aic", "met", "retired"] {
            harvester
                .repository
                .upsert_artwork(&art, museum, Path::new("/tmp/7.jpg"), None)
                .await
                .unwrap();
        }
        let mut tracker = ProgressTracker::<PageCursor>::load(harvester.config().progress_path(SourceCode::Aic));
        tracker.log_status("7", Outcome::Success, None);

        let (reports, rows_deleted) = harvester.reset_all(None).await.unwrap();

        assert_eq!(rows_deleted, 3);
        assert_eq!(reports.len(), SourceCode::ALL.len());
        assert_eq!(reports[0], (SourceCode::Aic, ResetReport { forgotten: 1, ..ResetReport::default() }));
        assert_eq!(harvester.repository.count("retired").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_leaves_corrupt_file_untouched() {
        let dir = TempDir::new().unwrap();
        let harvester = harvester(&dir).await;
        let path = harvester.config().progress_path(SourceCode::Aic);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ truncated").unwrap();

        let status = harvester.status(SourceCode::Aic);

        assert!(status.started);
        assert_eq!(status.statistics.total_processed, 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"{ truncated");
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
