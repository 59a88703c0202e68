//! Per-source harvest loop
//!
//! For every item an adapter yields, the orchestrator applies the policy
//! filters in a fixed order (public domain, image available, download
//! quota), downloads the image, stores it under a sanitized filename,
//! upserts the metadata row, and only then records success in the progress
//! tracker. Skips and failures are recorded too, so every yielded id reaches
//! exactly one terminal outcome.
//!
//! A row that is already in the repository but unknown to the tracker was
//! stored by a run that died before recording it; it is recorded as a
//! success without downloading again.
//!
//! A run always ends with a [`RunSummary`] handed to the observer, whether
//! it completed, tripped the circuit breaker, was cancelled, or failed.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{HarvestError, Result};
use crate::model::{Breadcrumb, NormalizedArtwork};
use crate::naming::{sanitize_filename, DEFAULT_MAX_FILENAME_BYTES};
use crate::observer::{RunEvent, RunObserver};
use crate::progress::{Outcome, ProgressTracker};
use crate::sources::{CollectionQuery, Harvested, SourceAdapter};
use crate::storage::{ArtworkRepository, ImageFetcher, ImageStore};
use crate::summary::{RunCounters, RunState, RunSummary};
use musea_common::checksum::sha256_hex;

pub const SKIP_NOT_PUBLIC_DOMAIN: &str = "not public domain";
pub const SKIP_NO_IMAGE: &str = "no image available";
pub const SKIP_LIMITS_REACHED: &str = "limits reached";

pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1000;
pub const DEFAULT_ERROR_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_CONSECUTIVE_ERROR_THRESHOLD: u32 = 10;

/// Pacing, quotas and breaker settings for one source run
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Pause after each item (remote sources) or download
    pub request_delay: Duration,
    /// Pause after a failed item
    pub error_retry_delay: Duration,
    /// Consecutive network/download failures that abort the run
    pub consecutive_error_threshold: u32,
    /// Images downloaded in one run
    pub max_downloads: Option<u64>,
    /// Image bytes downloaded in one run
    pub max_storage_bytes: Option<u64>,
    pub max_filename_bytes: usize,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            error_retry_delay: Duration::from_secs(DEFAULT_ERROR_RETRY_DELAY_SECS),
            consecutive_error_threshold: DEFAULT_CONSECUTIVE_ERROR_THRESHOLD,
            max_downloads: None,
            max_storage_bytes: None,
            max_filename_bytes: DEFAULT_MAX_FILENAME_BYTES,
        }
    }
}

impl RunPolicy {
    /// No pauses; handy for tests and local dumps
    pub fn immediate() -> Self {
        Self {
            request_delay: Duration::ZERO,
            error_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Capabilities injected into an orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ImageFetcher>,
    pub store: Arc<dyn ImageStore>,
    pub repository: Arc<dyn ArtworkRepository>,
    pub observer: Arc<dyn RunObserver>,
}

enum Step {
    Continue,
    Stop(RunState),
}

pub struct Orchestrator<A: SourceAdapter> {
    adapter: A,
    tracker: ProgressTracker<A::Cursor>,
    deps: Collaborators,
    policy: RunPolicy,
    query: CollectionQuery,
    cancel: CancellationToken,
    consecutive_errors: u32,
    counters: RunCounters,
}

impl<A: SourceAdapter> Orchestrator<A> {
    pub fn new(
        adapter: A,
        tracker: ProgressTracker<A::Cursor>,
        deps: Collaborators,
        policy: RunPolicy,
    ) -> Self {
        Self {
            adapter,
            tracker,
            deps,
            policy,
            query: CollectionQuery::default(),
            cancel: CancellationToken::new(),
            consecutive_errors: 0,
            counters: RunCounters::default(),
        }
    }

    pub fn with_query(mut self, query: CollectionQuery) -> Self {
        self.query = query;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tracker(&self) -> &ProgressTracker<A::Cursor> {
        &self.tracker
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Harvest until the source is exhausted, the breaker trips, or the run
    /// is cancelled.
    ///
    /// The summary is emitted to the observer on every exit path. Fatal
    /// errors are returned after the summary; panics are resumed after it.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let source = self.adapter.source();
        self.consecutive_errors = 0;
        self.counters = RunCounters::default();

        self.deps
            .observer
            .on_event(&RunEvent::Started { source, run_id });

        let outcome = AssertUnwindSafe(self.drive()).catch_unwind().await;

        let (state, failure, panic) = match outcome {
            Ok(Ok(state)) => (state, None, None),
            Ok(Err(e)) => {
                error!(source = %source, error = %e, "Run failed");
                (RunState::Failed { error: e.to_string() }, Some(e), None)
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(source = %source, panic = %message, "Run panicked");
                (RunState::Failed { error: message }, None, Some(payload))
            },
        };

        self.tracker.save();

        let stats = self.tracker.statistics();
        let rated = stats.successful + stats.failed;
        let summary = RunSummary {
            run_id,
            source,
            state,
            started_at,
            finished_at: Utc::now(),
            total_processed: stats.total_processed,
            successful: stats.successful,
            failed: stats.failed,
            skipped: stats.skipped,
            success_rate: if rated == 0 {
                0.0
            } else {
                stats.successful as f64 / rated as f64
            },
            run: self.counters,
            total_bytes: self.counters.bytes,
            average_item_bytes: self.counters.bytes.checked_div(self.counters.downloaded).unwrap_or(0),
            error_breakdown: self.tracker.error_breakdown(),
        };
        self.deps.observer.on_event(&RunEvent::Finished(summary.clone()));

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn drive(&mut self) -> Result<RunState> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunState::Interrupted);
            }
            match self.adapter.iter_collection(&self.query, &mut self.tracker).await {
                Ok(()) => break,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if let Some(state) = self.listing_failed(e).await {
                        return Ok(state);
                    }
                },
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                info!(source = %self.adapter.source(), "Cancellation requested");
                return Ok(RunState::Interrupted);
            }

            let next = match self.adapter.next_artwork(&mut self.tracker).await {
                Ok(next) => next,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if let Some(state) = self.listing_failed(e).await {
                        return Ok(state);
                    }
                    continue;
                },
            };

            let step = match next {
                None => {
                    info!(source = %self.adapter.source(), "Collection exhausted");
                    return Ok(RunState::Completed);
                },
                Some(Harvested::Record(art)) => self.process(art).await?,
                Some(Harvested::Failed { id, error, breadcrumb }) => {
                    self.item_failed(&id, breadcrumb.as_ref(), error).await?
                },
            };

            if let Step::Stop(state) = step {
                return Ok(state);
            }
        }
    }

    async fn process(&mut self, art: NormalizedArtwork) -> Result<Step> {
        let id = art.id.clone();
        let breadcrumb = art.breadcrumb.clone();
        let source = self.adapter.source();
        let museum_code = source.museum_code();

        if self.tracker.is_processed(&id) {
            debug!(source = %source, id = %id, "Already processed");
            return Ok(Step::Continue);
        }

        match self.deps.repository.exists(museum_code, &id).await {
            Ok(true) => return Ok(self.recover_stored(&id, breadcrumb.as_ref()).await),
            Ok(false) => {},
            Err(e) => return self.item_failed(&id, breadcrumb.as_ref(), e).await,
        }

        if !art.is_public_domain {
            return Ok(self.skip(&id, breadcrumb.as_ref(), SKIP_NOT_PUBLIC_DOMAIN, false).await);
        }

        let Some(url) = art.image.as_ref().and_then(|r| self.adapter.image_url(r)) else {
            return Ok(self.skip(&id, breadcrumb.as_ref(), SKIP_NO_IMAGE, false).await);
        };

        if let Some(max) = self.policy.max_downloads {
            if self.counters.downloaded >= max {
                return Ok(self.skip(&id, breadcrumb.as_ref(), SKIP_LIMITS_REACHED, false).await);
            }
        }

        let bytes = match self.deps.fetcher.fetch_image(&url).await {
            Ok(bytes) => bytes,
            Err(e) => return self.item_failed(&id, breadcrumb.as_ref(), e).await,
        };
        let size = bytes.len() as u64;

        if let Some(max) = self.policy.max_storage_bytes {
            if self.counters.bytes + size > max {
                info!(
                    source = %source,
                    id = %id,
                    size,
                    used = self.counters.bytes,
                    max,
                    "Storage quota would be exceeded"
                );
                return Ok(self.skip(&id, breadcrumb.as_ref(), SKIP_LIMITS_REACHED, true).await);
            }
        }

        let filename = sanitize_filename(
            &format!("{}_{}", source.file_prefix(), id),
            &art.title,
            &art.artist,
            self.policy.max_filename_bytes,
        );
        let path = match self.deps.store.save(&bytes, &filename).await {
            Ok(path) => path,
            Err(e) => return self.item_failed(&id, breadcrumb.as_ref(), e).await,
        };

        let checksum = sha256_hex(&bytes);
        if let Err(e) = self
            .deps
            .repository
            .upsert_artwork(&art, museum_code, &path, Some(&checksum))
            .await
        {
            return self.item_failed(&id, breadcrumb.as_ref(), e).await;
        }

        if let Some(breadcrumb) = &breadcrumb {
            self.tracker.advance_cursor(breadcrumb);
        }
        self.tracker.log_status(&id, Outcome::Success, None);
        self.counters.downloaded += 1;
        self.counters.bytes += size;
        self.consecutive_errors = 0;
        self.emit(&id, Outcome::Success, Some(path.display().to_string()));

        if !self.pause(self.policy.request_delay).await {
            return Ok(Step::Stop(RunState::Interrupted));
        }
        Ok(Step::Continue)
    }

    /// Record success for an item whose row outlived an interrupted run
    async fn recover_stored(&mut self, id: &str, breadcrumb: Option<&Breadcrumb>) -> Step {
        info!(source = %self.adapter.source(), id = %id, "Already stored; recording success");
        if let Some(breadcrumb) = breadcrumb {
            self.tracker.advance_cursor(breadcrumb);
        }
        self.tracker.log_status(id, Outcome::Success, None);
        self.consecutive_errors = 0;
        self.emit(id, Outcome::Success, Some("already stored".to_string()));

        if self.adapter.is_remote() && !self.pause(self.policy.request_delay).await {
            return Step::Stop(RunState::Interrupted);
        }
        Step::Continue
    }

    /// Record a policy skip. Skips neither count toward nor reset the breaker.
    async fn skip(&mut self, id: &str, breadcrumb: Option<&Breadcrumb>, reason: &str, fetched: bool) -> Step {
        if let Some(breadcrumb) = breadcrumb {
            self.tracker.advance_cursor(breadcrumb);
        }
        self.tracker.log_status(id, Outcome::Skipped, Some(reason));
        self.counters.skipped += 1;
        self.emit(id, Outcome::Skipped, Some(reason.to_string()));

        if (fetched || self.adapter.is_remote()) && !self.pause(self.policy.request_delay).await {
            return Step::Stop(RunState::Interrupted);
        }
        Step::Continue
    }

    async fn item_failed(
        &mut self,
        id: &str,
        breadcrumb: Option<&Breadcrumb>,
        error: HarvestError,
    ) -> Result<Step> {
        if error.is_fatal() {
            return Err(error);
        }

        let category = error.category();
        let message = error.to_string();
        if let Some(breadcrumb) = breadcrumb {
            self.tracker.advance_cursor(breadcrumb);
        }
        self.tracker.log_status(id, Outcome::Failed(category), Some(&message));
        self.counters.failed += 1;
        self.emit(id, Outcome::Failed(category), Some(message));

        if error.trips_breaker() {
            if let Some(state) = self.count_error() {
                return Ok(Step::Stop(state));
            }
        }

        if !self.pause(self.policy.error_retry_delay).await {
            return Ok(Step::Stop(RunState::Interrupted));
        }
        Ok(Step::Continue)
    }

    /// A listing call failed; the traversal position is unchanged and the
    /// call will be retried.
    async fn listing_failed(&mut self, error: HarvestError) -> Option<RunState> {
        self.counters.listing_errors += 1;
        warn!(
            source = %self.adapter.source(),
            error = %error,
            category = %error.category(),
            "Listing request failed"
        );

        if let Some(state) = self.count_error() {
            return Some(state);
        }
        if !self.pause(self.policy.error_retry_delay).await {
            return Some(RunState::Interrupted);
        }
        None
    }

    fn count_error(&mut self) -> Option<RunState> {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.policy.consecutive_error_threshold {
            let reason = format!("{} consecutive errors", self.consecutive_errors);
            error!(source = %self.adapter.source(), reason = %reason, "Circuit breaker tripped");
            return Some(RunState::Aborted { reason });
        }
        None
    }

    fn emit(&self, id: &str, outcome: Outcome, detail: Option<String>) {
        self.deps.observer.on_event(&RunEvent::Item {
            source: self.adapter.source(),
            id: id.to_string(),
            outcome,
            detail,
        });
    }

    /// Sleep unless cancelled first; false on cancellation
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
