//! Crash-safe progress tracking
//!
//! One [`ProgressTracker`] owns one source's progress file. Every terminal
//! outcome is written through to disk before the call returns, using an
//! atomic temp-file-then-rename replace, so a crash at any point leaves
//! either the previous or the new complete document.
//!
//! The tracker is generic over a [`SourceCursor`]; the cursor is the only
//! part that differs between page, id-list and dump-file sources.

pub mod cursor;
pub mod state;

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::ErrorCategory;
use crate::model::Breadcrumb;
use musea_common::fs::write_atomic;

pub use cursor::{DumpFileCursor, ObjectCursor, PageCursor, SourceCursor};
pub use state::{ErrorLog, ProgressState, SCHEMA_VERSION};

/// Terminal outcome of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Policy exclusion; terminal but neither success nor failure
    Skipped,
    Failed(ErrorCategory),
}

impl Outcome {
    pub fn from_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Skipped => Outcome::Skipped,
            other => Outcome::Failed(other),
        }
    }

    /// Error-log category, if the outcome is logged under one
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Outcome::Success => None,
            Outcome::Skipped => Some(ErrorCategory::Skipped),
            Outcome::Failed(category) => Some(*category),
        }
    }

    pub fn label(&self) -> &'static str {
        self.category().map_or("success", |c| c.as_str())
    }
}

/// Which ids to forget so the next run retries them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Every id in `failed_ids`
    Failed,
    /// Every id filed under one error-log category
    Category(ErrorCategory),
}

/// Derived counts over the progress state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressStatistics {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Error-log entries outside the `skipped` category
    pub error_count: usize,
}

pub struct ProgressTracker<C: SourceCursor> {
    path: PathBuf,
    state: ProgressState<C>,
}

impl<C: SourceCursor> ProgressTracker<C> {
    /// Load the progress file at `path`, or start fresh.
    ///
    /// A missing or corrupt file yields an empty state that is persisted
    /// immediately. A corrupt file is copied to `<name>.corrupt` first.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tracker = Self {
            path,
            state: ProgressState::default(),
        };

        match std::fs::read(&tracker.path) {
            Ok(bytes) => match serde_json::from_slice::<ProgressState<C>>(&bytes) {
                Ok(state) => tracker.restore(state),
                Err(e) => {
                    warn!(
                        path = %tracker.path.display(),
                        error = %e,
                        "Progress file is corrupt; starting fresh"
                    );
                    tracker.back_up("corrupt");
                    tracker.save();
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %tracker.path.display(), "No progress file found; starting fresh");
                tracker.save();
            },
            Err(e) => {
                warn!(
                    path = %tracker.path.display(),
                    error = %e,
                    "Progress file is unreadable; starting fresh"
                );
                tracker.save();
            },
        }

        tracker
    }

    /// Read the progress file without creating, backing up or rewriting it.
    ///
    /// `None` when there is no file. An unreadable or corrupt file yields an
    /// empty state and a warning.
    pub fn peek(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<ProgressState<C>>(&bytes) {
                Ok(mut state) => {
                    state.repair();
                    state
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Progress file is corrupt");
                    ProgressState::default()
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Progress file is unreadable");
                ProgressState::default()
            },
        };
        Some(Self { path, state })
    }

    fn restore(&mut self, mut state: ProgressState<C>) {
        let version = state.schema_version;
        if version > SCHEMA_VERSION {
            warn!(
                path = %self.path.display(),
                version,
                supported = SCHEMA_VERSION,
                "Progress file was written by a newer version; loading best-effort"
            );
            self.back_up(&format!("v{}.bak", version));
        }

        state.repair();
        state.schema_version = SCHEMA_VERSION;
        info!(
            path = %self.path.display(),
            processed = state.processed_ids.len(),
            cursor = %state.cursor.describe(),
            "Loaded progress file"
        );
        self.state = state;
    }

    fn back_up(&self, suffix: &str) {
        let Some(name) = self.path.file_name() else {
            return;
        };
        let backup = self
            .path
            .with_file_name(format!("{}.{}", name.to_string_lossy(), suffix));
        if let Err(e) = std::fs::copy(&self.path, &backup) {
            warn!(backup = %backup.display(), error = %e, "Failed to back up progress file");
        }
    }

    /// Record a terminal outcome for `id` and persist.
    pub fn log_status(&mut self, id: &str, outcome: Outcome, detail: Option<&str>) {
        match outcome {
            Outcome::Success => {
                self.state.success_ids.insert(id.to_string());
                self.state.failed_ids.remove(id);
            },
            Outcome::Failed(_) => {
                self.state.failed_ids.insert(id.to_string());
            },
            Outcome::Skipped => {},
        }

        if let (Some(category), Some(detail)) = (outcome.category(), detail) {
            self.state
                .error_log
                .entry(category.as_str().to_string())
                .or_default()
                .insert(id.to_string(), detail.to_string());
        }

        self.state.processed_ids.insert(id.to_string());
        debug!(id, outcome = outcome.label(), "Recorded outcome");
        self.save();
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.state.processed_ids.contains(id)
    }

    /// Move the cursor forward. Held in memory until the next write.
    pub fn advance_cursor(&mut self, breadcrumb: &Breadcrumb) {
        self.state.cursor.advance(breadcrumb);
    }

    pub fn statistics(&self) -> ProgressStatistics {
        let state = &self.state;
        let skipped = state
            .processed_ids
            .iter()
            .filter(|id| !state.success_ids.contains(*id) && !state.failed_ids.contains(*id))
            .count();
        let error_count = state
            .error_log
            .iter()
            .filter(|(category, _)| category.as_str() != ErrorCategory::Skipped.as_str())
            .map(|(_, entries)| entries.len())
            .sum();

        ProgressStatistics {
            total_processed: state.processed_ids.len(),
            successful: state.success_ids.len(),
            failed: state.failed_ids.len(),
            skipped,
            error_count,
        }
    }

    /// Entry counts per error-log category
    pub fn error_breakdown(&self) -> BTreeMap<String, usize> {
        self.state
            .error_log
            .iter()
            .map(|(category, entries)| (category.clone(), entries.len()))
            .collect()
    }

    /// Forget everything and persist an empty state.
    pub fn clear(&mut self) {
        self.state = ProgressState::default();
        info!(path = %self.path.display(), "Cleared progress");
        self.save();
    }

    /// Forget the selected ids so the next run retries them.
    ///
    /// The cursor is rewound as well: requeued ids may sit behind it, and
    /// resumption falls back to filtering by `processed_ids`.
    pub fn requeue(&mut self, filter: Requeue) -> usize {
        let ids: HashSet<String> = match filter {
            Requeue::Failed => self.state.failed_ids.clone(),
            Requeue::Category(category) => self
                .state
                .error_log
                .get(category.as_str())
                .map(|entries| entries.keys().cloned().collect())
                .unwrap_or_default(),
        };
        if ids.is_empty() {
            return 0;
        }

        let state = &mut self.state;
        state.processed_ids.retain(|id| !ids.contains(id));
        state.failed_ids.retain(|id| !ids.contains(id));
        for entries in state.error_log.values_mut() {
            entries.retain(|id, _| !ids.contains(id));
        }
        state.error_log.retain(|_, entries| !entries.is_empty());
        state.cursor = C::default();

        info!(path = %self.path.display(), requeued = ids.len(), "Requeued ids");
        self.save();
        ids.len()
    }

    /// Persist the full state. Failures are logged, never raised.
    pub fn save(&mut self) -> bool {
        self.state.updated_at = Some(Utc::now());
        let result = serde_json::to_vec_pretty(&self.state)
            .map_err(musea_common::CommonError::from)
            .and_then(|bytes| write_atomic(&self.path, &bytes));

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to persist progress");
                false
            },
        }
    }

    /// Persist through a caller-supplied writer (fault injection in tests)
    #[cfg(test)]
    fn save_with<F>(&mut self, write: F) -> musea_common::Result<()>
    where
        F: FnOnce(&mut std::fs::File, &[u8]) -> std::io::Result<()>,
    {
        let bytes = serde_json::to_vec_pretty(&self.state)?;
        musea_common::fs::write_atomic_with(&self.path, |file| write(file, &bytes))
    }

    pub fn cursor(&self) -> &C {
        &self.state.cursor
    }

    pub fn processed_ids(&self) -> &HashSet<String> {
        &self.state.processed_ids
    }

    pub fn success_ids(&self) -> &HashSet<String> {
        &self.state.success_ids
    }

    pub fn failed_ids(&self) -> &HashSet<String> {
        &self.state.failed_ids
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.state.error_log
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> ProgressTracker<PageCursor> {
        ProgressTracker::load(dir.path().join("progress.json"))
    }

    #[test]
    fn test_fresh_tracker_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);

        assert!(t.path().exists());
        assert_eq!(t.statistics(), ProgressStatistics::default());
    }

    #[test]
    fn test_peek_never_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        assert!(ProgressTracker::<PageCursor>::peek(&path).is_none());
        assert!(!path.exists());

        std::fs::write(&path, b"not json").unwrap();
        let peeked = ProgressTracker::<PageCursor>::peek(&path).unwrap();
        assert_eq!(peeked.statistics(), ProgressStatistics::default());
        assert_eq!(std::fs::read(&path).unwrap(), b"not json");
        assert!(!dir.path().join("progress.json.corrupt").exists());

        let mut t = tracker(&dir);
        t.log_status("7", Outcome::Success, None);
        let peeked = ProgressTracker::<PageCursor>::peek(&path).unwrap();
        assert_eq!(peeked.statistics().successful, 1);
    }

    #[test]
    fn test_outcomes_survive_reload() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.log_status("101", Outcome::Success, None);
        t.log_status("102", Outcome::Failed(ErrorCategory::NetworkError), Some("timed out"));
        t.log_status("103", Outcome::Skipped, Some("not public domain"));

        let reloaded = tracker(&dir);

        assert!(reloaded.is_processed("101"));
        assert!(reloaded.is_processed("102"));
        assert!(reloaded.is_processed("103"));
        assert!(reloaded.success_ids().contains("101"));
        assert!(reloaded.failed_ids().contains("102"));
        assert!(!reloaded.failed_ids().contains("103"));
        assert_eq!(reloaded.error_log()["network_error"]["102"], "timed out");
        assert_eq!(
            reloaded.statistics(),
            ProgressStatistics {
                total_processed: 3,
                successful: 1,
                failed: 1,
                skipped: 1,
                error_count: 1,
            }
        );
    }

    #[test]
    fn test_cursor_persists_with_next_write() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.advance_cursor(&Breadcrumb::Page { page: 5, total_pages: Some(9) });
        assert_eq!(tracker(&dir).cursor().last_page, 0);

        t.log_status("1", Outcome::Success, None);
        assert_eq!(tracker(&dir).cursor().last_page, 5);
    }

    #[test]
    fn test_corrupt_file_self_heals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, b"{\"processed_ids\": [\"1\", ").unwrap();

        let t = ProgressTracker::<PageCursor>::load(&path);

        assert_eq!(t.statistics().total_processed, 0);
        let healed: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(healed["schema_version"], SCHEMA_VERSION);
        assert!(dir.path().join("progress.json.corrupt").exists());
    }

    #[test]
    fn test_newer_schema_is_backed_up_and_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, br#"{"schema_version": 7, "processed_ids": ["9"], "future": true}"#).unwrap();

        let t = ProgressTracker::<PageCursor>::load(&path);

        assert!(t.is_processed("9"));
        assert!(dir.path().join("progress.json.v7.bak").exists());
    }

    #[test]
    fn test_fault_mid_write_keeps_previous_document() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.log_status("101", Outcome::Success, None);

        t.state.processed_ids.insert("102".into());
        let result = t.save_with(|file, bytes| {
            file.write_all(&bytes[..bytes.len() / 2])?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "power loss"))
        });
        assert!(result.is_err());

        let reloaded = tracker(&dir);
        assert!(reloaded.is_processed("101"));
        assert!(!reloaded.is_processed("102"));
    }

    #[test]
    fn test_processed_stays_processed() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.log_status("7", Outcome::Failed(ErrorCategory::DownloadError), Some("404"));
        t.log_status("8", Outcome::Success, None);
        t.log_status("7", Outcome::Success, None);

        for _ in 0..3 {
            let t = tracker(&dir);
            assert!(t.is_processed("7"));
            assert!(t.is_processed("8"));
            assert!(!t.failed_ids().contains("7"));
        }
    }

    #[test]
    fn test_requeue_category_rewinds_cursor() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.advance_cursor(&Breadcrumb::Page { page: 3, total_pages: None });
        t.log_status("1", Outcome::Failed(ErrorCategory::NetworkError), Some("reset"));
        t.log_status("2", Outcome::Failed(ErrorCategory::ImageProcessingError), Some("bad jpeg"));
        t.log_status("3", Outcome::Success, None);

        let requeued = t.requeue(Requeue::Category(ErrorCategory::NetworkError));

        assert_eq!(requeued, 1);
        assert!(!t.is_processed("1"));
        assert!(t.is_processed("2"));
        assert!(!t.error_log().contains_key("network_error"));
        assert_eq!(t.cursor().last_page, 0);
        assert_eq!(t.requeue(Requeue::Failed), 1);
        assert!(!t.is_processed("2"));
    }

    #[test]
    fn test_clear_resets_file() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.log_status("1", Outcome::Success, None);
        t.clear();

        assert!(!tracker(&dir).is_processed("1"));
    }

    #[test]
    fn test_unwritable_location_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let mut t = ProgressTracker::<PageCursor>::load(blocker.join("progress.json"));
        t.log_status("1", Outcome::Success, None);

        assert!(t.is_processed("1"));
        assert!(!t.save());
    }
}
