//! Error types for the harvester
//!
//! Every error carries an [`ErrorCategory`] so the orchestrator can file it
//! in the progress tracker's error log and decide whether it counts toward
//! the consecutive-error circuit breaker.

use musea_common::CommonError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Main error type for harvest operations
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Timeouts, refused connections, resets
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status after retries were exhausted
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Bytes that are not a usable image
    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    /// Payload missing mandatory fields or structurally unusable
    #[error("Validation error: {0}")]
    Validation(String),

    /// Fetch failure not otherwise classified
    #[error("Download error: {0}")]
    Download(String),

    /// Image or metadata could not be stored
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] CommonError),

    /// Unrecoverable condition; aborts the source run
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl HarvestError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn image(msg: impl Into<String>) -> Self {
        Self::ImageProcessing(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Category under which this error is filed in the progress log
    pub fn category(&self) -> ErrorCategory {
        match self {
            HarvestError::Network(_) => ErrorCategory::NetworkError,
            HarvestError::Http { status, .. } if *status == 429 || *status >= 500 => {
                ErrorCategory::NetworkError
            },
            HarvestError::Http { .. } | HarvestError::Download(_) => ErrorCategory::DownloadError,
            HarvestError::ImageProcessing(_) => ErrorCategory::ImageProcessingError,
            HarvestError::Validation(_) | HarvestError::Json(_) => ErrorCategory::ValidationError,
            HarvestError::Io(e) => ErrorCategory::classify(&e.to_string()),
            HarvestError::Common(e) => ErrorCategory::classify(&e.to_string()),
            HarvestError::Persistence(_)
            | HarvestError::Database(_)
            | HarvestError::Migration(_)
            | HarvestError::Config(_)
            | HarvestError::Fatal(_) => ErrorCategory::OtherError,
        }
    }

    /// Errors that end the whole source run instead of a single item
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarvestError::Fatal(_) | HarvestError::Config(_))
    }

    /// Whether this failure suggests the remote endpoint is unhealthy
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::NetworkError | ErrorCategory::DownloadError
        )
    }

    /// Status code, when the failure was an HTTP response
    pub fn status(&self) -> Option<u16> {
        match self {
            HarvestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return HarvestError::Http {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            HarvestError::Network(err.to_string())
        } else if err.is_decode() {
            HarvestError::Validation(err.to_string())
        } else {
            HarvestError::Download(err.to_string())
        }
    }
}

/// Error-log categories
///
/// `Skipped` is not an error: it marks policy-driven exclusions (not public
/// domain, no image, limits reached).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NetworkError,
    ImageProcessingError,
    ValidationError,
    DownloadError,
    Skipped,
    OtherError,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 6] = [
        ErrorCategory::NetworkError,
        ErrorCategory::ImageProcessingError,
        ErrorCategory::ValidationError,
        ErrorCategory::DownloadError,
        ErrorCategory::Skipped,
        ErrorCategory::OtherError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::ImageProcessingError => "image_processing_error",
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::DownloadError => "download_error",
            ErrorCategory::Skipped => "skipped",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Classify an opaque error message by keyword.
    ///
    /// Only used for errors that reach us as plain text; typed errors use
    /// [`HarvestError::category`].
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        if has(&["network", "timed out", "timeout", "connection", "dns"]) {
            ErrorCategory::NetworkError
        } else if has(&["image", "decode", "corrupt"]) {
            ErrorCategory::ImageProcessingError
        } else if has(&["invalid", "validation", "missing", "malformed", "parse"]) {
            ErrorCategory::ValidationError
        } else if has(&["download", "http", "status"]) {
            ErrorCategory::DownloadError
        } else {
            ErrorCategory::OtherError
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = HarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| HarvestError::config(format!("unknown error category '{}'", s)))
    }
}
