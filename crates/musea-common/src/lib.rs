//! Musea Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the Musea collection harvester.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Logging**: subscriber setup driven by [`logging::LogConfig`]
//! - **Checksums**: content digests for downloaded images
//! - **Atomic files**: temp-file-then-rename replacement used by every
//!   piece of persisted harvest state
//!
//! # Example
//!
//! ```no_run
//! use musea_common::fs::write_atomic;
//!
//! fn save(path: &std::path::Path) -> musea_common::Result<()> {
//!     write_atomic(path, br#"{"processed_ids": []}"#)?;
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod fs;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
