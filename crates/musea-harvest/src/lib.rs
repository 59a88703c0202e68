//! Musea Harvester
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable harvesting of public-domain artwork images and metadata from
//! museum open-access APIs.
//!
//! # Overview
//!
//! - **Sources**: Art Institute of Chicago (`aic`), Metropolitan Museum
//!   (`met`), Cleveland Museum of Art (`cma`, plus `cma-dump` for a local
//!   bulk export)
//! - **Normalization**: each museum's JSON is mapped onto one
//!   [`NormalizedArtwork`] record
//! - **Progress**: a crash-safe per-source [`ProgressTracker`] records every
//!   terminal outcome so interrupted runs resume without repeating work
//! - **Orchestration**: policy filters, rate limiting, download quotas and a
//!   consecutive-error circuit breaker, ending in a [`RunSummary`]
//!
//! # Example
//!
//! ```no_run
//! use musea_harvest::{HarvestConfig, Harvester, SourceCode};
//!
//! # async fn example() -> musea_harvest::Result<()> {
//! let config = HarvestConfig::load(None)?;
//! let harvester = Harvester::open(config).await?;
//! for report in harvester.run(&[SourceCode::Met]).await {
//!     if let Ok(summary) = report.result {
//!         println!("{}", summary);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod harvester;
pub mod http;
pub mod model;
pub mod naming;
pub mod normalize;
pub mod observer;
pub mod orchestrator;
pub mod progress;
pub mod sources;
pub mod storage;
pub mod summary;

// Re-export commonly used types
pub use config::{HarvestConfig, SourceConfig};
pub use error::{ErrorCategory, HarvestError, Result};
pub use harvester::{Harvester, SourceReport, SourceStatus};
pub use model::{NormalizedArtwork, SourceCode};
pub use orchestrator::{Collaborators, Orchestrator, RunPolicy};
pub use progress::{Outcome, ProgressTracker};
pub use summary::{RunState, RunSummary};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Musea - museum open-access collection harvester
#[derive(Parser, Debug)]
#[command(name = "musea-harvest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long, env = "MUSEA_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest images and metadata
    Harvest {
        /// Sources to harvest (repeatable; defaults to every enabled source)
        #[arg(short, long = "source")]
        sources: Vec<SourceCode>,

        /// Stop downloading after this many images per source
        #[arg(long)]
        max_downloads: Option<u64>,
    },

    /// Show progress per source
    Status {
        /// Only this source
        #[arg(short, long)]
        source: Option<SourceCode>,
    },

    /// Forget progress so items are harvested again
    Reset {
        /// Only this source (defaults to all)
        #[arg(short, long)]
        source: Option<SourceCode>,

        /// Requeue failed items only; keep images and metadata
        #[arg(long)]
        failed_only: bool,

        /// Requeue items logged under one error category (e.g. `skipped`)
        #[arg(long, conflicts_with = "failed_only")]
        category: Option<ErrorCategory>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}
