//! End-of-run reporting

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::model::SourceCode;

/// How a source run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Completed,
    /// Circuit breaker tripped
    Aborted { reason: String },
    /// Cancelled from outside (Ctrl-C)
    Interrupted,
    /// Fatal error or panic; propagated to the caller
    Failed { error: String },
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            RunState::Completed => "completed",
            RunState::Aborted { .. } => "aborted",
            RunState::Interrupted => "interrupted",
            RunState::Failed { .. } => "failed",
        }
    }
}

/// Counters for the current run only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub listing_errors: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub source: SourceCode,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Cumulative, from the progress tracker
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// successful / (successful + failed); skips are excluded
    pub success_rate: f64,

    pub run: RunCounters,
    pub total_bytes: u64,
    pub average_item_bytes: u64,

    /// Error-log entries per category
    pub error_breakdown: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} run {} ({})", self.source, self.state.label(), self.run_id)?;
        if let RunState::Aborted { reason } | RunState::Failed { error: reason } = &self.state {
            writeln!(f, "  reason:          {}", reason)?;
        }
        writeln!(f, "  processed:       {}", self.total_processed)?;
        writeln!(f, "  successful:      {}", self.successful)?;
        writeln!(f, "  failed:          {}", self.failed)?;
        writeln!(f, "  skipped:         {}", self.skipped)?;
        writeln!(f, "  success rate:    {:.1}%", self.success_rate * 100.0)?;
        writeln!(
            f,
            "  this run:        {} downloaded, {} failed, {} skipped",
            self.run.downloaded, self.run.failed, self.run.skipped
        )?;
        writeln!(f, "  downloaded:      {}", format_bytes(self.total_bytes))?;
        writeln!(f, "  average item:    {}", format_bytes(self.average_item_bytes))?;
        for (category, count) in &self.error_breakdown {
            writeln!(f, "  {:<16} {}", format!("{}:", category), count)?;
        }
        write!(f, "  duration:        {}s", self.duration_secs())
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
