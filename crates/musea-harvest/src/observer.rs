//! Run-level event sinks
//!
//! The orchestrator reports item outcomes and the final summary to an
//! injected [`RunObserver`] instead of a process-wide logger.

use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::SourceCode;
use crate::progress::Outcome;
use crate::summary::RunSummary;

#[derive(Debug, Clone)]
pub enum RunEvent {
    Started {
        source: SourceCode,
        run_id: Uuid,
    },
    Item {
        source: SourceCode,
        id: String,
        outcome: Outcome,
        detail: Option<String>,
    },
    Finished(RunSummary),
}

pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::Started { source, run_id } => {
                info!(source = %source, run_id = %run_id, "Run started");
            },
            RunEvent::Item { source, id, outcome, detail } => match outcome {
                Outcome::Success => info!(source = %source, id = %id, "Downloaded"),
                Outcome::Skipped => debug!(
                    source = %source,
                    id = %id,
                    reason = detail.as_deref().unwrap_or(""),
                    "Skipped"
                ),
                Outcome::Failed(category) => warn!(
                    source = %source,
                    id = %id,
                    category = %category,
                    error = detail.as_deref().unwrap_or(""),
                    "Item failed"
                ),
            },
            RunEvent::Finished(summary) => {
                info!(
                    source = %summary.source,
                    run_id = %summary.run_id,
                    state = summary.state.label(),
                    total_processed = summary.total_processed,
                    successful = summary.successful,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    success_rate = summary.success_rate,
                    total_bytes = summary.total_bytes,
                    average_item_bytes = summary.average_item_bytes,
                    "Run finished"
                );
                for (category, count) in &summary.error_breakdown {
                    info!(source = %summary.source, category = %category, count, "Error breakdown");
                }
            },
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Summaries of every finished run, in order
    pub fn summaries(&self) -> Vec<RunSummary> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RunEvent::Finished(summary) => Some(summary),
                _ => None,
            })
            .collect()
    }

    /// Ids reported with the given outcome
    pub fn ids_with(&self, wanted: Outcome) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RunEvent::Item { id, outcome, .. } if outcome == wanted => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl RunObserver for MemoryObserver {
    fn on_event(&self, event: &RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
