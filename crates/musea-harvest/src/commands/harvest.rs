//! `musea-harvest harvest` command implementation

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::harvester::Harvester;
use crate::model::SourceCode;
use crate::summary::RunState;

/// Harvest the selected sources (every enabled one when none are named).
///
/// Naming a disabled source enables it for this run. Returns an error when
/// any source run failed fatally.
pub async fn run(
    mut config: HarvestConfig,
    sources: Vec<SourceCode>,
    max_downloads: Option<u64>,
    cancel: CancellationToken,
) -> Result<()> {
    let selected = if sources.is_empty() {
        config.enabled_sources()
    } else {
        sources
    };
    if selected.is_empty() {
        return Err(HarvestError::config("no sources enabled"));
    }

    for code in &selected {
        let source = config.source_mut(*code);
        source.enabled = true;
        if max_downloads.is_some() {
            source.max_downloads = max_downloads;
        }
    }
    config.validate()?;

    let harvester = Harvester::open(config).await?.with_cancellation(cancel);
    let reports = harvester.run(&selected).await;

    let mut failed = 0;
    for report in &reports {
        println!();
        match &report.result {
            Ok(summary) => {
                let heading = format!("{} ({})", report.source, report.source.museum_name());
                let heading = match summary.state {
                    RunState::Completed => heading.green().bold(),
                    RunState::Interrupted => heading.yellow().bold(),
                    RunState::Aborted { .. } | RunState::Failed { .. } => heading.red().bold(),
                };
                println!("{}", heading);
                println!("{}", summary);
            },
            Err(e) => {
                failed += 1;
                println!("{} {}", report.source.to_string().red().bold(), e);
            },
        }
    }

    if failed > 0 {
        return Err(HarvestError::fatal(format!(
            "{} of {} source runs failed",
            failed,
            reports.len()
        )));
    }
    Ok(())
}
