//! `musea-harvest reset` command implementation

use colored::Colorize;
use std::io::{self, Write};

use crate::config::HarvestConfig;
use crate::error::{ErrorCategory, Result};
use crate::harvester::{Harvester, ResetReport};
use crate::model::SourceCode;
use crate::progress::Requeue;

/// Reset one source or all of them, asking first unless `force` is set
pub async fn run(
    config: HarvestConfig,
    source: Option<SourceCode>,
    failed_only: bool,
    category: Option<ErrorCategory>,
    force: bool,
) -> Result<()> {
    let requeue = match (failed_only, category) {
        (_, Some(category)) => Some(Requeue::Category(category)),
        (true, None) => Some(Requeue::Failed),
        (false, None) => None,
    };
    let names = match source {
        Some(code) => code.to_string(),
        None => "all sources".to_string(),
    };

    if !force {
        let warning = match requeue {
            Some(Requeue::Failed) => format!("Failed items of {} will be retried on the next run.", names),
            Some(Requeue::Category(category)) => format!(
                "Items of {} logged as '{}' will be retried on the next run.",
                names, category
            ),
            None => format!("This removes progress, images and metadata for: {}", names),
        };
        println!("{}", warning.yellow());
        print!("Continue? [y/N]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        let input = input.trim().to_lowercase();
        if input != "y" && input != "yes" {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    let harvester = Harvester::open(config).await?;
    match source {
        Some(code) => {
            let report = harvester.reset(code, requeue).await?;
            print_report(code, &report, requeue.is_some());
        },
        None => {
            let (reports, rows_deleted) = harvester.reset_all(requeue).await?;
            for (code, report) in &reports {
                print_report(*code, report, requeue.is_some());
            }
            if requeue.is_none() {
                println!("{} {} metadata rows deleted", "✓".green(), rows_deleted);
            }
        },
    }
    Ok(())
}

fn print_report(code: SourceCode, report: &ResetReport, requeued: bool) {
    if requeued {
        println!("{} {}: {} ids requeued", "✓".green(), code, report.forgotten);
    } else {
        println!(
            "{} {}: {} ids forgotten, {} images removed, {} rows deleted",
            "✓".green(),
            code,
            report.forgotten,
            report.images_removed,
            report.rows_deleted
        );
    }
}
