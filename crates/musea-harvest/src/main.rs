//! Musea Harvester - Main entry point

use anyhow::Context;
use clap::Parser;
use musea_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use musea_harvest::{commands, Cli, Commands, HarvestConfig};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("musea-harvest")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env().unwrap_or_else(|e| {
        eprintln!("Ignoring invalid logging environment: {}", e);
        LogConfig::default()
    });

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {:#}", e);
            None
        },
    };

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current item");
            token.cancel();
        }
    });

    let result = execute_command(cli, cancel).await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        drop(guard);
        process::exit(1);
    }
}

async fn execute_command(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = HarvestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Harvest {
            sources,
            max_downloads,
        } => commands::harvest::run(config, sources, max_downloads, cancel)
            .await
            .context("Harvest failed")?,

        Commands::Status { source } => commands::status::run(&config, source)?,

        Commands::Reset {
            source,
            failed_only,
            category,
            force,
        } => commands::reset::run(config, source, failed_only, category, force)
            .await
            .context("Reset failed")?,
    }
    Ok(())
}
