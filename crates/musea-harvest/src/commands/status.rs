//! `musea-harvest status` command implementation

use colored::Colorize;

use crate::config::HarvestConfig;
use crate::error::Result;
use crate::harvester::source_status;
use crate::model::SourceCode;

/// Print tracker statistics for one source or all of them
pub fn run(config: &HarvestConfig, source: Option<SourceCode>) -> Result<()> {
    let codes = match source {
        Some(code) => vec![code],
        None => SourceCode::ALL.to_vec(),
    };

    println!("{}", "Harvest Progress:".cyan().bold());
    println!("  Data dir: {}", config.data_dir.display());

    for code in codes {
        println!();
        println!("{}", source_status(config, code));
    }
    Ok(())
}
