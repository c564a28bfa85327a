//! tenderwatch CLI: procurement notice ingestion.
//!
//! Fetches configured public tender listings, stores new notices in a local
//! database, and reports what changed.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
