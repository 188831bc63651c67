//! PostHarvest CLI: incremental ingestion of subreddit listings into SQLite.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let settings = commands::Settings::resolve(&cli)?;
    commands::init_tracing(&cli, &settings)?;
    commands::run(cli, settings).await
}
