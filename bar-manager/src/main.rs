//! Bar Manager CLI
//!
//! Provides commands for:
//! - `ingest`: backfill or incrementally fetch bars into the database
//! - `cache`: keep the rolling cache fresh and snapshot it
//! - `history`: print a range of bars as JSON lines
//! - `db`: database operations

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use bar_common::logging::{init_logging, LogConfig};
use bar_manager::cli::{Cli, Commands};
use bar_manager::config::Settings;
use bar_manager::shutdown::spawn_signal_listener;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_logging(LogConfig::from_env().verbose(cli.debug))
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))?;

    let settings = Settings::load()?;

    let cancel = CancellationToken::new();
    let listener = spawn_signal_listener(cancel.clone());

    // Execute command
    let result = match cli.command {
        Commands::Ingest(args) => {
            bar_manager::cli::ingest::execute(args, settings, cancel.clone()).await
        }
        Commands::Cache(args) => {
            bar_manager::cli::cache::execute(args, settings, cancel.clone()).await
        }
        Commands::History(args) => {
            bar_manager::cli::history::execute(args, settings, cancel.clone()).await
        }
        Commands::Db(cmd) => bar_manager::cli::db::execute(cmd, settings).await,
    };

    cancel.cancel();
    listener.await.ok();
    result
}
