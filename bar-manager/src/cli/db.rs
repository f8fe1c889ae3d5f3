//! Database management commands

use anyhow::Result;
use clap::Subcommand;
use tracing::info;

use crate::config::Settings;
use crate::storage::{BarRepository, Migrations};

/// Database subcommands
#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Create the per-timeframe bar tables
    Migrate,
}

/// Execute database commands
pub async fn execute(cmd: DbCommands, settings: Settings) -> Result<()> {
    match cmd {
        DbCommands::Migrate => execute_migrate(settings).await,
    }
}

async fn execute_migrate(settings: Settings) -> Result<()> {
    let pool = BarRepository::connect(&settings.database).await?;
    Migrations::new(pool).run().await?;
    info!("Migrations completed");
    Ok(())
}
