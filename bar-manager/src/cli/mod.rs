//! Command-line interface
//!
//! - `ingest`: fetch bars from the exchange into the database
//! - `cache`: keep the rolling cache warm and snapshot it to disk
//! - `history`: print a time range of bars, snapshot first
//! - `db`: database operations

pub mod cache;
pub mod db;
pub mod history;
pub mod ingest;

use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::Settings;
use crate::storage::{BarRepository, WriteOptions};
use bar_common::Timeframe;

/// Bar Manager CLI
#[derive(Parser, Debug)]
#[command(name = "bar-manager")]
#[command(about = "Exchange bar ingestion and rolling snapshot cache")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest bars for one timeframe
    Ingest(ingest::IngestArgs),
    /// Run the rolling cache refresh loop
    Cache(cache::CacheArgs),
    /// Print bars in a time range as JSON lines
    History(history::HistoryArgs),
    /// Database operations
    #[command(subcommand)]
    Db(db::DbCommands),
}

pub(crate) fn parse_timeframe(s: &str) -> Result<Timeframe, String> {
    s.parse().map_err(|e| format!("{e}"))
}

/// Connect to the database, retrying after `cooldown` until it succeeds.
///
/// `None` when shutdown is requested first.
pub(crate) async fn connect_with_retry(
    settings: &Settings,
    cooldown: Duration,
    cancel: &CancellationToken,
) -> Option<BarRepository> {
    let options = WriteOptions::from_settings(&settings.ingest, &settings.cache);
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match BarRepository::from_settings(&settings.database, options).await {
            Ok(repository) => return Some(repository),
            Err(e) => error!("Database unavailable: {}; retrying in {:?}", e, cooldown),
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(cooldown) => {}
        }
    }
}
