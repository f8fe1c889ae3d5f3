//! Ingest command

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Args;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{connect_with_retry, parse_timeframe};
use crate::backfill::{IngestMode, IngestStrategy};
use crate::config::Settings;
use crate::provider::bybit::BybitClient;
use crate::provider::{BarFetcher, KlineSource, RateController};
use crate::scheduler::{IngestScheduler, SchedulerConfig};
use crate::storage::{BarSink, InMemoryBarStore};
use bar_common::Timeframe;

/// Arguments for the ingest command
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Timeframe to ingest (5m, 15m, 1h, 4h)
    #[arg(long = "tf", value_parser = parse_timeframe)]
    pub timeframe: Timeframe,

    /// Backfill this many days of history instead of an incremental pass
    #[arg(long)]
    pub backfill: Option<u32>,

    /// Skip retention cleanup at the end of the run
    #[arg(long)]
    pub no_cleanup: bool,

    /// Write into memory instead of the database
    #[arg(long)]
    pub dry_run: bool,

    /// Restrict to these symbols (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

impl IngestArgs {
    /// Mode for a run starting now
    pub fn mode(&self) -> IngestMode {
        match self.backfill {
            Some(days) => IngestMode::Backfill {
                floor: Utc::now() - Duration::days(i64::from(days)),
            },
            None => IngestMode::Incremental,
        }
    }
}

/// Execute the ingest command
pub async fn execute(args: IngestArgs, settings: Settings, cancel: CancellationToken) -> Result<()> {
    let source: Arc<dyn KlineSource> = Arc::new(BybitClient::new(&settings.exchange)?);
    let rate = Arc::new(RateController::from_settings(&settings.rate));
    let fetcher = Arc::new(
        BarFetcher::new(source, rate)
            .with_quote_suffix(settings.exchange.quote_suffix.clone())
            .with_suppressed_oi_codes(settings.exchange.suppressed_oi_codes.clone()),
    );
    let strategy = Arc::new(
        IngestStrategy::new(fetcher)
            .with_page_size(settings.ingest.default_page_size)
            .with_max_loops(settings.ingest.max_backfill_loops),
    );

    let config = SchedulerConfig::from_settings(&settings.ingest);
    let sink: Arc<dyn BarSink> = if args.dry_run {
        warn!("Dry run: bars are kept in memory and discarded on exit");
        Arc::new(InMemoryBarStore::new())
    } else {
        match connect_with_retry(&settings, config.crash_cooldown, &cancel).await {
            Some(repository) => Arc::new(repository),
            None => {
                info!("Shutdown before database connection");
                return Ok(());
            }
        }
    };

    let mut scheduler = IngestScheduler::new(strategy, sink, config);
    if !args.symbols.is_empty() {
        scheduler = scheduler.with_symbols(args.symbols.clone());
    }

    info!(
        timeframe = %args.timeframe,
        mode = args.mode().label(),
        cleanup = !args.no_cleanup,
        "Starting ingest"
    );

    match scheduler
        .run_forever(args.timeframe, || args.mode(), !args.no_cleanup, &cancel)
        .await
    {
        Some(summary) => info!(
            batches = summary.batches,
            symbols = summary.symbols,
            records = summary.records,
            errors = summary.errors,
            cleaned = summary.cleaned,
            "Ingest complete"
        ),
        None => info!("Ingest stopped by shutdown"),
    }

    Ok(())
}
