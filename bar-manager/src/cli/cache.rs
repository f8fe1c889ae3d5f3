//! Cache service command

use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{connect_with_retry, parse_timeframe};
use crate::cache::MarketCache;
use crate::config::Settings;
use bar_common::Timeframe;

/// Arguments for the cache command
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Timeframes to keep cached
    #[arg(long, value_delimiter = ',', value_parser = parse_timeframe, default_value = "5m,15m,1h,4h")]
    pub timeframes: Vec<Timeframe>,

    /// Bars kept per symbol, overriding configuration
    #[arg(long)]
    pub window: Option<usize>,

    /// Run a single refresh and snapshot cycle, then exit
    #[arg(long)]
    pub once: bool,
}

/// Cache service loop settings
#[derive(Debug, Clone)]
pub(crate) struct ServeOptions {
    pub use_snapshot: bool,
    pub interval: Duration,
    pub once: bool,
}

/// Execute the cache command
pub async fn execute(args: CacheArgs, settings: Settings, cancel: CancellationToken) -> Result<()> {
    let cooldown = Duration::from_secs(settings.ingest.crash_cooldown_secs);
    let Some(repository) = connect_with_retry(&settings, cooldown, &cancel).await else {
        info!("Shutdown before database connection");
        return Ok(());
    };

    let mut cache_settings = settings.cache.clone();
    if let Some(window) = args.window {
        cache_settings.window = window;
    }
    let cache = MarketCache::from_settings(Arc::new(repository), &cache_settings);
    let options = ServeOptions {
        use_snapshot: cache_settings.use_snapshot,
        interval: Duration::from_secs(cache_settings.refresh_interval_secs.max(1)),
        once: args.once,
    };

    serve(&cache, &args.timeframes, &options, &cancel).await;

    info!("Cache service stopped");
    Ok(())
}

/// Prime from snapshots, warm what is still cold, then refresh and save
/// snapshots every `interval` until shutdown.
///
/// Store failures never end the loop. A timeframe left empty by a failed
/// warm is warmed by the next refresh.
pub(crate) async fn serve(
    cache: &MarketCache,
    timeframes: &[Timeframe],
    options: &ServeOptions,
    cancel: &CancellationToken,
) {
    if options.use_snapshot {
        let primed = cache.prime_cache_from_snapshot(timeframes).await;
        info!(primed, "Snapshot priming finished");
    }

    let cold: Vec<Timeframe> = timeframes
        .iter()
        .copied()
        .filter(|tf| cache.get(*tf).is_empty())
        .collect();
    if !cold.is_empty() {
        if let Err(e) = cache.warm(&cold, None).await {
            warn!("Initial cache warm failed: {}; retrying on refresh", e);
        }
    }

    loop {
        match cache.refresh(timeframes).await {
            Ok(merged) => info!(merged, "Cache refreshed"),
            Err(e) => warn!("Cache refresh failed: {}", e),
        }
        match cache.save_snapshot(timeframes).await {
            Ok(files) => info!(files = files.len(), "Snapshots saved"),
            Err(e) => warn!("Snapshot save failed: {}", e),
        }

        if options.once {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(options.interval) => {}
        }
    }
}
