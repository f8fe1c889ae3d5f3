//! History range command

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{connect_with_retry, parse_timeframe};
use crate::cache::{CacheResult, HistoryLoader, MarketCache};
use crate::config::Settings;
use bar_common::{Bar, Timeframe};

/// Arguments for the history command
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Timeframe to read (5m, 15m, 1h, 4h)
    #[arg(long = "tf", value_parser = parse_timeframe)]
    pub timeframe: Timeframe,

    /// Range start, RFC 3339
    #[arg(long)]
    pub start: DateTime<Utc>,

    /// Range end, RFC 3339. Defaults to now
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,

    /// Restrict to these symbols (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

/// Execute the history command, writing one JSON bar per line to stdout
pub async fn execute(args: HistoryArgs, settings: Settings, cancel: CancellationToken) -> Result<()> {
    let cooldown = Duration::from_secs(settings.ingest.crash_cooldown_secs);
    let Some(repository) = connect_with_retry(&settings, cooldown, &cancel).await else {
        info!("Shutdown before database connection");
        return Ok(());
    };

    let cache = MarketCache::from_settings(Arc::new(repository), &settings.cache);
    let loader = cache.history_loader(settings.cache.history_lru_capacity);

    let bars = read_range(&loader, &args).await?;
    write_json_lines(&bars, std::io::stdout().lock())?;

    info!(timeframe = %args.timeframe, rows = bars.len(), "History range written");
    Ok(())
}

async fn read_range(loader: &HistoryLoader, args: &HistoryArgs) -> CacheResult<Vec<Bar>> {
    let end = args.end.unwrap_or_else(Utc::now);
    let symbols = (!args.symbols.is_empty()).then_some(args.symbols.as_slice());
    loader
        .fetch_range(args.timeframe, args.start, end, symbols)
        .await
}

fn write_json_lines<W: Write>(bars: &[Bar], mut out: W) -> Result<()> {
    for bar in bars {
        serde_json::to_writer(&mut out, bar)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotManager;
    use crate::storage::{BarSink, InMemoryBarStore};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    const TF: Timeframe = Timeframe::FourHours;

    fn bar(symbol: &str, hour: u32) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            time: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            open: dec!(1),
            high: dec!(2),
            low: dec!(1),
            close: dec!(1.5),
            volume: dec!(3),
            open_interest: None,
        }
    }

    fn args(symbols: &[&str]) -> HistoryArgs {
        HistoryArgs {
            timeframe: TF,
            start: Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap(),
            end: Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_read_range_filters_time_and_symbols() {
        let store = Arc::new(InMemoryBarStore::new());
        let bars: Vec<Bar> = [0, 4, 8, 12]
            .into_iter()
            .flat_map(|h| [bar("BTCUSDT", h), bar("ETHUSDT", h)])
            .collect();
        store.upsert(TF, &bars).await.unwrap();
        let dir = TempDir::new().unwrap();
        let cache = MarketCache::new(store, SnapshotManager::new(dir.path()), 10);
        let loader = cache.history_loader(4);

        let all = read_range(&loader, &args(&[])).await.unwrap();
        assert_eq!(all.len(), 4);

        let eth = read_range(&loader, &args(&["ETHUSDT"])).await.unwrap();
        assert_eq!(eth, vec![bar("ETHUSDT", 4), bar("ETHUSDT", 8)]);
    }

    #[test]
    fn test_write_json_lines() {
        let mut out = Vec::new();
        write_json_lines(&[bar("BTCUSDT", 0), bar("BTCUSDT", 4)], &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Bar = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, bar("BTCUSDT", 4));
    }
}
