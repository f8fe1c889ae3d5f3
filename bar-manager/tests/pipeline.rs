//! End-to-end pipeline tests
//!
//! Drive the scheduler against a scripted exchange and an in-memory store,
//! then read the result back through the rolling cache and its snapshots.

use chrono::{DateTime, Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use bar_common::Timeframe;
use bar_manager::backfill::{IngestMode, IngestStrategy};
use bar_manager::cache::{MarketCache, SnapshotManager};
use bar_manager::provider::mock::MockKlineSource;
use bar_manager::provider::{BarFetcher, ProviderError, RateController, RawKline, RawOpenInterest};
use bar_manager::scheduler::{IngestScheduler, SchedulerConfig};
use bar_manager::storage::InMemoryBarStore;

const TF: Timeframe = Timeframe::FiveMinutes;

fn base() -> DateTime<Utc> {
    let start = Utc::now() - Duration::days(1);
    start - Duration::seconds(start.timestamp() % 300)
}

fn at(base: DateTime<Utc>, i: i64) -> DateTime<Utc> {
    base + Duration::minutes(5 * i)
}

fn series(base: DateTime<Utc>, count: i64) -> Vec<RawKline> {
    (0..count)
        .map(|i| RawKline {
            open_time: at(base, i),
            open: dec!(100),
            high: dec!(102),
            low: dec!(99),
            close: dec!(101),
            volume: dec!(7),
            turnover: dec!(707),
        })
        .collect()
}

fn build(
    source: Arc<MockKlineSource>,
    store: Arc<InMemoryBarStore>,
) -> (IngestScheduler, Arc<RateController>) {
    let rate = Arc::new(RateController::new(
        5,
        std::time::Duration::from_millis(10),
        std::time::Duration::from_secs(1),
        std::time::Duration::from_secs(60),
    ));
    let fetcher = Arc::new(BarFetcher::new(source, Arc::clone(&rate)));
    let strategy = Arc::new(IngestStrategy::new(fetcher));
    let config = SchedulerConfig {
        batch_size: 20,
        workers: 5,
        batch_delay: std::time::Duration::ZERO,
        crash_cooldown: std::time::Duration::from_secs(120),
        retention_days: 180,
    };
    let scheduler = IngestScheduler::new(strategy, store, config)
        .with_symbols(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    (scheduler, rate)
}

#[tokio::test(start_paused = true)]
async fn test_ingest_then_cache_then_snapshot() {
    let b = base();
    let source = Arc::new(MockKlineSource::new());
    source.set_series("BTCUSDT", series(b, 12));
    source.set_series("ETHUSDT", series(b, 12));
    source.push_klines_for(
        "BTCUSDT",
        Err(ProviderError::RateLimit("Too many visits!".to_string())),
    );
    source.push_open_interest(Ok(vec![RawOpenInterest {
        time: at(b, 0),
        open_interest: dec!(5000),
    }]));

    let store = Arc::new(InMemoryBarStore::new());
    let (scheduler, rate) = build(Arc::clone(&source), Arc::clone(&store));
    let cancel = CancellationToken::new();

    // Backfill, with one rate-limited call retried after the cooldown
    let floor = Utc::now() - Duration::days(2);
    let summary = scheduler
        .run_once(TF, IngestMode::Backfill { floor }, false, &cancel)
        .await
        .unwrap();
    assert_eq!(summary.records, 24);
    assert_eq!(summary.errors, 0);
    assert!(rate.current_delay() > std::time::Duration::from_millis(10));

    let rows = store.rows(TF);
    assert_eq!(rows.len(), 24);
    assert_eq!(rows.iter().filter(|b| b.open_interest.is_some()).count(), 12);

    // Warm the cache from the store
    let dir = TempDir::new().unwrap();
    let cache = MarketCache::new(store.clone(), SnapshotManager::new(dir.path()), 10);
    cache.warm(&[TF], None).await.unwrap();
    assert_eq!(cache.get(TF).len(), 20);

    // New bars on the exchange reach the store, then the cache
    source.set_series("BTCUSDT", series(b, 14));
    let summary = scheduler
        .run_once(TF, IngestMode::Incremental, false, &cancel)
        .await
        .unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(cache.refresh(&[TF]).await.unwrap(), 2);

    let table = cache.get(TF);
    assert_eq!(table.max_time("BTCUSDT"), Some(at(b, 13)));
    assert_eq!(table.rows_for("BTCUSDT").len(), 10);
    assert_eq!(table.max_time("ETHUSDT"), Some(at(b, 11)));

    // A fresh process primes the same table from disk
    cache.save_snapshot(&[TF]).await.unwrap();
    let restarted = MarketCache::new(
        Arc::new(InMemoryBarStore::new()),
        SnapshotManager::new(dir.path()),
        10,
    );
    assert_eq!(restarted.prime_cache_from_snapshot(&[TF]).await, 1);
    assert_eq!(*restarted.get(TF), *table);
}

#[tokio::test]
async fn test_repeated_backfill_is_idempotent() {
    let b = base();
    let source = Arc::new(MockKlineSource::new());
    source.set_series("BTCUSDT", series(b, 30));
    source.set_series("ETHUSDT", series(b, 5));
    let store = Arc::new(InMemoryBarStore::new());
    let (scheduler, _) = build(source, Arc::clone(&store));
    let cancel = CancellationToken::new();
    let floor = Utc::now() - Duration::days(2);

    scheduler
        .run_once(TF, IngestMode::Backfill { floor }, false, &cancel)
        .await
        .unwrap();
    let first = store.rows(TF);

    scheduler
        .run_once(TF, IngestMode::Backfill { floor }, false, &cancel)
        .await
        .unwrap();

    assert_eq!(first.len(), 35);
    assert_eq!(store.rows(TF), first);
}
