// ingest_tests.rs - Tests for the batch ingestion scheduler

use chrono::{DateTime, Duration, Utc};
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{IngestError, IngestScheduler, SchedulerConfig};
use crate::backfill::{IngestMode, IngestStrategy};
use crate::provider::mock::MockKlineSource;
use crate::provider::{BarFetcher, RateController, RawKline};
use crate::storage::{BarSink, InMemoryBarStore};
use bar_common::{Bar, Timeframe};

// ============================================================================
// Helpers
// ============================================================================

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
            open: dec!(10),
            high: dec!(11),
            low: dec!(9),
            close: dec!(10.5),
            volume: dec!(2),
            turnover: dec!(21),
        })
        .collect()
}

fn stored_bar(symbol: &str, time: DateTime<Utc>) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        time,
        open: dec!(10),
        high: dec!(11),
        low: dec!(9),
        close: dec!(10.5),
        volume: dec!(2),
        open_interest: None,
    }
}

fn config(batch_size: usize) -> SchedulerConfig {
    SchedulerConfig {
        batch_size,
        workers: 2,
        batch_delay: std::time::Duration::ZERO,
        crash_cooldown: std::time::Duration::from_secs(120),
        retention_days: 180,
    }
}

fn scheduler(
    source: Arc<MockKlineSource>,
    store: Arc<InMemoryBarStore>,
    batch_size: usize,
) -> IngestScheduler {
    scheduler_with(source, store, config(batch_size))
}

fn scheduler_with(
    source: Arc<MockKlineSource>,
    store: Arc<InMemoryBarStore>,
    config: SchedulerConfig,
) -> IngestScheduler {
    let rate = Arc::new(RateController::new(
        5,
        std::time::Duration::ZERO,
        std::time::Duration::from_secs(1),
        std::time::Duration::from_secs(60),
    ));
    let fetcher = Arc::new(BarFetcher::new(source, rate));
    let strategy = Arc::new(IngestStrategy::new(fetcher));
    IngestScheduler::new(strategy, store, config)
}

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Backfill runs
// ============================================================================

#[tokio::test]
async fn test_backfill_commits_once_per_batch() {
    let b = base();
    let source = Arc::new(MockKlineSource::new());
    for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
        source.set_series(symbol, series(b, 10));
    }
    let store = Arc::new(InMemoryBarStore::new());
    let scheduler = scheduler(source, Arc::clone(&store), 2)
        .with_symbols(symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]));

    let floor = Utc::now() - Duration::days(2);
    let summary = scheduler
        .run_once(TF, IngestMode::Backfill { floor }, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.symbols, 3);
    assert_eq!(summary.records, 30);
    assert!(!summary.cancelled);
    assert_eq!(store.upsert_calls(), 2);
    assert_eq!(store.len(TF), 30);
}

#[tokio::test]
async fn test_symbols_come_from_exchange_listing() {
    let b = base();
    let source = Arc::new(MockKlineSource::new());
    source.push_instruments(vec!["ETHBTC", "BTCUSDT"], None);
    source.set_series("BTCUSDT", series(b, 4));
    source.set_series("ETHBTC", series(b, 4));
    let store = Arc::new(InMemoryBarStore::new());
    let scheduler = scheduler(Arc::clone(&source), Arc::clone(&store), 20);

    let floor = Utc::now() - Duration::days(2);
    let summary = scheduler
        .run_once(TF, IngestMode::Backfill { floor }, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.symbols, 1);
    assert!(store.rows(TF).iter().all(|bar| bar.symbol == "BTCUSDT"));
}

// ============================================================================
// Incremental runs
// ============================================================================

#[tokio::test]
async fn test_incremental_starts_after_stored_high_water_mark() {
    let b = base();
    let source = Arc::new(MockKlineSource::new());
    source.set_series("BTCUSDT", series(b, 10));
    let store = Arc::new(InMemoryBarStore::new());
    let existing: Vec<Bar> = (0..5).map(|i| stored_bar("BTCUSDT", at(b, i))).collect();
    store.upsert(TF, &existing).await.unwrap();

    let scheduler = scheduler(Arc::clone(&source), Arc::clone(&store), 20)
        .with_symbols(symbols(&["BTCUSDT"]));
    let cancel = CancellationToken::new();

    let summary = scheduler
        .run_once(TF, IngestMode::Incremental, false, &cancel)
        .await
        .unwrap();

    assert_eq!(summary.records, 5);
    assert_eq!(source.kline_requests()[0].start, Some(at(b, 5)));
    assert_eq!(store.len(TF), 10);
    assert_eq!(scheduler.high_water(TF).get("BTCUSDT"), Some(&at(b, 9)));

    // Nothing new on the second pass, so nothing is written
    let calls = store.upsert_calls();
    let summary = scheduler
        .run_once(TF, IngestMode::Incremental, false, &cancel)
        .await
        .unwrap();
    assert_eq!(summary.records, 0);
    assert_eq!(store.upsert_calls(), calls);
    assert_eq!(source.kline_requests()[1].start, Some(at(b, 10)));
}

// ============================================================================
// Failures and shutdown
// ============================================================================

#[tokio::test]
async fn test_persistence_failure_surfaces() {
    let b = base();
    let source = Arc::new(MockKlineSource::new());
    source.set_series("BTCUSDT", series(b, 3));
    let store = Arc::new(InMemoryBarStore::new());
    store.set_fail_writes(true);
    let scheduler = scheduler(source, Arc::clone(&store), 20).with_symbols(symbols(&["BTCUSDT"]));

    let floor = Utc::now() - Duration::days(2);
    let result = scheduler
        .run_once(TF, IngestMode::Backfill { floor }, true, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(IngestError::Persistence(_))));
}

#[tokio::test]
async fn test_cancelled_before_first_batch() {
    let source = Arc::new(MockKlineSource::new());
    let store = Arc::new(InMemoryBarStore::new());
    let scheduler = scheduler(Arc::clone(&source), Arc::clone(&store), 20)
        .with_symbols(symbols(&["BTCUSDT"]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = scheduler
        .run_once(TF, IngestMode::Incremental, true, &cancel)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.batches, 0);
    assert!(source.kline_requests().is_empty());
    assert_eq!(store.upsert_calls(), 0);
}

#[tokio::test]
async fn test_shutdown_mid_batch_commits_finished_symbols() {
    let b = base();
    let names = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"];
    let source = Arc::new(MockKlineSource::new());
    for symbol in names {
        source.set_series(symbol, series(b, 3));
    }
    let cancel = CancellationToken::new();
    // Shutdown arrives while the second symbol's last call is in flight
    source.cancel_after_oi_requests(2, cancel.clone());

    let store = Arc::new(InMemoryBarStore::new());
    let mut config = config(2);
    config.workers = 1;
    let scheduler = scheduler_with(Arc::clone(&source), Arc::clone(&store), config)
        .with_symbols(symbols(&names));

    let summary = scheduler
        .run_once(TF, IngestMode::Incremental, true, &cancel)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.records, 6);
    assert_eq!(summary.cleaned, 0);
    assert_eq!(store.upsert_calls(), 1);

    let stored: BTreeSet<String> = store.rows(TF).into_iter().map(|bar| bar.symbol).collect();
    assert_eq!(stored, BTreeSet::from(["BTCUSDT".to_string(), "ETHUSDT".to_string()]));
    assert_eq!(source.kline_requests().len(), 2);
    assert_eq!(scheduler.high_water(TF).get("ETHUSDT"), Some(&at(b, 2)));
}

#[tokio::test]
async fn test_cleanup_runs_only_when_enabled() {
    let source = Arc::new(MockKlineSource::new());
    let store = Arc::new(InMemoryBarStore::new());
    let old = Utc::now() - Duration::days(400);
    store.upsert(TF, &[stored_bar("BTCUSDT", old)]).await.unwrap();
    let scheduler = scheduler(source, Arc::clone(&store), 20).with_symbols(Vec::new());
    let cancel = CancellationToken::new();

    let summary = scheduler
        .run_once(TF, IngestMode::Incremental, false, &cancel)
        .await
        .unwrap();
    assert_eq!(summary.cleaned, 0);
    assert_eq!(store.len(TF), 1);

    let summary = scheduler
        .run_once(TF, IngestMode::Incremental, true, &cancel)
        .await
        .unwrap();
    assert_eq!(summary.cleaned, 1);
    assert!(store.is_empty(TF));
}

#[tokio::test(start_paused = true)]
async fn test_run_forever_restarts_after_crash_cooldown() {
    let b = base();
    let source = Arc::new(MockKlineSource::new());
    source.set_series("BTCUSDT", series(b, 3));
    let store = Arc::new(InMemoryBarStore::new());
    store.set_fail_writes(true);
    let scheduler = Arc::new(
        scheduler(source, Arc::clone(&store), 20).with_symbols(symbols(&["BTCUSDT"])),
    );
    let cancel = CancellationToken::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    let handle = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        let attempts = Arc::clone(&attempts);
        tokio::spawn(async move {
            let mode = || {
                attempts.fetch_add(1, Ordering::SeqCst);
                IngestMode::Backfill {
                    floor: Utc::now() - Duration::days(2),
                }
            };
            scheduler.run_forever(TF, mode, false, &cancel).await
        })
    };

    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    assert_eq!(store.upsert_calls(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    store.set_fail_writes(false);

    let summary = handle.await.unwrap().expect("second attempt succeeds");
    assert_eq!(summary.records, 3);
    assert_eq!(store.upsert_calls(), 2);
    // The floor is recomputed for the restarted run
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_forever_stops_on_shutdown_during_cooldown() {
    let source = Arc::new(MockKlineSource::new());
    source.set_series("BTCUSDT", series(base(), 3));
    let store = Arc::new(InMemoryBarStore::new());
    store.set_fail_writes(true);
    let scheduler = Arc::new(
        scheduler(source, Arc::clone(&store), 20).with_symbols(symbols(&["BTCUSDT"])),
    );
    let floor = Utc::now() - Duration::days(2);
    let cancel = CancellationToken::new();

    let handle = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            scheduler
                .run_forever(TF, || IngestMode::Backfill { floor }, false, &cancel)
                .await
        })
    };

    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    cancel.cancel();

    assert!(handle.await.unwrap().is_none());
    assert_eq!(store.upsert_calls(), 1);
}
