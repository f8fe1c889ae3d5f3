//! Per-batch ingestion metrics
//!
//! One [`BatchMetrics`] is created at the start of every batch, shared by the
//! batch's symbol tasks and the rate controller, then logged and dropped.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Error messages retained per batch
const MAX_RETAINED_ERRORS: usize = 100;
/// Error messages included in the batch summary log
const LOGGED_ERRORS: usize = 3;

/// Counters for one ingestion batch
#[derive(Debug)]
pub struct BatchMetrics {
    started: Instant,
    finished: Mutex<Option<Instant>>,
    symbols_processed: AtomicU64,
    records_inserted: AtomicU64,
    api_calls_success: AtomicU64,
    api_calls_failed: AtomicU64,
    rate_limit_hits: AtomicU64,
    errors: Mutex<Vec<String>>,
    errors_dropped: AtomicU64,
}

/// Point-in-time copy of [`BatchMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMetricsSnapshot {
    pub symbols_processed: u64,
    pub records_inserted: u64,
    pub api_calls_success: u64,
    pub api_calls_failed: u64,
    pub rate_limit_hits: u64,
    pub errors: Vec<String>,
    pub errors_dropped: u64,
    pub elapsed: Duration,
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            finished: Mutex::new(None),
            symbols_processed: AtomicU64::new(0),
            records_inserted: AtomicU64::new(0),
            api_calls_success: AtomicU64::new(0),
            api_calls_failed: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
            errors_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_api_success(&self) {
        self.api_calls_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_failure(&self) {
        self.api_calls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let mut errors = self.errors.lock();
        if errors.len() < MAX_RETAINED_ERRORS {
            errors.push(message.into());
        } else {
            self.errors_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Mark the batch as committed
    pub fn finish(&self, symbols_processed: usize, records_inserted: usize) {
        self.symbols_processed
            .store(symbols_processed as u64, Ordering::Relaxed);
        self.records_inserted
            .store(records_inserted as u64, Ordering::Relaxed);
        *self.finished.lock() = Some(Instant::now());
    }

    pub fn snapshot(&self) -> BatchMetricsSnapshot {
        let end = (*self.finished.lock()).unwrap_or_else(Instant::now);
        BatchMetricsSnapshot {
            symbols_processed: self.symbols_processed.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            api_calls_success: self.api_calls_success.load(Ordering::Relaxed),
            api_calls_failed: self.api_calls_failed.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            errors: self.errors.lock().clone(),
            errors_dropped: self.errors_dropped.load(Ordering::Relaxed),
            elapsed: end.saturating_duration_since(self.started),
        }
    }

    /// Emit the batch summary
    pub fn log_summary(&self, batch_label: &str) {
        let s = self.snapshot();
        info!(
            "Batch {} metrics: symbols={} records={} api_ok={} api_failed={} rate_limits={} errors={} elapsed={:.1}s",
            batch_label,
            s.symbols_processed,
            s.records_inserted,
            s.api_calls_success,
            s.api_calls_failed,
            s.rate_limit_hits,
            s.errors.len() as u64 + s.errors_dropped,
            s.elapsed.as_secs_f64()
        );
        for message in s.errors.iter().take(LOGGED_ERRORS) {
            warn!("  batch {} error: {}", batch_label, message);
        }
    }
}
