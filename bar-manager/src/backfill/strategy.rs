//! Backfill and incremental per-symbol loops

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::page_size::{calculate_diff_limit, DEFAULT_PAGE_SIZE};
use crate::metrics::BatchMetrics;
use crate::provider::{BarFetcher, PageRequest, ProviderError};
use bar_common::{Bar, Timeframe};

/// Iteration cap for one symbol's backfill loop
pub const DEFAULT_MAX_BACKFILL_LOOPS: usize = 1000;

/// Ingestion mode for a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Walk backward from now until `floor`
    Backfill { floor: DateTime<Utc> },
    /// One page after each symbol's high-water mark
    Incremental,
}

impl IngestMode {
    pub fn label(&self) -> &'static str {
        match self {
            IngestMode::Backfill { .. } => "backfill",
            IngestMode::Incremental => "incremental",
        }
    }
}

/// One symbol's unit of work within a batch
#[derive(Debug, Clone)]
pub struct SymbolTask {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Latest persisted bar time, if any
    pub last_time: Option<DateTime<Utc>>,
}

/// Bars gathered for one symbol
#[derive(Debug, Clone, Default)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub bars: Vec<Bar>,
    /// New high-water mark after an incremental fetch
    pub new_last_time: Option<DateTime<Utc>>,
}

/// Runs backfill or incremental fetches for single symbols
pub struct IngestStrategy {
    fetcher: Arc<BarFetcher>,
    page_size: usize,
    max_loops: usize,
}

impl IngestStrategy {
    pub fn new(fetcher: Arc<BarFetcher>) -> Self {
        Self {
            fetcher,
            page_size: DEFAULT_PAGE_SIZE,
            max_loops: DEFAULT_MAX_BACKFILL_LOOPS,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_loops(mut self, max_loops: usize) -> Self {
        self.max_loops = max_loops;
        self
    }

    pub fn fetcher(&self) -> &Arc<BarFetcher> {
        &self.fetcher
    }

    /// Run one symbol's task in the given mode
    pub async fn run(
        &self,
        task: SymbolTask,
        mode: IngestMode,
        metrics: &BatchMetrics,
        cancel: &CancellationToken,
    ) -> SymbolOutcome {
        match mode {
            IngestMode::Backfill { floor } => {
                let bars = self
                    .backfill(&task.symbol, task.timeframe, floor, metrics, cancel)
                    .await;
                SymbolOutcome {
                    symbol: task.symbol,
                    bars,
                    new_last_time: None,
                }
            }
            IngestMode::Incremental => {
                match self
                    .incremental(&task.symbol, task.timeframe, task.last_time, metrics, cancel)
                    .await
                {
                    Some((bars, last)) => SymbolOutcome {
                        symbol: task.symbol,
                        bars,
                        new_last_time: Some(last),
                    },
                    None => SymbolOutcome {
                        symbol: task.symbol,
                        ..Default::default()
                    },
                }
            }
        }
    }

    /// Walk backward from now toward `floor`.
    ///
    /// Returns every bar gathered before the loop ended, including after a
    /// failure part-way through.
    pub async fn backfill(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        floor: DateTime<Utc>,
        metrics: &BatchMetrics,
        cancel: &CancellationToken,
    ) -> Vec<Bar> {
        let mut results = Vec::new();
        let mut cursor: Option<DateTime<Utc>> = None;
        let mut previous_min: Option<DateTime<Utc>> = None;
        let mut loops = 0usize;

        while cursor.map_or(true, |c| c > floor) {
            if cancel.is_cancelled() {
                break;
            }

            loops += 1;
            if loops > self.max_loops {
                warn!("{} {}: loop limit reached ({}), stopping", symbol, timeframe, self.max_loops);
                break;
            }

            let limit = calculate_diff_limit(
                Some(floor),
                cursor.unwrap_or_else(Utc::now),
                timeframe.minutes(),
            );
            let mut request = PageRequest::latest(symbol, timeframe, limit);
            if let Some(c) = cursor {
                request = request.ending_at(c - timeframe.as_duration());
            }

            let bars = match self.fetcher.fetch_page(&request, metrics, cancel).await {
                Ok(Some(bars)) => bars,
                Ok(None) => break,
                Err(ProviderError::Cancelled) => break,
                Err(e) => {
                    metrics.record_error(format!("Backfill error for {}: {}", symbol, e));
                    error!("Backfill error for {} {}: {}", symbol, timeframe, e);
                    break;
                }
            };

            let Some(current_min) = bars.first().map(|b| b.time) else {
                break;
            };
            results.extend(bars);

            if previous_min.map_or(false, |prev| current_min >= prev) {
                warn!("{} {}: no progress past {}, stopping", symbol, timeframe, current_min);
                break;
            }

            cursor = Some(current_min);
            previous_min = Some(current_min);
        }

        debug!("{} {}: backfill gathered {} bars in {} pages", symbol, timeframe, results.len(), loops);
        results
    }

    /// Fetch one page after `last_time`.
    ///
    /// Returns the bars strictly newer than `last_time` and their maximum
    /// time, or `None` when there is nothing new or the fetch failed.
    pub async fn incremental(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        last_time: Option<DateTime<Utc>>,
        metrics: &BatchMetrics,
        cancel: &CancellationToken,
    ) -> Option<(Vec<Bar>, DateTime<Utc>)> {
        if cancel.is_cancelled() {
            return None;
        }

        let mut request = PageRequest::latest(symbol, timeframe, self.page_size);
        if let Some(last) = last_time {
            request = request.starting_at(last + timeframe.as_duration());
        }

        let bars = match self.fetcher.fetch_page(&request, metrics, cancel).await {
            Ok(Some(bars)) => bars,
            Ok(None) | Err(ProviderError::Cancelled) => return None,
            Err(e) => {
                metrics.record_error(format!("Incremental error for {}: {}", symbol, e));
                error!("Incremental error for {} {}: {}", symbol, timeframe, e);
                return None;
            }
        };

        let fresh: Vec<Bar> = match last_time {
            Some(last) => bars.into_iter().filter(|b| b.time > last).collect(),
            None => bars,
        };

        let newest = fresh.iter().map(|b| b.time).max()?;
        Some((fresh, newest))
    }
}
