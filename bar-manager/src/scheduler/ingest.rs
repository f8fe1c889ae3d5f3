//! Batch ingestion scheduler

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backfill::{IngestMode, IngestStrategy, SymbolOutcome, SymbolTask};
use crate::config::IngestSettings;
use crate::metrics::BatchMetrics;
use crate::provider::ProviderError;
use crate::storage::{BarSink, RepositoryError};
use bar_common::error::{ErrorCategory, ErrorClassification};
use bar_common::{Bar, Timeframe};

/// Run-level ingestion errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IngestError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("Symbol listing failed: {0}")]
    SymbolListing(ProviderError),
}

impl ErrorClassification for IngestError {
    fn category(&self) -> ErrorCategory {
        match self {
            IngestError::Persistence(e) => e.category(),
            IngestError::SymbolListing(e) => e.category(),
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub batch_delay: Duration,
    pub crash_cooldown: Duration,
    pub retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_settings(&IngestSettings::default())
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            workers: settings.workers.max(1),
            batch_delay: Duration::from_secs(settings.batch_delay_secs),
            crash_cooldown: Duration::from_secs(settings.crash_cooldown_secs),
            retention_days: settings.retention_days,
        }
    }
}

/// Totals for one `run_once`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub symbols: usize,
    pub records: u64,
    pub errors: usize,
    pub cleaned: u64,
    /// Shutdown was observed before the run finished
    pub cancelled: bool,
}

/// Drives per-symbol strategies in batches and commits their bars
pub struct IngestScheduler {
    strategy: Arc<IngestStrategy>,
    sink: Arc<dyn BarSink>,
    config: SchedulerConfig,
    symbols: Option<Vec<String>>,
    high_water: Mutex<HashMap<Timeframe, HashMap<String, DateTime<Utc>>>>,
}

impl IngestScheduler {
    pub fn new(strategy: Arc<IngestStrategy>, sink: Arc<dyn BarSink>, config: SchedulerConfig) -> Self {
        Self {
            strategy,
            sink,
            config,
            symbols: None,
            high_water: Mutex::new(HashMap::new()),
        }
    }

    /// Use a fixed symbol list instead of asking the exchange
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// High-water marks known to this scheduler for a timeframe
    pub fn high_water(&self, timeframe: Timeframe) -> HashMap<String, DateTime<Utc>> {
        self.high_water
            .lock()
            .get(&timeframe)
            .cloned()
            .unwrap_or_default()
    }

    async fn resolve_symbols(&self, cancel: &CancellationToken) -> Result<Vec<String>, ProviderError> {
        if let Some(symbols) = &self.symbols {
            return Ok(symbols.clone());
        }
        let metrics = BatchMetrics::new();
        self.strategy.fetcher().list_symbols(&metrics, cancel).await
    }

    /// Stored marks merged with the ones this scheduler advanced, keeping the later
    async fn load_high_water(&self, timeframe: Timeframe) -> IngestResult<HashMap<String, DateTime<Utc>>> {
        let mut marks = self.sink.last_times(timeframe).await?;
        if let Some(known) = self.high_water.lock().get(&timeframe) {
            for (symbol, time) in known {
                marks
                    .entry(symbol.clone())
                    .and_modify(|t| *t = (*t).max(*time))
                    .or_insert(*time);
            }
        }
        Ok(marks)
    }

    /// One pass over every symbol
    pub async fn run_once(
        &self,
        timeframe: Timeframe,
        mode: IngestMode,
        cleanup: bool,
        cancel: &CancellationToken,
    ) -> IngestResult<RunSummary> {
        let mut summary = RunSummary::default();

        let symbols = match self.resolve_symbols(cancel).await {
            Ok(symbols) => symbols,
            Err(e) if e.is_cancelled() => {
                summary.cancelled = true;
                return Ok(summary);
            }
            Err(e) => return Err(IngestError::SymbolListing(e)),
        };

        let mut marks = match mode {
            IngestMode::Incremental => self.load_high_water(timeframe).await?,
            IngestMode::Backfill { .. } => HashMap::new(),
        };

        info!(
            timeframe = %timeframe,
            mode = mode.label(),
            symbols = symbols.len(),
            batch_size = self.config.batch_size,
            workers = self.config.workers,
            "Starting ingestion run"
        );

        let workers = Arc::new(Semaphore::new(self.config.workers));
        let batch_count = symbols.len().div_ceil(self.config.batch_size);

        for (index, batch) in symbols.chunks(self.config.batch_size).enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let metrics = Arc::new(BatchMetrics::new());
            let (outcomes, interrupted) = self
                .run_batch(timeframe, mode, batch, &marks, &workers, &metrics, cancel)
                .await;

            let mut records: Vec<Bar> = Vec::new();
            for outcome in &outcomes {
                records.extend_from_slice(&outcome.bars);
            }

            let written = if records.is_empty() {
                0
            } else {
                self.sink.upsert(timeframe, &records).await?
            };

            if mode == IngestMode::Incremental {
                let mut known = self.high_water.lock();
                let known = known.entry(timeframe).or_default();
                for outcome in &outcomes {
                    if let Some(last) = outcome.new_last_time {
                        marks.insert(outcome.symbol.clone(), last);
                        known.insert(outcome.symbol.clone(), last);
                    }
                }
            }

            metrics.finish(outcomes.len(), records.len());
            metrics.log_summary(&format!(
                "{} {} batch {}/{}",
                timeframe,
                mode.label(),
                index + 1,
                batch_count
            ));

            summary.batches += 1;
            summary.symbols += outcomes.len();
            summary.records += written;
            summary.errors += metrics.snapshot().errors.len();

            if interrupted {
                summary.cancelled = true;
                break;
            }

            if !self.config.batch_delay.is_zero() && index + 1 < batch_count {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        summary.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.config.batch_delay) => {}
                }
            }
        }

        if cleanup && !summary.cancelled {
            summary.cleaned = self
                .sink
                .cleanup(timeframe, self.config.retention_days)
                .await?;
        }

        info!(
            timeframe = %timeframe,
            batches = summary.batches,
            symbols = summary.symbols,
            records = summary.records,
            cleaned = summary.cleaned,
            cancelled = summary.cancelled,
            "Ingestion run finished"
        );
        Ok(summary)
    }

    /// Fan one batch out to workers. Returns the collected outcomes and
    /// whether shutdown was observed during the batch.
    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        timeframe: Timeframe,
        mode: IngestMode,
        batch: &[String],
        marks: &HashMap<String, DateTime<Utc>>,
        workers: &Arc<Semaphore>,
        metrics: &Arc<BatchMetrics>,
        cancel: &CancellationToken,
    ) -> (Vec<SymbolOutcome>, bool) {
        let mut set = JoinSet::new();

        for symbol in batch {
            let task = SymbolTask {
                symbol: symbol.clone(),
                timeframe,
                last_time: marks.get(symbol).copied(),
            };
            let strategy = Arc::clone(&self.strategy);
            let workers = Arc::clone(workers);
            let metrics = Arc::clone(metrics);
            let cancel = cancel.clone();

            set.spawn(async move {
                // Semaphore is never closed
                let _permit = workers.acquire_owned().await.ok();
                if cancel.is_cancelled() {
                    return SymbolOutcome {
                        symbol: task.symbol,
                        ..Default::default()
                    };
                }
                strategy.run(task, mode, &metrics, &cancel).await
            });
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        let mut interrupted = false;

        // After shutdown the remaining tasks exit at their next cancellation
        // check; whatever they already gathered is still committed.
        while let Some(joined) = set.join_next().await {
            if !interrupted && cancel.is_cancelled() {
                interrupted = true;
                warn!(
                    collected = outcomes.len(),
                    pending = set.len() + 1,
                    "Shutdown during batch, committing collected results"
                );
            }
            match joined {
                Ok(outcome) => {
                    debug!(symbol = %outcome.symbol, bars = outcome.bars.len(), "Symbol task finished");
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!("Symbol task failed: {}", e);
                    metrics.record_error(format!("task failed: {e}"));
                }
            }
        }

        (outcomes, interrupted)
    }

    /// Run until one pass succeeds, restarting after a cooldown on failure.
    ///
    /// `mode` is asked for a fresh mode at the start of every attempt so a
    /// backfill floor relative to now moves with the restarts. Returns
    /// `None` when shutdown interrupts the cooldown.
    pub async fn run_forever<M>(
        &self,
        timeframe: Timeframe,
        mode: M,
        cleanup: bool,
        cancel: &CancellationToken,
    ) -> Option<RunSummary>
    where
        M: Fn() -> IngestMode,
    {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            match self.run_once(timeframe, mode(), cleanup, cancel).await {
                Ok(summary) => return Some(summary),
                Err(e) => {
                    error!(
                        category = ?e.category(),
                        "Ingestion run failed: {}; restarting in {:?}",
                        e, self.config.crash_cooldown
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested during crash cooldown");
                    return None;
                }
                _ = tokio::time::sleep(self.config.crash_cooldown) => {}
            }
        }
    }
}
