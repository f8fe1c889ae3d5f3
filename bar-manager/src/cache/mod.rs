//! Rolling bar cache
//!
//! Per-timeframe tables of the newest `window` bars of every symbol, warmed
//! from the store, kept current by diff refreshes and persisted to snapshot
//! files for fast restarts.
//!
//! State per timeframe moves empty -> warmed -> refreshed. Priming from a
//! snapshot counts as warmed.

mod history;
mod rolling;
mod snapshot;
mod table;

pub use history::HistoryLoader;
pub use rolling::RollingCache;
pub use snapshot::*;
pub use table::BarTable;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CacheSettings;
use crate::storage::{BarSource, RepositoryError};
use bar_common::error::{ErrorCategory, ErrorClassification};
use bar_common::Timeframe;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheError {
    #[error("Store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl ErrorClassification for CacheError {
    fn category(&self) -> ErrorCategory {
        match self {
            CacheError::Store(e) => e.category(),
            CacheError::Snapshot(e) => e.category(),
            CacheError::Task(_) => ErrorCategory::Internal,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Latest bars of one timeframe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestBars {
    pub timeframe: Timeframe,
    pub table: BarTable,
}

/// Cache facade used by the service loop and by readers
pub struct MarketCache {
    rolling: RollingCache,
    snapshots: Arc<SnapshotManager>,
}

impl MarketCache {
    pub fn new(source: Arc<dyn BarSource>, snapshots: SnapshotManager, window: usize) -> Self {
        Self {
            rolling: RollingCache::new(source, window),
            snapshots: Arc::new(snapshots),
        }
    }

    pub fn from_settings(source: Arc<dyn BarSource>, settings: &CacheSettings) -> Self {
        Self::new(
            source,
            SnapshotManager::new(settings.snapshot_dir.clone()),
            settings.window,
        )
    }

    pub fn window(&self) -> usize {
        self.rolling.window()
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// History reader sharing this cache's snapshot directory and store
    pub fn history_loader(&self, capacity: usize) -> HistoryLoader {
        HistoryLoader::new(
            Arc::clone(&self.snapshots),
            Arc::clone(self.rolling.source()),
            capacity,
        )
    }

    /// Load every timeframe from the store. A different `window` drops all
    /// tables first.
    pub async fn warm(&self, timeframes: &[Timeframe], window: Option<usize>) -> CacheResult<()> {
        if let Some(window) = window {
            self.rolling.set_window(window).await;
        }
        self.rolling.warm(timeframes).await
    }

    pub async fn refresh(&self, timeframes: &[Timeframe]) -> CacheResult<usize> {
        self.rolling.refresh(timeframes).await
    }

    /// Write one snapshot per non-empty timeframe. Returns the files written.
    pub async fn save_snapshot(&self, timeframes: &[Timeframe]) -> CacheResult<Vec<PathBuf>> {
        let window = self.window();
        let mut written = Vec::new();

        for &timeframe in timeframes {
            let table = self.rolling.get(timeframe);
            if table.is_empty() {
                debug!(timeframe = %timeframe, "Nothing to snapshot");
                continue;
            }

            let snapshots = Arc::clone(&self.snapshots);
            let saved = tokio::task::spawn_blocking(move || snapshots.save(timeframe, window, &table))
                .await
                .map_err(|e| CacheError::Task(e.to_string()))??;
            written.extend(saved);
        }

        Ok(written)
    }

    /// Install the newest snapshot of each timeframe. Missing or unreadable
    /// snapshots are skipped. Returns how many timeframes were primed.
    pub async fn prime_cache_from_snapshot(&self, timeframes: &[Timeframe]) -> usize {
        let window = self.window();
        let mut primed = 0;

        for &timeframe in timeframes {
            let snapshots = Arc::clone(&self.snapshots);
            let loaded = tokio::task::spawn_blocking(move || snapshots.prime(timeframe, window)).await;

            match loaded {
                Ok(Ok(Some(table))) => {
                    info!(
                        timeframe = %timeframe,
                        symbols = table.symbol_count(),
                        rows = table.len(),
                        "Primed cache from snapshot"
                    );
                    self.rolling.install(timeframe, table).await;
                    primed += 1;
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(timeframe = %timeframe, "Skipping snapshot: {}", e),
                Err(e) => warn!(timeframe = %timeframe, "Snapshot load task failed: {}", e),
            }
        }

        primed
    }

    /// Last completed table, never waiting on a refresh
    pub fn get(&self, timeframe: Timeframe) -> Arc<BarTable> {
        self.rolling.get(timeframe)
    }

    /// Newest `n` bars per symbol, optionally for some symbols only.
    /// `n` at or above the window returns every cached bar.
    pub fn get_latest(&self, timeframe: Timeframe, n: usize, symbols: Option<&[String]>) -> BarTable {
        let table = self.get(timeframe);
        let table = match symbols {
            Some(symbols) => table.filter_symbols(symbols),
            None => BarTable::clone(&table),
        };
        if n >= self.window() {
            table
        } else {
            table.tail(n)
        }
    }

    pub fn get_latest_all(
        &self,
        timeframes: &[Timeframe],
        n: usize,
        symbols: Option<&[String]>,
    ) -> Vec<LatestBars> {
        timeframes
            .iter()
            .map(|&timeframe| LatestBars {
                timeframe,
                table: self.get_latest(timeframe, n, symbols),
            })
            .collect()
    }
}
