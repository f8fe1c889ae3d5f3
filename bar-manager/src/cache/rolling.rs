//! Rolling window cache
//!
//! Readers take an `Arc` of the last completed table and never wait on a
//! refresh. Mutations build the next table off to the side under the
//! writer lock and swap it in when done.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BarTable, CacheResult};
use crate::storage::BarSource;
use bar_common::Timeframe;

pub struct RollingCache {
    source: Arc<dyn BarSource>,
    window: AtomicUsize,
    tables: RwLock<HashMap<Timeframe, Arc<BarTable>>>,
    writer: Mutex<()>,
}

impl RollingCache {
    pub fn new(source: Arc<dyn BarSource>, window: usize) -> Self {
        Self {
            source,
            window: AtomicUsize::new(window),
            tables: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn window(&self) -> usize {
        self.window.load(Ordering::SeqCst)
    }

    pub fn source(&self) -> &Arc<dyn BarSource> {
        &self.source
    }

    /// Last completed table for `timeframe`, empty when never loaded
    pub fn get(&self, timeframe: Timeframe) -> Arc<BarTable> {
        self.tables
            .read()
            .get(&timeframe)
            .cloned()
            .unwrap_or_default()
    }

    fn store(&self, timeframe: Timeframe, table: BarTable) {
        self.tables.write().insert(timeframe, Arc::new(table));
    }

    /// Change the window, dropping every table when it differs.
    /// Returns whether anything changed.
    pub async fn set_window(&self, window: usize) -> bool {
        let _guard = self.writer.lock().await;
        if self.window.swap(window, Ordering::SeqCst) == window {
            return false;
        }
        self.tables.write().clear();
        info!(window, "Cache window changed, tables reset");
        true
    }

    /// Load the newest `window` bars of every symbol for each timeframe
    pub async fn warm(&self, timeframes: &[Timeframe]) -> CacheResult<()> {
        let _guard = self.writer.lock().await;
        for &timeframe in timeframes {
            self.warm_locked(timeframe).await?;
        }
        Ok(())
    }

    async fn warm_locked(&self, timeframe: Timeframe) -> CacheResult<usize> {
        let window = self.window();
        let rows = self.source.tail_per_symbol(timeframe, window).await?;
        let mut table = BarTable::from_rows(rows);
        table.clip(window);

        let loaded = table.len();
        info!(
            timeframe = %timeframe,
            symbols = table.symbol_count(),
            rows = loaded,
            "Warmed cache"
        );
        self.store(timeframe, table);
        Ok(loaded)
    }

    /// Merge bars newer than each symbol's cached high-water mark.
    ///
    /// Timeframes with no cached data are warmed instead. Symbols that are
    /// not cached yet are not picked up. Returns rows merged across all
    /// timeframes.
    pub async fn refresh(&self, timeframes: &[Timeframe]) -> CacheResult<usize> {
        let _guard = self.writer.lock().await;
        let window = self.window();
        let mut merged = 0;

        for &timeframe in timeframes {
            let current = self.get(timeframe);
            if current.is_empty() {
                merged += self.warm_locked(timeframe).await?;
                continue;
            }

            let since = current.since_map();
            let rows = self.source.since_per_symbol(timeframe, &since).await?;
            let fresh: Vec<_> = rows
                .into_iter()
                .filter(|bar| since.get(&bar.symbol).is_some_and(|mark| bar.time > *mark))
                .collect();

            if fresh.is_empty() {
                debug!(timeframe = %timeframe, "No new bars");
                continue;
            }

            let mut next = BarTable::clone(&current);
            let applied = next.merge(fresh);
            next.clip(window);
            merged += applied;

            debug!(timeframe = %timeframe, rows = applied, "Refreshed cache");
            self.store(timeframe, next);
        }

        Ok(merged)
    }

    /// Replace a timeframe's table, clipped to the current window
    pub async fn install(&self, timeframe: Timeframe, mut table: BarTable) {
        let _guard = self.writer.lock().await;
        table.clip(self.window());
        self.store(timeframe, table);
    }
}
