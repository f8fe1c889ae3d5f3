//! Historical range reads
//!
//! Serves a time range from the newest snapshot when it covers the request
//! and falls back to the durable store otherwise. Decoded snapshots are
//! kept in a small LRU keyed by file path and modification time, so a
//! rewritten snapshot is picked up on the next read.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use super::{BarTable, CacheError, CacheResult, SnapshotManager};
use crate::storage::BarSource;
use bar_common::{Bar, Timeframe};

struct Entry {
    timeframe: Timeframe,
    path: PathBuf,
    modified: SystemTime,
    table: Arc<BarTable>,
}

pub struct HistoryLoader {
    snapshots: Arc<SnapshotManager>,
    source: Arc<dyn BarSource>,
    capacity: usize,
    // most recently used first
    entries: Mutex<VecDeque<Entry>>,
}

impl HistoryLoader {
    pub fn new(snapshots: Arc<SnapshotManager>, source: Arc<dyn BarSource>, capacity: usize) -> Self {
        Self {
            snapshots,
            source,
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Bars with `start <= time <= end`, ordered by symbol then time
    pub async fn fetch_range(
        &self,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        symbols: Option<&[String]>,
    ) -> CacheResult<Vec<Bar>> {
        if let Some(table) = self.snapshot_table(timeframe).await {
            let rows: Vec<Bar> = table
                .iter()
                .filter(|bar| bar.time >= start && bar.time <= end)
                .filter(|bar| symbols.map_or(true, |s| s.contains(&bar.symbol)))
                .cloned()
                .collect();
            if !rows.is_empty() {
                debug!(timeframe = %timeframe, rows = rows.len(), "Range served from snapshot");
                return Ok(rows);
            }
        }

        Ok(self.source.fetch_range(timeframe, start, end, symbols).await?)
    }

    pub async fn list_symbols(&self, timeframe: Timeframe) -> CacheResult<Vec<String>> {
        Ok(self.source.list_symbols(timeframe).await?)
    }

    /// Number of decoded snapshots held
    pub fn cached(&self) -> usize {
        self.entries.lock().len()
    }

    async fn snapshot_table(&self, timeframe: Timeframe) -> Option<Arc<BarTable>> {
        if self.capacity == 0 {
            return None;
        }
        let (path, modified) = self.snapshots.located_mtime(timeframe)?;

        {
            let mut entries = self.entries.lock();
            if let Some(pos) = entries
                .iter()
                .position(|e| e.timeframe == timeframe && e.path == path && e.modified == modified)
            {
                let entry = entries.remove(pos)?;
                let table = Arc::clone(&entry.table);
                entries.push_front(entry);
                return Some(table);
            }
        }

        let snapshots = Arc::clone(&self.snapshots);
        let loaded = tokio::task::spawn_blocking(move || snapshots.read_table(timeframe))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))
            .and_then(|r| r.map_err(CacheError::from));

        let table = match loaded {
            Ok(Some(table)) => Arc::new(table),
            Ok(None) => return None,
            Err(e) => {
                warn!(timeframe = %timeframe, "Snapshot unreadable, using database: {}", e);
                return None;
            }
        };

        let mut entries = self.entries.lock();
        entries.retain(|e| !(e.timeframe == timeframe && e.path == path));
        entries.push_front(Entry {
            timeframe,
            path,
            modified,
            table: Arc::clone(&table),
        });
        entries.truncate(self.capacity);
        Some(table)
    }
}
