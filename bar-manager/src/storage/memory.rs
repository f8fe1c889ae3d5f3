//! In-memory bar store
//!
//! Same merge semantics as the PostgreSQL repository. Used by tests and by
//! `--dry-run` ingestion.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{BarSink, BarSource, RepositoryError, RepositoryResult};
use bar_common::{Bar, Timeframe};

type Table = BTreeMap<(String, DateTime<Utc>), Bar>;

#[derive(Default)]
pub struct InMemoryBarStore {
    tables: RwLock<HashMap<Timeframe, Table>>,
    upsert_calls: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent upserts fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent reads fail until reset
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> RepositoryResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// All rows of a timeframe ordered by symbol then time
    pub fn rows(&self, timeframe: Timeframe) -> Vec<Bar> {
        self.tables
            .read()
            .get(&timeframe)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, timeframe: Timeframe) -> usize {
        self.tables.read().get(&timeframe).map_or(0, |t| t.len())
    }

    pub fn is_empty(&self, timeframe: Timeframe) -> bool {
        self.len(timeframe) == 0
    }

    fn select<F>(&self, timeframe: Timeframe, mut keep: F) -> Vec<Bar>
    where
        F: FnMut(&Bar) -> bool,
    {
        self.tables
            .read()
            .get(&timeframe)
            .map(|t| t.values().filter(|b| keep(b)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BarSink for InMemoryBarStore {
    async fn upsert(&self, timeframe: Timeframe, bars: &[Bar]) -> RepositoryResult<u64> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("writes disabled".to_string()));
        }

        let mut tables = self.tables.write();
        let table = tables.entry(timeframe).or_default();
        for bar in bars {
            table
                .entry((bar.symbol.clone(), bar.time))
                .and_modify(|existing| existing.absorb(bar))
                .or_insert_with(|| bar.clone());
        }
        Ok(bars.len() as u64)
    }

    async fn cleanup(&self, timeframe: Timeframe, keep_days: u32) -> RepositoryResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(keep_days));
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&timeframe) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|(_, time), _| *time >= cutoff);
        Ok((before - table.len()) as u64)
    }

    async fn last_times(&self, timeframe: Timeframe) -> RepositoryResult<HashMap<String, DateTime<Utc>>> {
        let mut out = HashMap::new();
        if let Some(table) = self.tables.read().get(&timeframe) {
            // Keys are ordered by (symbol, time) so the last insert per symbol wins
            for (symbol, time) in table.keys() {
                out.insert(symbol.clone(), *time);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl BarSource for InMemoryBarStore {
    async fn tail_per_symbol(&self, timeframe: Timeframe, per_symbol: usize) -> RepositoryResult<Vec<Bar>> {
        self.check_reads()?;
        let rows = self.rows(timeframe);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for bar in &rows {
            *counts.entry(bar.symbol.as_str()).or_default() += 1;
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut out = Vec::new();
        for bar in &rows {
            let total = counts[bar.symbol.as_str()];
            let idx = seen.entry(bar.symbol.as_str()).or_default();
            if *idx + per_symbol >= total {
                out.push(bar.clone());
            }
            *idx += 1;
        }
        Ok(out)
    }

    async fn since_per_symbol(
        &self,
        timeframe: Timeframe,
        since: &HashMap<String, DateTime<Utc>>,
    ) -> RepositoryResult<Vec<Bar>> {
        self.check_reads()?;
        Ok(self.select(timeframe, |b| {
            since.get(&b.symbol).is_some_and(|mark| b.time > *mark)
        }))
    }

    async fn fetch_range(
        &self,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        symbols: Option<&[String]>,
    ) -> RepositoryResult<Vec<Bar>> {
        self.check_reads()?;
        Ok(self.select(timeframe, |b| {
            b.time >= start
                && b.time <= end
                && symbols.map_or(true, |s| s.iter().any(|x| *x == b.symbol))
        }))
    }

    async fn list_symbols(&self, timeframe: Timeframe) -> RepositoryResult<Vec<String>> {
        self.check_reads()?;
        let mut symbols: Vec<String> = self.rows(timeframe).into_iter().map(|b| b.symbol).collect();
        symbols.dedup();
        Ok(symbols)
    }
}
