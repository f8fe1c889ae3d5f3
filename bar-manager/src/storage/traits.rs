//! Storage seams used by the scheduler and the cache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::RepositoryResult;
use bar_common::{Bar, Timeframe};

/// Durable write side
#[async_trait]
pub trait BarSink: Send + Sync {
    /// Upsert bars into the timeframe's table, returning rows written.
    ///
    /// Price and volume fields of existing rows are overwritten; open
    /// interest is only overwritten by a non-null value.
    async fn upsert(&self, timeframe: Timeframe, bars: &[Bar]) -> RepositoryResult<u64>;

    /// Delete rows older than `keep_days`, returning rows deleted
    async fn cleanup(&self, timeframe: Timeframe, keep_days: u32) -> RepositoryResult<u64>;

    /// Latest persisted bar time per symbol
    async fn last_times(&self, timeframe: Timeframe) -> RepositoryResult<HashMap<String, DateTime<Utc>>>;
}

/// Durable read side
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Newest `per_symbol` bars of every symbol, ordered by symbol then time
    async fn tail_per_symbol(&self, timeframe: Timeframe, per_symbol: usize) -> RepositoryResult<Vec<Bar>>;

    /// Bars strictly newer than each symbol's `since` time. Symbols absent
    /// from `since` are not returned.
    async fn since_per_symbol(
        &self,
        timeframe: Timeframe,
        since: &HashMap<String, DateTime<Utc>>,
    ) -> RepositoryResult<Vec<Bar>>;

    /// Bars with `start <= time <= end`, optionally restricted to `symbols`
    async fn fetch_range(
        &self,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        symbols: Option<&[String]>,
    ) -> RepositoryResult<Vec<Bar>>;

    /// Distinct symbols present in the timeframe's table
    async fn list_symbols(&self, timeframe: Timeframe) -> RepositoryResult<Vec<String>>;
}
