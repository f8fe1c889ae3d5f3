//! PostgreSQL bar repository
//!
//! Writes are serialized through a single in-process lock so concurrent
//! ingest batches never interleave on the same table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{dedupe_last_wins, BarSink, BarSource};
use crate::config::{CacheSettings, DatabaseSettings, IngestSettings};
use bar_common::error::{ErrorCategory, ErrorClassification};
use bar_common::{is_valid_symbol, Bar, Timeframe};

const COLUMNS: &str = "symbol, time, open, high, low, close, volume, open_interest";

/// Progress is logged each time cleanup crosses another multiple of this
const CLEANUP_LOG_EVERY: u64 = 50_000;

/// Repository errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl ErrorClassification for RepositoryError {
    fn category(&self) -> ErrorCategory {
        match self {
            RepositoryError::Database(_) => ErrorCategory::Transient,
            RepositoryError::Unavailable(_) => ErrorCategory::Transient,
            RepositoryError::Configuration(_) => ErrorCategory::Configuration,
            RepositoryError::InvalidData(_) => ErrorCategory::Permanent,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Tuning for the write and read paths
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Row count at which upserts switch to COPY through a staging table
    pub bulk_threshold: usize,
    /// Rows per multi-row INSERT statement
    pub insert_page_size: usize,
    /// Rows deleted per cleanup statement
    pub cleanup_batch_size: i64,
    /// Symbols per `since_per_symbol` query
    pub diff_chunk_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            bulk_threshold: 1000,
            insert_page_size: 500,
            cleanup_batch_size: 10_000,
            diff_chunk_size: 300,
        }
    }
}

impl WriteOptions {
    pub fn from_settings(ingest: &IngestSettings, cache: &CacheSettings) -> Self {
        Self {
            bulk_threshold: ingest.bulk_threshold.max(1),
            insert_page_size: ingest.insert_page_size.max(1),
            cleanup_batch_size: ingest.cleanup_batch_size.max(1),
            diff_chunk_size: cache.diff_chunk_size.max(1),
        }
    }
}

#[derive(Debug, FromRow)]
struct BarRow {
    symbol: String,
    time: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    open_interest: Option<Decimal>,
}

impl From<BarRow> for Bar {
    fn from(row: BarRow) -> Self {
        Bar {
            symbol: row.symbol,
            time: row.time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            open_interest: row.open_interest,
        }
    }
}

#[derive(Debug, FromRow)]
struct LastTimeRow {
    symbol: String,
    last_time: DateTime<Utc>,
}

/// Bar repository backed by a PostgreSQL pool
pub struct BarRepository {
    pool: PgPool,
    options: WriteOptions,
    write_lock: Mutex<()>,
}

impl BarRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: PgPool, options: WriteOptions) -> Self {
        Self {
            pool,
            options,
            write_lock: Mutex::new(()),
        }
    }

    /// Connect a pool from settings
    pub async fn connect(settings: &DatabaseSettings) -> RepositoryResult<PgPool> {
        if settings.url.is_empty() {
            return Err(RepositoryError::Configuration(
                "database url is empty".to_string(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .connect(&settings.url)
            .await?;

        Ok(pool)
    }

    /// Create a new repository from settings
    pub async fn from_settings(
        settings: &DatabaseSettings,
        options: WriteOptions,
    ) -> RepositoryResult<Self> {
        let pool = Self::connect(settings).await?;
        Ok(Self::new(pool, options))
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn options(&self) -> WriteOptions {
        self.options
    }

    fn conflict_clause(table: &str) -> String {
        format!(
            " ON CONFLICT (symbol, time) DO UPDATE SET \
             open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
             close = EXCLUDED.close, volume = EXCLUDED.volume, \
             open_interest = COALESCE(EXCLUDED.open_interest, {table}.open_interest)"
        )
    }

    /// Multi-row INSERT pages inside one transaction
    async fn upsert_paged(&self, table: &str, bars: &[Bar]) -> RepositoryResult<u64> {
        let conflict = Self::conflict_clause(table);
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in bars.chunks(self.options.insert_page_size) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {table} ({COLUMNS}) "));
            builder.push_values(chunk, |mut row, bar| {
                row.push_bind(&bar.symbol)
                    .push_bind(bar.time)
                    .push_bind(bar.open)
                    .push_bind(bar.high)
                    .push_bind(bar.low)
                    .push_bind(bar.close)
                    .push_bind(bar.volume)
                    .push_bind(bar.open_interest);
            });
            builder.push(&conflict);

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    /// COPY into a staging table, then merge with a single upsert
    async fn upsert_bulk(&self, table: &str, bars: &[Bar]) -> RepositoryResult<u64> {
        let staging = format!("staging_{}", Uuid::new_v4().simple());
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "CREATE TEMP TABLE {staging} (LIKE {table} INCLUDING DEFAULTS) ON COMMIT DROP"
        ))
        .execute(&mut *tx)
        .await?;

        let mut copy = tx
            .copy_in_raw(&format!(
                "COPY {staging} ({COLUMNS}) FROM STDIN WITH (FORMAT csv, NULL '')"
            ))
            .await?;
        copy.send(encode_csv(bars).into_bytes()).await?;
        let copied = copy.finish().await?;

        let written = sqlx::query(&format!(
            "INSERT INTO {table} ({COLUMNS}) SELECT {COLUMNS} FROM {staging}{}",
            Self::conflict_clause(table)
        ))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(&format!("DROP TABLE IF EXISTS {staging}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(table, copied, written, "Bulk upsert merged staging table");
        Ok(written)
    }
}

/// CSV body for COPY. Empty field is NULL.
fn encode_csv(bars: &[Bar]) -> String {
    let mut out = String::with_capacity(bars.len() * 96);
    for bar in bars {
        let oi = bar
            .open_interest
            .map(|v| v.to_string())
            .unwrap_or_default();
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            bar.symbol,
            bar.time.to_rfc3339(),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            oi
        );
    }
    out
}

/// One batch of the retention delete.
///
/// Rows are matched on the `(symbol, time)` key. Physical row ids repeat
/// across the chunks of a partitioned or hypertable, so they cannot be used.
fn cleanup_sql(table: &str) -> String {
    format!(
        "WITH old AS (SELECT symbol, time FROM {table} \
         WHERE time < NOW() - make_interval(days => $1) LIMIT $2) \
         DELETE FROM {table} t USING old \
         WHERE t.symbol = old.symbol AND t.time = old.time"
    )
}

#[async_trait]
impl BarSink for BarRepository {
    async fn upsert(&self, timeframe: Timeframe, bars: &[Bar]) -> RepositoryResult<u64> {
        if bars.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = bars.iter().find(|b| !is_valid_symbol(&b.symbol)) {
            return Err(RepositoryError::InvalidData(format!(
                "invalid symbol {:?}",
                bad.symbol
            )));
        }

        let rows = dedupe_last_wins(bars);
        let table = timeframe.table_name();

        let _guard = self.write_lock.lock().await;
        let written = if rows.len() >= self.options.bulk_threshold {
            self.upsert_bulk(table, &rows).await?
        } else {
            self.upsert_paged(table, &rows).await?
        };

        debug!(table, rows = rows.len(), written, "Upserted bars");
        Ok(written)
    }

    async fn cleanup(&self, timeframe: Timeframe, keep_days: u32) -> RepositoryResult<u64> {
        let table = timeframe.table_name();
        let sql = cleanup_sql(table);
        let keep_days = i32::try_from(keep_days).map_err(|_| {
            RepositoryError::Configuration(format!("retention of {keep_days} days is too large"))
        })?;

        let mut total = 0u64;
        loop {
            let deleted = {
                let _guard = self.write_lock.lock().await;
                sqlx::query(&sql)
                    .bind(keep_days)
                    .bind(self.options.cleanup_batch_size)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            };
            if deleted == 0 {
                break;
            }

            let before = total / CLEANUP_LOG_EVERY;
            total += deleted;
            if total / CLEANUP_LOG_EVERY > before {
                info!(table, deleted = total, "Retention cleanup in progress");
            }
        }

        if total > 0 {
            info!(table, deleted = total, keep_days, "Retention cleanup finished");
        }
        Ok(total)
    }

    async fn last_times(&self, timeframe: Timeframe) -> RepositoryResult<HashMap<String, DateTime<Utc>>> {
        let rows: Vec<LastTimeRow> = sqlx::query_as(&format!(
            "SELECT symbol, MAX(time) AS last_time FROM {} GROUP BY symbol",
            timeframe.table_name()
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| (r.symbol, r.last_time)).collect())
    }
}

#[async_trait]
impl BarSource for BarRepository {
    async fn tail_per_symbol(&self, timeframe: Timeframe, per_symbol: usize) -> RepositoryResult<Vec<Bar>> {
        if per_symbol == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(per_symbol).unwrap_or(i64::MAX);

        let rows: Vec<BarRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM ( \
               SELECT {COLUMNS}, ROW_NUMBER() OVER (PARTITION BY symbol ORDER BY time DESC) AS rn \
               FROM {} \
             ) ranked WHERE rn <= $1 ORDER BY symbol, time",
            timeframe.table_name()
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Bar::from).collect())
    }

    async fn since_per_symbol(
        &self,
        timeframe: Timeframe,
        since: &HashMap<String, DateTime<Utc>>,
    ) -> RepositoryResult<Vec<Bar>> {
        let mut pairs: Vec<(&String, &DateTime<Utc>)> = since
            .iter()
            .filter(|(symbol, _)| {
                let ok = is_valid_symbol(symbol);
                if !ok {
                    warn!(symbol = %symbol, "Skipping invalid symbol in diff query");
                }
                ok
            })
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let sql = format!(
            "WITH marks(symbol, since) AS ( \
               SELECT * FROM UNNEST($1::text[], $2::timestamptz[]) \
             ) \
             SELECT t.symbol, t.time, t.open, t.high, t.low, t.close, t.volume, t.open_interest \
             FROM {} t JOIN marks m ON m.symbol = t.symbol AND t.time > m.since \
             ORDER BY t.symbol, t.time",
            timeframe.table_name()
        );

        let mut out = Vec::new();
        for chunk in pairs.chunks(self.options.diff_chunk_size) {
            let symbols: Vec<String> = chunk.iter().map(|(s, _)| (*s).clone()).collect();
            let times: Vec<DateTime<Utc>> = chunk.iter().map(|(_, t)| **t).collect();

            let rows: Vec<BarRow> = sqlx::query_as(&sql)
                .bind(symbols)
                .bind(times)
                .fetch_all(&self.pool)
                .await?;
            out.extend(rows.into_iter().map(Bar::from));
        }

        Ok(out)
    }

    async fn fetch_range(
        &self,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        symbols: Option<&[String]>,
    ) -> RepositoryResult<Vec<Bar>> {
        let table = timeframe.table_name();
        let rows: Vec<BarRow> = match symbols {
            Some(symbols) => {
                sqlx::query_as(&format!(
                    "SELECT {COLUMNS} FROM {table} \
                     WHERE time BETWEEN $1 AND $2 AND symbol = ANY($3) \
                     ORDER BY symbol, time"
                ))
                .bind(start)
                .bind(end)
                .bind(symbols.to_vec())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {COLUMNS} FROM {table} \
                     WHERE time BETWEEN $1 AND $2 ORDER BY symbol, time"
                ))
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Bar::from).collect())
    }

    async fn list_symbols(&self, timeframe: Timeframe) -> RepositoryResult<Vec<String>> {
        let symbols: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT DISTINCT symbol FROM {} ORDER BY symbol",
            timeframe.table_name()
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(symbols.into_iter().map(|(s,)| s).collect())
    }
}
