//! Bar Manager
//!
//! Ingests OHLCV and open interest bars from a rate-limited exchange API,
//! upserts them into PostgreSQL and serves them through a rolling window
//! cache that survives restarts via snapshot files.
//!
//! # Architecture
//!
//! ```text
//! IngestScheduler -> IngestStrategy -> BarFetcher -> RateController -> KlineSource
//!        |
//!        v
//!     BarSink (BarRepository)  <-  BarSource  <-  MarketCache -> SnapshotManager
//! ```
//!
//! # Modules
//!
//! - [`provider`]: exchange client, rate control, page fetching and normalization
//! - [`backfill`]: per-symbol backfill and incremental loops
//! - [`scheduler`]: batched worker pool with per-batch commits
//! - [`storage`]: bulk upsert, retention cleanup and cache reads
//! - [`cache`]: rolling cache, snapshots and history reads
//! - [`config`]: layered settings
//! - [`shutdown`]: signal to cancellation token adapter

pub mod backfill;
pub mod cache;
pub mod cli;
pub mod config;
pub mod metrics;
pub mod provider;
pub mod scheduler;
pub mod shutdown;
pub mod storage;

pub use cache::{BarTable, LatestBars, MarketCache};
pub use config::Settings;
pub use scheduler::{IngestScheduler, RunSummary};
