//! Application settings and configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Exchange endpoint configuration
    #[serde(default)]
    pub exchange: ExchangeSettings,
    /// Outbound API rate control
    #[serde(default)]
    pub rate: RateSettings,
    /// Ingestion batching, retention and restart policy
    #[serde(default)]
    pub ingest: IngestSettings,
    /// Rolling cache and snapshot settings
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgresql://localhost/market".into())
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Exchange REST settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// REST base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Product category (linear perpetuals)
    #[serde(default = "default_category")]
    pub category: String,
    /// Only symbols quoted in this asset are ingested
    #[serde(default = "default_quote_suffix")]
    pub quote_suffix: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    /// Open interest error codes treated as "no open interest" for the page
    #[serde(default)]
    pub suppressed_oi_codes: Vec<i64>,
}

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_category() -> String {
    "linear".to_string()
}

fn default_quote_suffix() -> String {
    "USDT".to_string()
}

fn default_api_timeout() -> u64 {
    10
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            category: default_category(),
            quote_suffix: default_quote_suffix(),
            timeout_secs: default_api_timeout(),
            suppressed_oi_codes: Vec::new(),
        }
    }
}

impl ExchangeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Adaptive rate control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSettings {
    /// Process-wide bound on in-flight API calls
    #[serde(default = "default_max_concurrent_api")]
    pub max_concurrent_api: usize,
    /// Inter-call delay floor in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Inter-call delay ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Cooldown after a rate-limit or connection failure, in seconds
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_max_concurrent_api() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            max_concurrent_api: default_max_concurrent_api(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Ingestion run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Symbols per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent symbol tasks per batch
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pause between batches in seconds
    #[serde(default)]
    pub batch_delay_secs: u64,
    /// Sleep before restarting a crashed run, in seconds
    #[serde(default = "default_crash_cooldown")]
    pub crash_cooldown_secs: u64,
    /// Page size for incremental fetches
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Iteration cap for one symbol's backfill loop
    #[serde(default = "default_max_backfill_loops")]
    pub max_backfill_loops: usize,
    /// Row count at which upserts switch to the COPY staging path
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: usize,
    /// Rows per multi-row INSERT statement
    #[serde(default = "default_insert_page_size")]
    pub insert_page_size: usize,
    /// Rows older than this many days are removed by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Rows deleted per cleanup micro-batch
    #[serde(default = "default_cleanup_batch_size")]
    pub cleanup_batch_size: i64,
}

fn default_batch_size() -> usize {
    20
}

fn default_workers() -> usize {
    5
}

fn default_crash_cooldown() -> u64 {
    120
}

fn default_page_size() -> usize {
    200
}

fn default_max_backfill_loops() -> usize {
    1000
}

fn default_bulk_threshold() -> usize {
    1000
}

fn default_insert_page_size() -> usize {
    500
}

fn default_retention_days() -> u32 {
    180
}

fn default_cleanup_batch_size() -> i64 {
    10_000
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            batch_delay_secs: 0,
            crash_cooldown_secs: default_crash_cooldown(),
            default_page_size: default_page_size(),
            max_backfill_loops: default_max_backfill_loops(),
            bulk_threshold: default_bulk_threshold(),
            insert_page_size: default_insert_page_size(),
            retention_days: default_retention_days(),
            cleanup_batch_size: default_cleanup_batch_size(),
        }
    }
}

/// Rolling cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Bars retained per symbol
    #[serde(default = "default_window")]
    pub window: usize,
    /// Symbols per diff query during refresh
    #[serde(default = "default_diff_chunk_size")]
    pub diff_chunk_size: usize,
    /// Directory for snapshot files
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    /// Prime from snapshots at startup
    #[serde(default = "default_true")]
    pub use_snapshot: bool,
    /// Seconds between refresh + snapshot cycles
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Decoded snapshots kept by the history loader
    #[serde(default = "default_history_lru_capacity")]
    pub history_lru_capacity: usize,
}

fn default_window() -> usize {
    4032
}

fn default_diff_chunk_size() -> usize {
    300
}

fn default_snapshot_dir() -> PathBuf {
    std::env::var("CACHE_SNAPSHOT_DIR")
        .unwrap_or_else(|_| "/dev/shm/market_cache".into())
        .into()
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_history_lru_capacity() -> usize {
    4
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            window: default_window(),
            diff_chunk_size: default_diff_chunk_size(),
            snapshot_dir: default_snapshot_dir(),
            use_snapshot: true,
            refresh_interval_secs: default_refresh_interval(),
            history_lru_capacity: default_history_lru_capacity(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("BAR_MANAGER")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // e.g. BAR_MANAGER__DATABASE__URL
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    fn config_dir() -> String {
        std::env::var("BAR_MANAGER_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Create default settings (useful for testing)
    pub fn default_settings() -> Self {
        Settings {
            database: DatabaseSettings::default(),
            exchange: ExchangeSettings::default(),
            rate: RateSettings::default(),
            ingest: IngestSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default_settings();
        assert_eq!(settings.rate.max_concurrent_api, 5);
        assert_eq!(settings.rate.cooldown_secs, 60);
        assert_eq!(settings.ingest.batch_size, 20);
        assert_eq!(settings.ingest.workers, 5);
        assert_eq!(settings.ingest.bulk_threshold, 1000);
        assert_eq!(settings.ingest.retention_days, 180);
        assert_eq!(settings.cache.window, 4032);
        assert_eq!(settings.cache.diff_chunk_size, 300);
        assert_eq!(settings.exchange.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let raw = r#"{ "ingest": { "batch_size": 10 }, "cache": { "window": 3 } }"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.ingest.batch_size, 10);
        assert_eq!(settings.ingest.workers, 5);
        assert_eq!(settings.cache.window, 3);
        assert!(settings.cache.use_snapshot);
    }
}
