//! Provider trait definitions
//!
//! A [`KlineSource`] is the raw exchange surface: one call per endpoint, no
//! retries, no pacing. Pacing and retry live in the rate controller and the
//! fetcher composes the two.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use bar_common::error::{ErrorCategory, ErrorClassification};
use bar_common::Timeframe;

/// Provider error types
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Exchange error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cancelled by shutdown request")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorClassification for ProviderError {
    fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Connection(_) => ErrorCategory::Transient,
            ProviderError::Timeout(_) => ErrorCategory::Transient,
            ProviderError::Request(_) => ErrorCategory::Permanent,
            ProviderError::Parse(_) => ErrorCategory::Permanent,
            ProviderError::RateLimit(_) => ErrorCategory::ResourceExhausted,
            ProviderError::Api { .. } => ErrorCategory::Permanent,
            ProviderError::Configuration(_) => ErrorCategory::Configuration,
            ProviderError::Cancelled => ErrorCategory::Cancelled,
            ProviderError::Internal(_) => ErrorCategory::Internal,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// One page request against the kline and open-interest endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub limit: usize,
    /// Inclusive lower bound on bar open time
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on bar open time
    pub end: Option<DateTime<Utc>>,
}

impl PageRequest {
    /// Latest `limit` bars
    pub fn latest(symbol: impl Into<String>, timeframe: Timeframe, limit: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            limit,
            start: None,
            end: None,
        }
    }

    /// Page starting at `start`
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Page ending at `end`
    pub fn ending_at(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }
}

/// Kline row as reported by the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Quote-asset turnover, used to repair missing volume
    pub turnover: Decimal,
}

/// Open interest row as reported by the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOpenInterest {
    pub time: DateTime<Utc>,
    pub open_interest: Decimal,
}

/// One page of open interest rows, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenInterestPage {
    pub rows: Vec<RawOpenInterest>,
    /// Cursor for older rows, `None` on the last page
    pub next_cursor: Option<String>,
}

/// One page of tradable instruments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentsPage {
    pub symbols: Vec<String>,
    /// Cursor for the next page, `None` on the last page
    pub next_cursor: Option<String>,
}

/// Raw exchange market-data surface
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Fetch kline rows for one page
    async fn klines(&self, request: &PageRequest) -> ProviderResult<Vec<RawKline>>;

    /// Fetch one page of open interest rows for the same window.
    /// Only `end` bounds the query; `start` is ignored. `cursor` continues
    /// from a previous page.
    async fn open_interest(
        &self,
        request: &PageRequest,
        cursor: Option<&str>,
    ) -> ProviderResult<OpenInterestPage>;

    /// Fetch one page of tradable instruments
    async fn instruments_page(&self, cursor: Option<&str>) -> ProviderResult<InstrumentsPage>;
}
