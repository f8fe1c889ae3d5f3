//! Bar fetcher: paced kline + open interest pages normalized into bars

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::normalizer::normalize_page;
use super::outcome::{suppress_codes, CallOutcome};
use super::rate_control::RateController;
use super::{KlineSource, PageRequest, ProviderResult, RawOpenInterest};
use crate::metrics::BatchMetrics;
use bar_common::Bar;

/// Upper bound on instrument pages walked while listing symbols
const MAX_INSTRUMENT_PAGES: usize = 100;

/// Upper bound on open interest pages walked for one kline page
const MAX_OPEN_INTEREST_PAGES: usize = 10;

/// Fetches pages of bars for one symbol at a time through the rate controller
pub struct BarFetcher {
    source: Arc<dyn KlineSource>,
    rate: Arc<RateController>,
    quote_suffix: String,
    /// Exchange codes on the open interest endpoint that mean "no data"
    suppressed_oi_codes: Vec<i64>,
}

impl BarFetcher {
    pub fn new(source: Arc<dyn KlineSource>, rate: Arc<RateController>) -> Self {
        Self {
            source,
            rate,
            quote_suffix: "USDT".to_string(),
            suppressed_oi_codes: Vec::new(),
        }
    }

    pub fn with_quote_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.quote_suffix = suffix.into();
        self
    }

    pub fn with_suppressed_oi_codes(mut self, codes: Vec<i64>) -> Self {
        self.suppressed_oi_codes = codes;
        self
    }

    pub fn rate(&self) -> &Arc<RateController> {
        &self.rate
    }

    /// Fetch one page of bars.
    ///
    /// Issues the kline request and then open interest requests,
    /// sequentially. Open interest pages are followed until they reach the
    /// oldest kline. Returns `Ok(None)` when the exchange has no kline rows
    /// for the request.
    pub async fn fetch_page(
        &self,
        request: &PageRequest,
        metrics: &BatchMetrics,
        cancel: &CancellationToken,
    ) -> ProviderResult<Option<Vec<Bar>>> {
        let label = format!("kline {} {}", request.symbol, request.timeframe);
        let klines = self
            .rate
            .call(&label, metrics, cancel, || self.source.klines(request))
            .await?;

        let Some(oldest) = klines.iter().map(|k| k.open_time).min() else {
            debug!("{} {}: no kline rows", request.symbol, request.timeframe);
            return Ok(None);
        };

        let open_interest = self.fetch_open_interest(request, oldest, metrics, cancel).await?;
        Ok(Some(normalize_page(&request.symbol, klines, open_interest)))
    }

    async fn fetch_open_interest(
        &self,
        request: &PageRequest,
        oldest_kline: DateTime<Utc>,
        metrics: &BatchMetrics,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<RawOpenInterest>> {
        let label = format!("oi {} {}", request.symbol, request.timeframe);
        let mut rows: Vec<RawOpenInterest> = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_OPEN_INTEREST_PAGES {
            let outcome = suppress_codes(
                self.rate
                    .call(&label, metrics, cancel, || {
                        self.source.open_interest(request, cursor.as_deref())
                    })
                    .await,
                &self.suppressed_oi_codes,
            );
            let page = match outcome {
                CallOutcome::Ok(page) => page,
                CallOutcome::Suppressed { .. } => break,
                CallOutcome::Err(e) => return Err(e),
            };

            rows.extend(page.rows);
            let covered = rows.iter().any(|r| r.time <= oldest_kline);
            match page.next_cursor {
                Some(next) if !covered => cursor = Some(next),
                _ => break,
            }
        }

        Ok(rows)
    }

    /// List tradable symbols quoted in the configured asset
    pub async fn list_symbols(
        &self,
        metrics: &BatchMetrics,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<String>> {
        let mut symbols = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_INSTRUMENT_PAGES {
            let page = self
                .rate
                .call("instruments", metrics, cancel, || {
                    self.source.instruments_page(cursor.as_deref())
                })
                .await?;

            symbols.extend(
                page.symbols
                    .into_iter()
                    .filter(|s| s.ends_with(&self.quote_suffix)),
            );

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        symbols.sort();
        symbols.dedup();
        info!(
            "{}: {} {} symbols listed",
            self.source.name(),
            symbols.len(),
            self.quote_suffix
        );
        Ok(symbols)
    }
}
