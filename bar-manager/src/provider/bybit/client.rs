//! Bybit REST client
//!
//! One HTTP request per trait call, no retries. Pacing and retry are the
//! caller's job (see [`RateController`](crate::provider::RateController)).

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{
    kline_interval, open_interest_interval, Envelope, InstrumentsResult, KlineResult,
    OpenInterestResult,
};
use crate::config::ExchangeSettings;
use crate::provider::{
    InstrumentsPage, KlineSource, OpenInterestPage, PageRequest, ProviderError, ProviderResult,
    RawKline,
};

const KLINE_PATH: &str = "/v5/market/kline";
const OPEN_INTEREST_PATH: &str = "/v5/market/open-interest";
const INSTRUMENTS_PATH: &str = "/v5/market/instruments-info";
const INSTRUMENTS_PAGE_LIMIT: &str = "100";
const LIMIT_RESET_HEADER: &str = "X-Bapi-Limit-Reset-Timestamp";
/// The open interest endpoint rejects larger pages; callers walk the cursor
/// for longer windows
const OPEN_INTEREST_MAX_LIMIT: usize = 200;

/// Public market-data client for Bybit v5
pub struct BybitClient {
    client: Client,
    base_url: String,
    category: String,
}

impl BybitClient {
    pub fn new(settings: &ExchangeSettings) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ProviderError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            category: settings.category.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", path, params);

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(map_transport_error)?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            let reset = response
                .headers()
                .get(LIMIT_RESET_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            return Err(ProviderError::RateLimit(match reset {
                Some(ts) => format!("HTTP {} (limit resets at {})", status.as_u16(), ts),
                None => format!("HTTP {} without {} header", status.as_u16(), LIMIT_RESET_HEADER),
            }));
        }

        let body = response
            .text()
            .await
            .map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(ProviderError::Request(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Parse(format!("Failed to parse response: {} - body: {}", e, body)))?;
        envelope.into_result()
    }
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_connect() {
        ProviderError::Connection(err.to_string())
    } else {
        ProviderError::Request(err.to_string())
    }
}

#[async_trait]
impl KlineSource for BybitClient {
    fn name(&self) -> &str {
        "bybit"
    }

    async fn klines(&self, request: &PageRequest) -> ProviderResult<Vec<RawKline>> {
        let mut params = vec![
            ("category", self.category.clone()),
            ("symbol", request.symbol.clone()),
            ("interval", kline_interval(request.timeframe).to_string()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(start) = request.start {
            params.push(("start", start.timestamp_millis().to_string()));
        }
        if let Some(end) = request.end {
            params.push(("end", end.timestamp_millis().to_string()));
        }

        let result: KlineResult = self.get(KLINE_PATH, &params).await?;
        result.into_rows()
    }

    async fn open_interest(
        &self,
        request: &PageRequest,
        cursor: Option<&str>,
    ) -> ProviderResult<OpenInterestPage> {
        let mut params = vec![
            ("category", self.category.clone()),
            ("symbol", request.symbol.clone()),
            ("intervalTime", open_interest_interval(request.timeframe).to_string()),
            ("limit", request.limit.min(OPEN_INTEREST_MAX_LIMIT).to_string()),
        ];
        if let Some(end) = request.end {
            params.push(("endTime", end.timestamp_millis().to_string()));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let result: OpenInterestResult = self.get(OPEN_INTEREST_PATH, &params).await?;
        result.into_page()
    }

    async fn instruments_page(&self, cursor: Option<&str>) -> ProviderResult<InstrumentsPage> {
        let mut params = vec![
            ("category", self.category.clone()),
            ("limit", INSTRUMENTS_PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let result: InstrumentsResult = self.get(INSTRUMENTS_PATH, &params).await?;
        Ok(result.into_page())
    }
}
