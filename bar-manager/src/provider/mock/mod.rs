//! Mock kline source for testing
//!
//! Serves either scripted responses (queued per symbol, consumed in order)
//! or a fixed bar series answered the way the exchange answers range
//! queries: the newest `limit` rows inside `[start, end]`, newest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;

use crate::provider::{
    InstrumentsPage, KlineSource, OpenInterestPage, PageRequest, ProviderResult, RawKline,
    RawOpenInterest,
};

/// Queue key used when a symbol has no queue of its own
const ANY_SYMBOL: &str = "*";

#[derive(Default)]
struct MockState {
    klines: HashMap<String, VecDeque<ProviderResult<Vec<RawKline>>>>,
    open_interest: HashMap<String, VecDeque<ProviderResult<OpenInterestPage>>>,
    series: HashMap<String, Vec<RawKline>>,
    instruments: VecDeque<InstrumentsPage>,
    kline_requests: Vec<PageRequest>,
    oi_requests: Vec<PageRequest>,
    oi_cursors: Vec<Option<String>>,
    cancel_on_oi: Option<(usize, CancellationToken)>,
    instrument_cursors: Vec<Option<String>>,
}

/// Scriptable [`KlineSource`]
#[derive(Default)]
pub struct MockKlineSource {
    state: Mutex<MockState>,
}

impl MockKlineSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a kline response for any symbol
    pub fn push_klines(&self, response: ProviderResult<Vec<RawKline>>) {
        self.push_klines_for(ANY_SYMBOL, response);
    }

    /// Queue a kline response for one symbol
    pub fn push_klines_for(&self, symbol: &str, response: ProviderResult<Vec<RawKline>>) {
        self.state
            .lock()
            .klines
            .entry(symbol.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a single-page open interest response for any symbol
    pub fn push_open_interest(&self, response: ProviderResult<Vec<RawOpenInterest>>) {
        self.push_oi_response(response.map(|rows| OpenInterestPage {
            rows,
            next_cursor: None,
        }));
    }

    /// Queue one open interest page followed by `next_cursor`
    pub fn push_open_interest_page(&self, rows: Vec<RawOpenInterest>, next_cursor: Option<&str>) {
        self.push_oi_response(Ok(OpenInterestPage {
            rows,
            next_cursor: next_cursor.map(String::from),
        }));
    }

    fn push_oi_response(&self, response: ProviderResult<OpenInterestPage>) {
        self.state
            .lock()
            .open_interest
            .entry(ANY_SYMBOL.to_string())
            .or_default()
            .push_back(response);
    }

    /// Cancel `token` while answering the `count`-th open interest request
    pub fn cancel_after_oi_requests(&self, count: usize, token: CancellationToken) {
        self.state.lock().cancel_on_oi = Some((count, token));
    }

    /// Answer kline requests for `symbol` from a fixed series
    pub fn set_series(&self, symbol: &str, mut rows: Vec<RawKline>) {
        rows.sort_by_key(|r| r.open_time);
        self.state.lock().series.insert(symbol.to_string(), rows);
    }

    pub fn push_instruments(&self, symbols: Vec<&str>, next_cursor: Option<&str>) {
        self.state.lock().instruments.push_back(InstrumentsPage {
            symbols: symbols.into_iter().map(String::from).collect(),
            next_cursor: next_cursor.map(String::from),
        });
    }

    pub fn kline_requests(&self) -> Vec<PageRequest> {
        self.state.lock().kline_requests.clone()
    }

    pub fn oi_requests(&self) -> Vec<PageRequest> {
        self.state.lock().oi_requests.clone()
    }

    pub fn oi_cursors(&self) -> Vec<Option<String>> {
        self.state.lock().oi_cursors.clone()
    }

    pub fn instrument_cursors(&self) -> Vec<Option<String>> {
        self.state.lock().instrument_cursors.clone()
    }

    fn answer_from_series(rows: &[RawKline], request: &PageRequest) -> Vec<RawKline> {
        let in_range = |t: &DateTime<Utc>| {
            request.start.map_or(true, |s| *t >= s) && request.end.map_or(true, |e| *t <= e)
        };
        // newest first, like the exchange
        rows.iter()
            .rev()
            .filter(|r| in_range(&r.open_time))
            .take(request.limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl KlineSource for MockKlineSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn klines(&self, request: &PageRequest) -> ProviderResult<Vec<RawKline>> {
        let mut state = self.state.lock();
        state.kline_requests.push(request.clone());

        for key in [request.symbol.as_str(), ANY_SYMBOL] {
            if let Some(response) = state.klines.get_mut(key).and_then(|q| q.pop_front()) {
                return response;
            }
        }
        if let Some(rows) = state.series.get(&request.symbol) {
            return Ok(Self::answer_from_series(rows, request));
        }
        Ok(Vec::new())
    }

    async fn open_interest(
        &self,
        request: &PageRequest,
        cursor: Option<&str>,
    ) -> ProviderResult<OpenInterestPage> {
        let mut state = self.state.lock();
        state.oi_requests.push(request.clone());
        state.oi_cursors.push(cursor.map(String::from));

        if let Some((count, token)) = &state.cancel_on_oi {
            if state.oi_requests.len() >= *count {
                token.cancel();
            }
        }

        for key in [request.symbol.as_str(), ANY_SYMBOL] {
            if let Some(response) = state.open_interest.get_mut(key).and_then(|q| q.pop_front()) {
                return response;
            }
        }
        Ok(OpenInterestPage::default())
    }

    async fn instruments_page(&self, cursor: Option<&str>) -> ProviderResult<InstrumentsPage> {
        let mut state = self.state.lock();
        state.instrument_cursors.push(cursor.map(String::from));
        Ok(state.instruments.pop_front().unwrap_or_default())
    }
}
