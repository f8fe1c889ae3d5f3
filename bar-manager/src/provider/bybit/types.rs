//! Bybit v5 response types
//!
//! All numeric fields arrive as strings.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::provider::{
    InstrumentsPage, OpenInterestPage, ProviderError, ProviderResult, RawKline, RawOpenInterest,
};
use bar_common::Timeframe;

/// Exchange code for "too many visits"
pub const RET_CODE_RATE_LIMIT: i64 = 10006;

/// `interval` parameter of `/v5/market/kline`
pub fn kline_interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::FiveMinutes => "5",
        Timeframe::FifteenMinutes => "15",
        Timeframe::OneHour => "60",
        Timeframe::FourHours => "240",
    }
}

/// `intervalTime` parameter of `/v5/market/open-interest`
pub fn open_interest_interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::FiveMinutes => "5min",
        Timeframe::FifteenMinutes => "15min",
        Timeframe::OneHour => "1h",
        Timeframe::FourHours => "4h",
    }
}

/// Common response envelope
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap the result, mapping non-zero return codes to errors
    pub fn into_result(self) -> ProviderResult<T> {
        if self.ret_code != 0 {
            let lower = self.ret_msg.to_lowercase();
            if self.ret_code == RET_CODE_RATE_LIMIT || lower.contains("too many visits") {
                return Err(ProviderError::RateLimit(format!(
                    "{}: {}",
                    self.ret_code, self.ret_msg
                )));
            }
            return Err(ProviderError::Api {
                code: self.ret_code,
                message: self.ret_msg,
            });
        }
        self.result
            .ok_or_else(|| ProviderError::Parse("response without result".to_string()))
    }
}

/// `result` of `/v5/market/kline`
#[derive(Debug, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

/// `result` of `/v5/market/open-interest`
#[derive(Debug, Deserialize)]
pub struct OpenInterestResult {
    #[serde(default)]
    pub list: Vec<OpenInterestRow>,
    #[serde(rename = "nextPageCursor", default)]
    pub next_page_cursor: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenInterestRow {
    #[serde(rename = "openInterest")]
    pub open_interest: String,
    pub timestamp: String,
}

/// `result` of `/v5/market/instruments-info`
#[derive(Debug, Deserialize)]
pub struct InstrumentsResult {
    #[serde(default)]
    pub list: Vec<InstrumentRow>,
    #[serde(rename = "nextPageCursor", default)]
    pub next_page_cursor: String,
}

#[derive(Debug, Deserialize)]
pub struct InstrumentRow {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
}

fn parse_decimal(field: &str, value: &str) -> ProviderResult<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|e| ProviderError::Parse(format!("{} '{}': {}", field, value, e)))
}

fn parse_millis(value: &str) -> ProviderResult<DateTime<Utc>> {
    let ms: i64 = value
        .parse()
        .map_err(|e| ProviderError::Parse(format!("timestamp '{}': {}", value, e)))?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ProviderError::Parse(format!("timestamp out of range: {}", ms)))
}

impl KlineResult {
    /// Rows are `[startTime, open, high, low, close, volume, turnover]`
    pub fn into_rows(self) -> ProviderResult<Vec<RawKline>> {
        self.list
            .into_iter()
            .map(|row| {
                if row.len() < 7 {
                    return Err(ProviderError::Parse(format!(
                        "kline row has {} fields, expected 7",
                        row.len()
                    )));
                }
                Ok(RawKline {
                    open_time: parse_millis(&row[0])?,
                    open: parse_decimal("open", &row[1])?,
                    high: parse_decimal("high", &row[2])?,
                    low: parse_decimal("low", &row[3])?,
                    close: parse_decimal("close", &row[4])?,
                    volume: parse_decimal("volume", &row[5])?,
                    turnover: parse_decimal("turnover", &row[6])?,
                })
            })
            .collect()
    }
}

impl OpenInterestResult {
    pub fn into_page(self) -> ProviderResult<OpenInterestPage> {
        let rows = self
            .list
            .into_iter()
            .map(|row| {
                Ok(RawOpenInterest {
                    time: parse_millis(&row.timestamp)?,
                    open_interest: parse_decimal("openInterest", &row.open_interest)?,
                })
            })
            .collect::<ProviderResult<Vec<_>>>()?;

        Ok(OpenInterestPage {
            rows,
            next_cursor: Some(self.next_page_cursor).filter(|c| !c.is_empty()),
        })
    }
}

impl InstrumentsResult {
    /// Trading instruments only; pre-launch and settling contracts are skipped
    pub fn into_page(self) -> InstrumentsPage {
        InstrumentsPage {
            symbols: self
                .list
                .into_iter()
                .filter(|i| i.status.is_empty() || i.status == "Trading")
                .map(|i| i.symbol)
                .collect(),
            next_cursor: Some(self.next_page_cursor).filter(|c| !c.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_interval_mappings() {
        assert_eq!(kline_interval(Timeframe::OneHour), "60");
        assert_eq!(kline_interval(Timeframe::FourHours), "240");
        assert_eq!(open_interest_interval(Timeframe::FiveMinutes), "5min");
        assert_eq!(open_interest_interval(Timeframe::FourHours), "4h");
    }

    #[test]
    fn test_kline_envelope_parses() {
        let body = r#"{
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "linear",
                "symbol": "BTCUSDT",
                "list": [
                    ["1704067500000", "42300.5", "42350", "42280", "42310.1", "12.345", "522000.1"],
                    ["1704067200000", "42250", "42320", "42200", "42300.5", "0", "1e3"]
                ]
            }
        }"#;
        let envelope: Envelope<KlineResult> = serde_json::from_str(body).unwrap();
        let rows = envelope.into_result().unwrap().into_rows().unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].open_time.timestamp_millis(), 1704067500000);
        assert_eq!(rows[0].close, dec!(42310.1));
        assert_eq!(rows[1].turnover, dec!(1000));
    }

    #[test]
    fn test_rate_limit_code_maps_to_rate_limit() {
        let body = r#"{"retCode": 10006, "retMsg": "Too many visits!", "result": {}}"#;
        let envelope: Envelope<KlineResult> = serde_json::from_str(body).unwrap();
        assert!(matches!(envelope.into_result(), Err(ProviderError::RateLimit(_))));
    }

    #[test]
    fn test_other_codes_map_to_api_error() {
        let body = r#"{"retCode": 10001, "retMsg": "params error", "result": {}}"#;
        let envelope: Envelope<KlineResult> = serde_json::from_str(body).unwrap();
        assert!(matches!(
            envelope.into_result(),
            Err(ProviderError::Api { code: 10001, .. })
        ));
    }

    #[test]
    fn test_open_interest_rows() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"list":[
            {"openInterest":"51234.5","timestamp":"1704067200000"}
        ],"nextPageCursor":""}}"#;
        let envelope: Envelope<OpenInterestResult> = serde_json::from_str(body).unwrap();
        let page = envelope.into_result().unwrap().into_page().unwrap();
        assert_eq!(page.rows[0].open_interest, dec!(51234.5));
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_open_interest_page_cursor() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"list":[
            {"openInterest":"10","timestamp":"1704067200000"}
        ],"nextPageCursor":"lastid%3D42"}}"#;
        let envelope: Envelope<OpenInterestResult> = serde_json::from_str(body).unwrap();
        let page = envelope.into_result().unwrap().into_page().unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("lastid%3D42"));
    }

    #[test]
    fn test_instruments_page_cursor() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"list":[
            {"symbol":"BTCUSDT","status":"Trading"},
            {"symbol":"NEWUSDT","status":"PreLaunch"}
        ],"nextPageCursor":"abc"}}"#;
        let envelope: Envelope<InstrumentsResult> = serde_json::from_str(body).unwrap();
        let page = envelope.into_result().unwrap().into_page();
        assert_eq!(page.symbols, vec!["BTCUSDT".to_string()]);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[test]
    fn test_short_kline_row_is_parse_error() {
        let result = KlineResult {
            list: vec![vec!["1".into(), "2".into()]],
        };
        assert!(matches!(result.into_rows(), Err(ProviderError::Parse(_))));
    }
}
