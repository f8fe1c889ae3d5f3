use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DataError;

/// Bar bucket duration supported by the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
}

impl Timeframe {
    /// Every supported timeframe, shortest first
    pub const ALL: [Timeframe; 4] = [
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
        Timeframe::OneHour,
        Timeframe::FourHours,
    ];

    /// Bucket size in minutes
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::FiveMinutes => 5,
            Timeframe::FifteenMinutes => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHours => 240,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHours => "4h",
        }
    }

    /// Name of the durable table backing this timeframe
    pub fn table_name(&self) -> &'static str {
        match self {
            Timeframe::FiveMinutes => "ohlcv_5m",
            Timeframe::FifteenMinutes => "ohlcv_15m",
            Timeframe::OneHour => "ohlcv_1h",
            Timeframe::FourHours => "ohlcv_4h",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "5m" => Ok(Timeframe::FiveMinutes),
            "15m" => Ok(Timeframe::FifteenMinutes),
            "1h" | "60m" => Ok(Timeframe::OneHour),
            "4h" | "240m" => Ok(Timeframe::FourHours),
            other => Err(DataError::UnsupportedTimeframe(other.to_string())),
        }
    }
}
