//! Market bar data model
//!
//! Bars are identified by `(symbol, time)` where `time` is the bucket-aligned
//! open time of the bar in UTC.

mod bar;
mod timeframe;

pub use bar::*;
pub use timeframe::*;

use thiserror::Error;

/// Data model errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DataError {
    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),
}
