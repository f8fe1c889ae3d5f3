use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identity of a bar within one timeframe
pub type BarKey = (String, DateTime<Utc>);

/// One OHLCV + open interest record for a symbol at a bucket-aligned time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    /// Bar open time, aligned to the timeframe bucket
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Open interest at `time`, absent when the exchange reported none
    pub open_interest: Option<Decimal>,
}

impl Bar {
    pub fn key(&self) -> BarKey {
        (self.symbol.clone(), self.time)
    }

    /// Apply an incoming write for the same key.
    ///
    /// Price and volume fields are overwritten; open interest is only
    /// replaced when the incoming value is present.
    pub fn absorb(&mut self, incoming: &Bar) {
        self.open = incoming.open;
        self.high = incoming.high;
        self.low = incoming.low;
        self.close = incoming.close;
        self.volume = incoming.volume;
        if incoming.open_interest.is_some() {
            self.open_interest = incoming.open_interest;
        }
    }
}

/// Returns true for exchange symbols safe to embed in generated SQL
/// (`^[A-Z0-9_]+$`).
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}
