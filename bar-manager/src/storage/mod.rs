//! Storage layer for bars
//!
//! One table per timeframe keyed by `(symbol, time)`. Writers go through
//! [`BarSink`], cache and history readers through [`BarSource`]; both are
//! implemented by the PostgreSQL [`BarRepository`] and by
//! [`InMemoryBarStore`].

mod memory;
mod migrations;
mod repository;
mod traits;

pub use memory::*;
pub use migrations::*;
pub use repository::*;
pub use traits::*;

use std::collections::HashMap;

use bar_common::{Bar, BarKey};

/// Collapse duplicate keys in arrival order.
///
/// Later rows overwrite earlier ones, except that a missing open interest
/// never erases one seen earlier. Output keeps first-seen key order.
pub fn dedupe_last_wins(bars: &[Bar]) -> Vec<Bar> {
    let mut index: HashMap<BarKey, usize> = HashMap::with_capacity(bars.len());
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());

    for bar in bars {
        match index.get(&bar.key()) {
            Some(&i) => out[i].absorb(bar),
            None => {
                index.insert(bar.key(), out.len());
                out.push(bar.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, minute: u32, close: Decimal, oi: Option<Decimal>) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            open: dec!(1),
            high: dec!(2),
            low: dec!(1),
            close,
            volume: dec!(5),
            open_interest: oi,
        }
    }

    #[test]
    fn test_dedupe_last_wins_with_oi_coalesce() {
        let bars = vec![
            bar("BTCUSDT", 0, dec!(10), Some(dec!(100))),
            bar("ETHUSDT", 0, dec!(20), None),
            bar("BTCUSDT", 0, dec!(11), None),
            bar("BTCUSDT", 5, dec!(12), Some(dec!(101))),
        ];
        let out = dedupe_last_wins(&bars);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].symbol, "BTCUSDT");
        assert_eq!(out[0].close, dec!(11));
        assert_eq!(out[0].open_interest, Some(dec!(100)));
        assert_eq!(out[1].symbol, "ETHUSDT");
    }
}
