//! Normalization of raw exchange rows into [`Bar`]s

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

use super::{RawKline, RawOpenInterest};
use bar_common::Bar;

/// Volume to store for a kline row.
///
/// The exchange occasionally reports zero base volume alongside a positive
/// quote turnover; in that case volume is recovered as `turnover / close`.
pub fn repaired_volume(row: &RawKline) -> Decimal {
    if row.volume.is_zero() && row.turnover > Decimal::ZERO && !row.close.is_zero() {
        row.turnover / row.close
    } else {
        row.volume
    }
}

/// Build time-ordered bars for one symbol.
///
/// Duplicate kline times keep the last row. Open interest is left-joined by
/// time and forward-filled; bars before the first open-interest sample keep
/// `None`.
pub fn normalize_page(symbol: &str, klines: Vec<RawKline>, open_interest: Vec<RawOpenInterest>) -> Vec<Bar> {
    let mut by_time: BTreeMap<_, RawKline> = BTreeMap::new();
    for row in klines {
        by_time.insert(row.open_time, row);
    }

    let oi_by_time: BTreeMap<_, Decimal> = open_interest
        .into_iter()
        .map(|row| (row.time, row.open_interest))
        .collect();

    let mut repaired = 0usize;
    let mut last_oi: Option<Decimal> = None;
    let bars: Vec<Bar> = by_time
        .into_values()
        .map(|row| {
            let volume = repaired_volume(&row);
            if volume != row.volume {
                repaired += 1;
            }
            if let Some(oi) = oi_by_time.get(&row.open_time) {
                last_oi = Some(*oi);
            }
            Bar {
                symbol: symbol.to_string(),
                time: row.open_time,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume,
                open_interest: last_oi,
            }
        })
        .collect();

    if repaired > 0 {
        debug!("{}: repaired zero volume on {} of {} bars", symbol, repaired, bars.len());
    }

    bars
}
