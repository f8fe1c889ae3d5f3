//! Per-timeframe bar table keyed by `(symbol, time)`

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use bar_common::Bar;

/// Bars of one timeframe, grouped by symbol and ordered by time.
///
/// At most one bar exists per `(symbol, time)`; merging a bar with an
/// existing key replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarTable {
    symbols: BTreeMap<String, BTreeMap<DateTime<Utc>, Bar>>,
}

impl BarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from rows in arrival order
    pub fn from_rows(rows: impl IntoIterator<Item = Bar>) -> Self {
        let mut table = Self::new();
        table.merge(rows);
        table
    }

    /// Insert rows, later rows replacing earlier ones with the same key.
    /// Returns the number of rows applied.
    pub fn merge(&mut self, rows: impl IntoIterator<Item = Bar>) -> usize {
        let mut applied = 0;
        for bar in rows {
            self.symbols
                .entry(bar.symbol.clone())
                .or_default()
                .insert(bar.time, bar);
            applied += 1;
        }
        applied
    }

    /// Keep only the newest `window` bars of every symbol
    pub fn clip(&mut self, window: usize) {
        for bars in self.symbols.values_mut() {
            while bars.len() > window {
                bars.pop_first();
            }
        }
        self.symbols.retain(|_, bars| !bars.is_empty());
    }

    /// Copy of the newest `n` bars of every symbol
    pub fn tail(&self, n: usize) -> Self {
        let symbols = self
            .symbols
            .iter()
            .filter_map(|(symbol, bars)| {
                let skip = bars.len().saturating_sub(n);
                let kept: BTreeMap<_, _> = bars
                    .iter()
                    .skip(skip)
                    .map(|(t, b)| (*t, b.clone()))
                    .collect();
                (!kept.is_empty()).then(|| (symbol.clone(), kept))
            })
            .collect();
        Self { symbols }
    }

    /// Copy restricted to `symbols`
    pub fn filter_symbols(&self, symbols: &[String]) -> Self {
        let symbols = self
            .symbols
            .iter()
            .filter(|(symbol, _)| symbols.contains(symbol))
            .map(|(symbol, bars)| (symbol.clone(), bars.clone()))
            .collect();
        Self { symbols }
    }

    /// Bars of one symbol, oldest first
    pub fn rows_for(&self, symbol: &str) -> Vec<&Bar> {
        self.symbols
            .get(symbol)
            .map(|bars| bars.values().collect())
            .unwrap_or_default()
    }

    pub fn max_time(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.symbols
            .get(symbol)
            .and_then(|bars| bars.keys().next_back().copied())
    }

    /// Latest cached time of every symbol
    pub fn since_map(&self) -> HashMap<String, DateTime<Utc>> {
        self.symbols
            .iter()
            .filter_map(|(symbol, bars)| {
                bars.keys().next_back().map(|t| (symbol.clone(), *t))
            })
            .collect()
    }

    /// All bars ordered by symbol then time
    pub fn to_rows(&self) -> Vec<Bar> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.symbols.values().flat_map(|bars| bars.values())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Rows grouped by symbol, each group oldest first
    pub(crate) fn to_keyed(&self) -> BTreeMap<String, Vec<Bar>> {
        self.symbols
            .iter()
            .map(|(symbol, bars)| (symbol.clone(), bars.values().cloned().collect()))
            .collect()
    }
}
