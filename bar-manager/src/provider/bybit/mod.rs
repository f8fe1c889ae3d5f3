//! Bybit v5 public market data
//!
//! Linear perpetual klines, open interest and instrument listing over REST.

mod client;
mod types;

pub use client::BybitClient;
pub use types::{kline_interval, open_interest_interval};
