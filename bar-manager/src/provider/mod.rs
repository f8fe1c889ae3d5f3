//! Exchange data providers
//!
//! - [`KlineSource`]: raw exchange surface, implemented by [`bybit::BybitClient`]
//!   and [`mock::MockKlineSource`]
//! - [`RateController`]: process-wide concurrency bound and adaptive pacing
//! - [`BarFetcher`]: composes the two and normalizes pages into bars

pub mod bybit;
mod fetcher;
pub mod mock;
pub mod normalizer;
pub mod outcome;
pub mod rate_control;
mod traits;

pub use fetcher::BarFetcher;
pub use outcome::{suppress_codes, CallOutcome};
pub use rate_control::{is_rate_limit_signal, RateController, RateState};
pub use traits::*;

#[cfg(test)]
mod rate_control_tests;
