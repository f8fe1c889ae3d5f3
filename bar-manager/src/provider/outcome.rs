//! Tagged result for vendor calls that may return benign error codes
//!
//! Some exchange error codes mean "nothing to do" rather than failure, e.g.
//! a reduce-only order against a flat position or a trading-stop update
//! with unchanged values. Callers compose [`suppress_codes`] around the raw
//! call instead of changing how the client reports errors.

use tracing::debug;

use super::{ProviderError, ProviderResult};

/// Reduce-only order would not reduce the position
pub const CODE_REDUCE_ONLY_REJECTED: i64 = 110017;
/// Trading stop parameters were not modified
pub const CODE_TRADING_STOP_NOT_MODIFIED: i64 = 34040;

/// Result of a vendor call with benign codes separated out
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    Suppressed { code: i64, message: String },
    Err(ProviderError),
}

impl<T> CallOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallOutcome::Ok(_))
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, CallOutcome::Suppressed { .. })
    }

    /// Collapse into `Option`, treating suppressed codes as "no value".
    pub fn into_result(self) -> ProviderResult<Option<T>> {
        match self {
            CallOutcome::Ok(v) => Ok(Some(v)),
            CallOutcome::Suppressed { .. } => Ok(None),
            CallOutcome::Err(e) => Err(e),
        }
    }
}

/// Tag an exchange error whose code is in `codes` as suppressed
pub fn suppress_codes<T>(result: ProviderResult<T>, codes: &[i64]) -> CallOutcome<T> {
    match result {
        Ok(v) => CallOutcome::Ok(v),
        Err(ProviderError::Api { code, message }) if codes.contains(&code) => {
            debug!("Suppressed exchange code {}: {}", code, message);
            CallOutcome::Suppressed { code, message }
        }
        Err(e) => CallOutcome::Err(e),
    }
}
