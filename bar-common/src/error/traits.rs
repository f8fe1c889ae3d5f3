//! Error classification traits for retry logic and error handling.

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts)
    Transient,
    /// Permanent errors that won't resolve on retry (invalid input, bad payload)
    Permanent,
    /// Resource exhaustion errors (exchange rate limits, pool exhausted)
    ResourceExhausted,
    /// Configuration errors (missing config, invalid settings)
    Configuration,
    /// Cooperative cancellation, never retried
    Cancelled,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if the error was produced by a shutdown request
    fn is_cancelled(&self) -> bool {
        matches!(self.category(), ErrorCategory::Cancelled)
    }
}
