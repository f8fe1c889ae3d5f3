// bar-common: shared bar model, error classification and logging.
// Used by bar-manager (ingestion and cache) and by downstream consumers of the cache.

pub mod data;
pub mod error;
pub mod logging;

pub use data::{is_valid_symbol, Bar, BarKey, DataError, Timeframe};
pub use error::{ErrorCategory, ErrorClassification};
