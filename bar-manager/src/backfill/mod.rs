//! Per-symbol fetch strategies
//!
//! - **Backfill**: walk backward from now toward a floor time, one page at a
//!   time, until the exchange runs dry, the floor is reached, progress
//!   stalls, or the iteration cap is hit.
//! - **Incremental**: fetch one page after the symbol's high-water mark.
//!
//! Failures are recorded into the batch metrics and end only the affected
//! symbol's task.

mod page_size;
mod strategy;

pub use page_size::*;
pub use strategy::*;
