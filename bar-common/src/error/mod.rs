//! Error classification shared by every layer of the bar stack.
//!
//! Each crate defines its own `thiserror` enums and implements
//! [`ErrorClassification`] so retry and restart decisions can be made
//! without matching on concrete variants.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bar_common::error::{ErrorCategory, ErrorClassification};
//!
//! fn should_cool_down(err: &impl ErrorClassification) -> bool {
//!     err.category() == ErrorCategory::ResourceExhausted
//! }
//! ```

mod traits;

pub use traits::*;
