//! Standardized logging configuration for the bar stack.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., `info`, `bar_manager=debug`)
//! - `LOG_FORMAT`: Output format - `pretty` (default), `compact`, or `json`
//! - `LOG_TIMESTAMPS`: Timestamp format - `local` (default), `utc`, or `none`
//!
//! # Usage
//!
//! ```rust,ignore
//! use bar_common::logging::{init_logging, LogConfig};
//!
//! init_logging(LogConfig::from_env().with_default_level("debug"))?;
//! ```

mod config;

pub use config::{init_logging, LogConfig, LogFormat, TimestampFormat};
