//! Logging configuration and initialization.

use std::env;

use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %z";
const UTC_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable format with colors when attached to a terminal
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl LogFormat {
    /// Parse format from string, falling back to `Pretty`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Timestamp format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
    None,
}

impl TimestampFormat {
    /// Parse format from string, falling back to `Local`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "utc" => TimestampFormat::Utc,
            "none" | "off" => TimestampFormat::None,
            _ => TimestampFormat::Local,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub timestamps: TimestampFormat,
    /// Default log level filter, used when `RUST_LOG` is not set
    pub default_level: String,
    /// Include source file location
    pub include_location: bool,
    pub include_thread_ids: bool,
    /// Include target (module path)
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            timestamps: TimestampFormat::Local,
            default_level: "info".to_string(),
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    ///
    /// Reads:
    /// - `LOG_FORMAT`: pretty, compact, or json
    /// - `LOG_TIMESTAMPS`: local, utc, or none
    /// - `LOG_LEVEL`: default log level (fallback if RUST_LOG not set)
    /// - `LOG_LOCATION`: true/false for file:line info
    /// - `LOG_THREAD_IDS`: true/false for thread IDs
    pub fn from_env() -> Self {
        Self {
            format: env::var("LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
            timestamps: env::var("LOG_TIMESTAMPS")
                .map(|s| TimestampFormat::parse(&s))
                .unwrap_or_default(),
            default_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            include_location: env::var("LOG_LOCATION")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            include_thread_ids: env::var("LOG_THREAD_IDS")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            include_target: true,
        }
    }

    /// Set the default log level
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Raise the default level to `debug` when `verbose` is set
    pub fn verbose(self, verbose: bool) -> Self {
        if verbose {
            self.with_default_level("debug")
        } else {
            self
        }
    }
}

/// Initialize logging with the given configuration
///
/// # Errors
///
/// Returns an error if the subscriber cannot be initialized (e.g., already set)
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    tracing_subscriber::registry()
        .with(build_layer(&config))
        .with(env_filter)
        .try_init()?;

    Ok(())
}

fn build_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let ansi = config.format != LogFormat::Json && atty::is(atty::Stream::Stdout);
    let base = fmt::layer()
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Json => {
            let layer = base.json();
            match config.timestamps {
                TimestampFormat::Local => layer.with_timer(local_timer()).boxed(),
                TimestampFormat::Utc => layer.with_timer(utc_timer()).boxed(),
                TimestampFormat::None => layer.without_time().boxed(),
            }
        }
        LogFormat::Compact => {
            let layer = base.compact();
            match config.timestamps {
                TimestampFormat::Local => layer.with_timer(local_timer()).boxed(),
                TimestampFormat::Utc => layer.with_timer(utc_timer()).boxed(),
                TimestampFormat::None => layer.without_time().boxed(),
            }
        }
        LogFormat::Pretty => match config.timestamps {
            TimestampFormat::Local => base.with_timer(local_timer()).boxed(),
            TimestampFormat::Utc => base.with_timer(utc_timer()).boxed(),
            TimestampFormat::None => base.without_time().boxed(),
        },
    }
}

fn local_timer() -> ChronoLocal {
    ChronoLocal::new(LOCAL_TIME_FORMAT.to_string())
}

fn utc_timer() -> ChronoUtc {
    ChronoUtc::new(UTC_TIME_FORMAT.to_string())
}
