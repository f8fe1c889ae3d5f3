//! Adaptive pacing for outbound exchange calls
//!
//! Two mechanisms are combined:
//! - a process-wide semaphore bounding in-flight calls
//! - an inter-call delay that shrinks by 1% after each success and grows by
//!   50% after each rate-limit signal, bounded by `[floor, ceiling]`
//!
//! Rate-limit and connection failures are retried after a fixed cooldown
//! until the call succeeds or shutdown is requested.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ProviderError, ProviderResult};
use bar_common::error::ErrorClassification;
use crate::config::RateSettings;
use crate::metrics::BatchMetrics;

const SUCCESS_FACTOR: f64 = 0.99;
const RATE_LIMIT_FACTOR: f64 = 1.5;
const RATE_LIMIT_CODE: i64 = 10006;

/// Current inter-call delay, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateState {
    delay_secs: f64,
    floor_secs: f64,
    ceiling_secs: f64,
}

impl RateState {
    /// Start at the floor
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let floor_secs = floor.as_secs_f64();
        Self {
            delay_secs: floor_secs,
            floor_secs,
            ceiling_secs: ceiling.as_secs_f64().max(floor_secs),
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_secs_f64(self.delay_secs)
    }

    pub fn current_secs(&self) -> f64 {
        self.delay_secs
    }

    pub fn on_success(&mut self) {
        self.delay_secs = (self.delay_secs * SUCCESS_FACTOR).max(self.floor_secs);
    }

    pub fn on_rate_limit(&mut self) {
        self.delay_secs = (self.delay_secs * RATE_LIMIT_FACTOR).min(self.ceiling_secs);
    }
}

/// How a failed call should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    Connection,
    Fatal,
}

/// Returns true if the error signals exchange throttling
pub fn is_rate_limit_signal(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimit(_) => true,
        ProviderError::Api { code, message } => {
            *code == RATE_LIMIT_CODE || message_signals_rate_limit(message)
        }
        ProviderError::Request(message) => message_signals_rate_limit(message),
        _ => false,
    }
}

fn message_signals_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("too many visits")
        || lower.contains("rate limit")
        || lower.contains("x-bapi-limit-reset-timestamp")
}

pub fn classify_failure(err: &ProviderError) -> FailureClass {
    if is_rate_limit_signal(err) {
        FailureClass::RateLimited
    } else if err.is_transient() {
        FailureClass::Connection
    } else {
        FailureClass::Fatal
    }
}

/// Process-wide rate controller, shared by every fetch task
pub struct RateController {
    permits: Semaphore,
    state: Mutex<RateState>,
    cooldown: Duration,
}

impl RateController {
    pub fn new(max_concurrent: usize, floor: Duration, ceiling: Duration, cooldown: Duration) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            state: Mutex::new(RateState::new(floor, ceiling)),
            cooldown,
        }
    }

    pub fn from_settings(settings: &RateSettings) -> Self {
        Self::new(
            settings.max_concurrent_api,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            Duration::from_secs(settings.cooldown_secs),
        )
    }

    pub fn current_delay(&self) -> Duration {
        self.state.lock().current()
    }

    pub fn state(&self) -> RateState {
        *self.state.lock()
    }

    /// Run `op` under the concurrency bound, retrying throttling and
    /// connection failures until it succeeds, fails fatally, or `cancel`
    /// fires.
    pub async fn call<T, F, Fut>(
        &self,
        label: &str,
        metrics: &BatchMetrics,
        cancel: &CancellationToken,
        mut op: F,
    ) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| ProviderError::Internal("rate controller closed".into()))?;
                op().await
            };

            let err = match result {
                Ok(value) => {
                    // Pace after the slot is released
                    tokio::time::sleep(self.current_delay()).await;
                    metrics.record_api_success();
                    self.state.lock().on_success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            metrics.record_api_failure();
            match classify_failure(&err) {
                FailureClass::RateLimited => {
                    metrics.record_rate_limit();
                    let delay = {
                        let mut state = self.state.lock();
                        state.on_rate_limit();
                        state.current()
                    };
                    warn!(
                        "[{}] rate limited ({}), delay now {:.3}s, cooling down {}s",
                        label,
                        err,
                        delay.as_secs_f64(),
                        self.cooldown.as_secs()
                    );
                }
                FailureClass::Connection => {
                    metrics.record_error(format!("[{}] connection failure: {}", label, err));
                    warn!(
                        "[{}] connection failure ({}), cooling down {}s",
                        label,
                        err,
                        self.cooldown.as_secs()
                    );
                }
                FailureClass::Fatal => return Err(err),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("[{}] cooldown interrupted by shutdown", label);
                    return Err(ProviderError::Cancelled);
                }
                _ = tokio::time::sleep(self.cooldown) => {}
            }
        }
    }
}
