// rate_control_tests.rs - Tests for RateState and RateController

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::rate_control::{classify_failure, is_rate_limit_signal, FailureClass, RateController, RateState};
use super::ProviderError;
use crate::metrics::BatchMetrics;

fn assert_secs(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {} got {}",
        expected,
        actual
    );
}

fn controller(cooldown_secs: u64) -> RateController {
    RateController::new(
        5,
        Duration::from_millis(200),
        Duration::from_secs(1),
        Duration::from_secs(cooldown_secs),
    )
}

// =================================================================
// RateState
// =================================================================

#[test]
fn test_rate_limits_compound_and_cap() {
    let mut state = RateState::new(Duration::from_millis(500), Duration::from_secs(1));

    state.on_rate_limit();
    assert_secs(state.current_secs(), 0.75);
    state.on_rate_limit();
    assert_secs(state.current_secs(), 1.0);
    state.on_rate_limit();
    assert_secs(state.current_secs(), 1.0);

    state.on_success();
    assert_secs(state.current_secs(), 0.99);
}

#[test]
fn test_success_never_drops_below_floor() {
    let mut state = RateState::new(Duration::from_millis(200), Duration::from_secs(1));
    state.on_success();
    assert_secs(state.current_secs(), 0.2);

    state.on_rate_limit();
    assert_secs(state.current_secs(), 0.3);
    for _ in 0..100 {
        state.on_success();
    }
    assert_secs(state.current_secs(), 0.2);
}

#[test]
fn test_three_hits_from_base_delay() {
    let mut state = RateState::new(Duration::from_millis(200), Duration::from_secs(1));
    for _ in 0..3 {
        state.on_rate_limit();
    }
    assert_secs(state.current_secs(), 0.2 * 1.5 * 1.5 * 1.5);
}

// =================================================================
// Failure classification
// =================================================================

#[test]
fn test_rate_limit_detection() {
    assert!(is_rate_limit_signal(&ProviderError::RateLimit("x".into())));
    assert!(is_rate_limit_signal(&ProviderError::Api {
        code: 10006,
        message: "".into()
    }));
    assert!(is_rate_limit_signal(&ProviderError::Api {
        code: 10000,
        message: "Too many visits!".into()
    }));
    assert!(is_rate_limit_signal(&ProviderError::Request(
        "missing header X-Bapi-Limit-Reset-Timestamp".into()
    )));
    assert!(!is_rate_limit_signal(&ProviderError::Parse("bad".into())));
}

#[test]
fn test_classify_failure() {
    assert_eq!(
        classify_failure(&ProviderError::Timeout("t".into())),
        FailureClass::Connection
    );
    assert_eq!(
        classify_failure(&ProviderError::Connection("refused".into())),
        FailureClass::Connection
    );
    assert_eq!(
        classify_failure(&ProviderError::Api {
            code: 10001,
            message: "params error".into()
        }),
        FailureClass::Fatal
    );
}

// =================================================================
// RateController::call
// =================================================================

#[tokio::test(start_paused = true)]
async fn test_call_retries_same_op_after_rate_limit() {
    let rate = controller(60);
    let metrics = BatchMetrics::new();
    let cancel = CancellationToken::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let value = rate
        .call("kline", &metrics, &cancel, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::RateLimit("10006".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let s = metrics.snapshot();
    assert_eq!(s.rate_limit_hits, 2);
    assert_eq!(s.api_calls_failed, 2);
    assert_eq!(s.api_calls_success, 1);
    // 0.2 * 1.5 * 1.5 then one success
    assert_secs(rate.state().current_secs(), 0.45 * 0.99);
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_keeps_delay() {
    let rate = controller(60);
    let metrics = BatchMetrics::new();
    let cancel = CancellationToken::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    rate.call("oi", &metrics, &cancel, move || {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::Timeout("10s".into()))
            } else {
                Ok(())
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let s = metrics.snapshot();
    assert_eq!(s.rate_limit_hits, 0);
    assert_eq!(s.errors.len(), 1);
    assert!(s.errors[0].contains("connection failure"));
    assert_secs(rate.state().current_secs(), 0.2);
}

#[tokio::test(start_paused = true)]
async fn test_pacing_delay_does_not_hold_slot() {
    let rate = Arc::new(RateController::new(
        1,
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(60),
    ));
    let metrics = Arc::new(BatchMetrics::new());
    let cancel = CancellationToken::new();
    let started = tokio::time::Instant::now();
    let entered = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let rate = rate.clone();
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        let entered = entered.clone();
        tasks.push(tokio::spawn(async move {
            rate.call("kline", &metrics, &cancel, move || {
                let entered = entered.clone();
                async move {
                    entered.lock().push(started.elapsed());
                    Ok::<(), ProviderError>(())
                }
            })
            .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // With a single slot, the second call starts while the first is pacing
    let entered = entered.lock().clone();
    assert_eq!(entered.len(), 2);
    assert!(entered.iter().all(|e| *e < Duration::from_secs(1)));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_propagates_without_retry() {
    let rate = controller(60);
    let metrics = BatchMetrics::new();
    let cancel = CancellationToken::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let err = rate
        .call("kline", &metrics, &cancel, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::Parse("garbage".into()))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Parse(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_token_prevents_call() {
    let rate = controller(60);
    let metrics = BatchMetrics::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = rate
        .call("kline", &metrics, &cancel, || async { Ok(1) })
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Cancelled));
    assert_eq!(metrics.snapshot().api_calls_success, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_cooldown_stops_retrying() {
    let rate = Arc::new(controller(3600));
    let metrics = Arc::new(BatchMetrics::new());
    let cancel = CancellationToken::new();

    let task = {
        let rate = rate.clone();
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            rate.call("kline", &metrics, &cancel, || async {
                Err::<(), _>(ProviderError::RateLimit("busy".into()))
            })
            .await
        })
    };

    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ProviderError::Cancelled));
    assert_eq!(metrics.snapshot().rate_limit_hits, 1);
}
