//! Correlator behaviour across tasks

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use std::time::Duration;

use monsrv::{CorrelationError, Correlator, DeliveryOutcome};
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(10);

#[tokio::test]
async fn test_concurrent_waiters_share_one_delivery() {
    let correlator: Correlator<String> = Correlator::new();
    let cancel = CancellationToken::new();

    let first = correlator.register("QPIGS");
    let second = correlator.register("QPIGS");
    assert_eq!(correlator.pending_count(), 2);

    let waiters = {
        let correlator = correlator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let a = correlator.await_result(&first, POLL, Duration::from_secs(5), &cancel);
            let b = correlator.await_result(&second, POLL, Duration::from_secs(5), &cancel);
            tokio::join!(a, b)
        })
    };

    tokio::task::yield_now().await;
    assert_eq!(
        correlator.deliver("QPIGS", "230.0".to_string()),
        DeliveryOutcome::Delivered(2)
    );

    let (a, b) = waiters.await.unwrap();
    assert_eq!(a.unwrap(), "230.0");
    assert_eq!(b.unwrap(), "230.0");
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn test_delivery_without_waiter_is_dropped() {
    let correlator: Correlator<u32> = Correlator::new();

    assert_eq!(correlator.deliver("QMOD", 1), DeliveryOutcome::Dropped);
    let handle = correlator.register("QPIGS");
    assert_eq!(correlator.deliver("QMOD", 2), DeliveryOutcome::Dropped);

    assert_eq!(correlator.dropped_count(), 2);
    assert!(!handle.is_done());
}

#[tokio::test(start_paused = true)]
async fn test_await_times_out() {
    let correlator: Correlator<u32> = Correlator::new();
    let handle = correlator.register("GS");

    let started = tokio::time::Instant::now();
    let err = correlator
        .await_result(&handle, POLL, Duration::from_millis(500), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        CorrelationError::TimedOut {
            key: "GS".to_string(),
            after: Duration::from_millis(500),
        }
    );
    assert!(started.elapsed() >= Duration::from_millis(500));

    // A late result is not lost for a handle still held
    correlator.deliver("GS", 7);
    assert!(handle.is_done());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_ends_wait() {
    let correlator: Correlator<u32> = Correlator::new();
    let handle = correlator.register("SOC");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = correlator
        .await_result(&handle, POLL, Duration::from_secs(60), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CorrelationError::Cancelled { .. }));
}
