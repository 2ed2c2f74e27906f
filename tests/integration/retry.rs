//! Integration test: transient backend failures under exponential backoff.
//!
//! Runs on the paused tokio clock, so backoff sleeps complete instantly
//! while the recorded attempt times still reflect the scheduled delays.

use std::time::Duration;

use cairn_backend::{BackendError, Op};
use cairn_core::{ErrorKind, FetchRequest};
use cairn_integration_tests::{Harness, test_data};

/// A range read of a 1 MB object survives two failures: three attempts,
/// each gap longer than the one before.
#[tokio::test(start_paused = true)]
async fn test_range_read_after_two_failures() {
    let h = Harness::new(16 * 1024 * 1024);
    let data = test_data(1024 * 1024);
    let cid = h.seed(&data).await;

    h.faulty.fail_next(
        Op::GetRange,
        2,
        BackendError::ConnectionReset("connection reset by peer".into()),
    );
    let fetched = h
        .layer
        .fetch(FetchRequest::new(cid).range(1000, 2000))
        .await
        .unwrap();

    assert_eq!(fetched.data, &data[1000..2000]);
    assert_eq!(h.range_calls(), 3);

    let times = h.faulty.range_attempt_times();
    assert_eq!(times.len(), 3);
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= Duration::from_millis(100), "{first_gap:?}");
    assert!(second_gap > first_gap, "{first_gap:?} then {second_gap:?}");
}

/// Timeouts count as transient: a hung attempt is abandoned and retried.
#[tokio::test(start_paused = true)]
async fn test_hung_attempt_times_out_and_retries() {
    let h = Harness::new(16 * 1024 * 1024);
    let data = test_data(4096);
    let cid = h.seed(&data).await;

    h.faulty.inject(Op::GetRange, cairn_backend::Fault::Hang);
    let fetched = h.layer.fetch(FetchRequest::new(cid)).await.unwrap();
    assert_eq!(fetched.data, data);
    assert_eq!(h.range_calls(), 2);

    let times = h.faulty.range_attempt_times();
    assert!(times[1] - times[0] >= Duration::from_secs(30));
}

/// When every attempt fails the caller sees a single connectivity failure.
#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_surfaces_connectivity_failure() {
    let h = Harness::new(16 * 1024 * 1024);
    let cid = h.seed(&test_data(4096)).await;

    h.faulty.fail_next(
        Op::GetRange,
        5,
        BackendError::Timeout(Duration::from_secs(1)),
    );
    let err = h
        .layer
        .fetch(FetchRequest::new(cid).range(0, 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert_eq!(h.range_calls(), 5);

    // The budget is per call; the next fetch starts fresh and succeeds.
    let fetched = h
        .layer
        .fetch(FetchRequest::new(cid).range(0, 10))
        .await
        .unwrap();
    assert_eq!(fetched.data.len(), 10);
}

/// Non-retryable failures are surfaced without a second attempt.
#[tokio::test(start_paused = true)]
async fn test_unauthorized_is_not_retried() {
    let h = Harness::new(16 * 1024 * 1024);
    let cid = h.seed(&test_data(4096)).await;

    h.faulty.fail_next(
        Op::GetRange,
        1,
        BackendError::Unauthorized("token expired".into()),
    );
    let err = h.layer.fetch(FetchRequest::new(cid)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(h.range_calls(), 1);
}
