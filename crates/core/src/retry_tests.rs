// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use yare::parameterized;

fn policy(strategy: RetryStrategy) -> RetryPolicy {
    RetryPolicy {
        strategy,
        ..RetryPolicy::default()
    }
}

#[parameterized(
    fixed = { RetryStrategy::Fixed, 3, 100 },
    linear = { RetryStrategy::Linear, 3, 300 },
    exponential_first = { RetryStrategy::Exponential, 1, 100 },
    exponential_third = { RetryStrategy::Exponential, 3, 400 },
    exponential_capped = { RetryStrategy::Exponential, 12, 5_000 },
)]
fn base_backoff(strategy: RetryStrategy, retry: u32, expected_ms: u64) {
    assert_eq!(
        policy(strategy).base_backoff(retry),
        Duration::from_millis(expected_ms)
    );
}

#[test]
fn jitter_stays_within_ten_percent() {
    let p = RetryPolicy::default();
    for _ in 0..100 {
        let d = p.backoff(2).as_millis();
        assert!((180..=220).contains(&d), "{}", d);
    }
}

#[tokio::test]
async fn retries_backend_errors_until_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut retried = Vec::new();
    let result = RetryPolicy::for_testing()
        .run(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(LockError::backend("connection refused"))
                    } else {
                        Ok(7)
                    }
                }
            },
            |n, _| retried.push(n),
        )
        .await;
    assert_eq!(result, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(retried, vec![1, 2]);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let result: Result<(), _> = RetryPolicy::for_testing()
        .run(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(LockError::backend("down"))
                }
            },
            |_, _| {},
        )
        .await;
    assert!(matches!(result, Err(LockError::Backend(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn definitive_errors_are_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let result: Result<(), _> = RetryPolicy::for_testing()
        .run(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(LockError::QueueFull {
                        resource: "r".into(),
                        max: 1,
                    })
                }
            },
            |_, _| {},
        )
        .await;
    assert!(matches!(result, Err(LockError::QueueFull { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
