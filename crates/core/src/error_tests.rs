// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn lock_exists_names_pull_request_when_known() {
    let err = LockError::LockExists {
        resource: "owner/repo/./default".to_string(),
        holder: "alice".to_string(),
        pull: Some(12),
    };
    let message = err.to_string();
    assert!(message.contains("pull #12"), "{}", message);
    assert!(message.contains("alice"), "{}", message);
}

#[test]
fn lock_exists_without_pull_names_owner() {
    let err = LockError::LockExists {
        resource: "r".to_string(),
        holder: "bob".to_string(),
        pull: None,
    };
    assert_eq!(err.to_string(), "This project is currently locked by bob");
}

#[test]
fn timeout_message_is_human_readable() {
    let err = LockError::Timeout {
        resource: "owner/repo/./default".to_string(),
        waited: Duration::from_secs(90),
    };
    assert_eq!(
        err.to_string(),
        "timed out after 1m 30s waiting for owner/repo/./default"
    );
}

#[parameterized(
    backend_is_retryable = { LockError::Backend("connection reset".into()), true },
    deadlock_is_final = { LockError::Deadlock { request_id: "r".into(), cycle: vec![] }, false },
    queue_full_is_final = { LockError::QueueFull { resource: "r".into(), max: 1 }, false },
    exists_is_final = { LockError::LockExists { resource: "r".into(), holder: "h".into(), pull: None }, false },
    invalid_is_final = { LockError::InvalidRequest("x".into()), false },
)]
fn retry_classification(err: LockError, retryable: bool) {
    assert_eq!(err.is_retryable(), retryable);
}

#[test]
fn kind_names_are_stable() {
    assert_eq!(LockError::ElectionInProgress.kind().as_str(), "election_in_progress");
    assert_eq!(LockError::backend("x").kind(), ErrorKind::Backend);
}

#[test]
fn serde_errors_become_backend_errors() {
    let parse: Result<u8, _> = serde_json::from_str("nope");
    let err: LockError = parse.unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::Backend);
}
