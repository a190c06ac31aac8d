// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for lock coordination

use std::time::Duration;
use thiserror::Error;

/// Errors returned by backends and the lock manager
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LockError {
    #[error("{}", exists_reason(holder, *pull))]
    LockExists {
        resource: String,
        holder: String,
        /// Pull request of the holder, when known
        pull: Option<u64>,
    },
    #[error("lock not found: {0}")]
    LockNotFound(String),
    #[error("lock expired: {0}")]
    LockExpired(String),
    #[error("timed out after {} waiting for {resource}", humantime::format_duration(*waited))]
    Timeout { resource: String, waited: Duration },
    #[error("queue full for {resource} (max {max})")]
    QueueFull { resource: String, max: usize },
    #[error("deadlock: request {request_id} would wait on cycle [{}]", cycle.join(" -> "))]
    Deadlock {
        request_id: String,
        cycle: Vec<String>,
    },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("cluster conflict on {resource}: {reason}")]
    ClusterConflict { resource: String, reason: String },
    #[error("leader election in progress")]
    ElectionInProgress,
    #[error("lock manager is shutting down")]
    ShuttingDown,
}

/// Human-readable reason a lock could not be taken
pub fn exists_reason(holder: &str, pull: Option<u64>) -> String {
    match pull {
        Some(num) if num > 0 => format!(
            "This project is currently locked by an unapplied plan from pull #{} (by {})",
            num, holder
        ),
        _ => format!("This project is currently locked by {}", holder),
    }
}

/// Fieldless mirror of `LockError` for metrics and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LockExists,
    LockNotFound,
    LockExpired,
    Timeout,
    QueueFull,
    Deadlock,
    Backend,
    InvalidRequest,
    PermissionDenied,
    ClusterConflict,
    ElectionInProgress,
    ShuttingDown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LockExists => "lock_exists",
            ErrorKind::LockNotFound => "lock_not_found",
            ErrorKind::LockExpired => "lock_expired",
            ErrorKind::Timeout => "timeout",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::Deadlock => "deadlock",
            ErrorKind::Backend => "backend_error",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ClusterConflict => "cluster_conflict",
            ErrorKind::ElectionInProgress => "election_in_progress",
            ErrorKind::ShuttingDown => "shutting_down",
        }
    }
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::LockExists { .. } => ErrorKind::LockExists,
            LockError::LockNotFound(_) => ErrorKind::LockNotFound,
            LockError::LockExpired(_) => ErrorKind::LockExpired,
            LockError::Timeout { .. } => ErrorKind::Timeout,
            LockError::QueueFull { .. } => ErrorKind::QueueFull,
            LockError::Deadlock { .. } => ErrorKind::Deadlock,
            LockError::Backend(_) => ErrorKind::Backend,
            LockError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            LockError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            LockError::ClusterConflict { .. } => ErrorKind::ClusterConflict,
            LockError::ElectionInProgress => ErrorKind::ElectionInProgress,
            LockError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Transient store failures may be retried; everything else is definitive
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Backend(_))
    }

    pub fn backend(message: impl std::fmt::Display) -> Self {
        LockError::Backend(message.to_string())
    }
}

impl From<serde_json::Error> for LockError {
    fn from(e: serde_json::Error) -> Self {
        LockError::Backend(format!("serialization: {}", e))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
