// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock, deadlock and cluster events

use crate::model::{EnhancedLock, ResourceIdentifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common payload of lock lifecycle events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Resource key suffix, `namespace:path:workspace`
    pub key: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub lock_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(
        resource: &ResourceIdentifier,
        owner: impl Into<String>,
        lock_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            key: resource.key(),
            owner: owner.into(),
            lock_id: lock_id.into(),
            timestamp,
        }
    }

    pub fn of(lock: &EnhancedLock, timestamp: DateTime<Utc>) -> Self {
        Self::new(&lock.resource, &lock.owner, &lock.id, timestamp)
    }
}

/// Events published by backends, the lock manager and the cluster coordinator
///
/// Serialized with an `action` tag so remote payloads such as
/// `{"action":"acquired","key":…,"owner":…,"lock_id":…,"timestamp":…}`
/// decode directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LockEvent {
    // -- lock --
    Acquired(LockInfo),
    Released(LockInfo),
    /// Holder released and the queue head was promoted in the same step
    Transferred(LockInfo),
    Refreshed(LockInfo),
    OwnerChanged(LockInfo),
    Queued {
        #[serde(flatten)]
        info: LockInfo,
        position: u64,
    },
    Promoted(LockInfo),
    Timeout(LockInfo),
    AutoReleased(LockInfo),
    Cancelled(LockInfo),
    ExpiredCleanup(LockInfo),

    // -- deadlock --
    DeadlockPrevented {
        request_id: String,
        cycle: Vec<String>,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    DeadlockDetected {
        id: String,
        cycle: Vec<String>,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    DeadlockResolved {
        id: String,
        victim: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },

    // -- cluster --
    NodeJoined {
        node_id: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    NodeLeft {
        node_id: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        node_id: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    LeaderElected {
        node_id: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
}

impl LockEvent {
    /// Pattern-matchable name, e.g. `lock:acquired` or `cluster:leader_elected`
    pub fn name(&self) -> String {
        let (category, action) = match self {
            LockEvent::Acquired(_) => ("lock", "acquired"),
            LockEvent::Released(_) => ("lock", "released"),
            LockEvent::Transferred(_) => ("lock", "transferred"),
            LockEvent::Refreshed(_) => ("lock", "refreshed"),
            LockEvent::OwnerChanged(_) => ("lock", "owner_changed"),
            LockEvent::Queued { .. } => ("lock", "queued"),
            LockEvent::Promoted(_) => ("lock", "promoted"),
            LockEvent::Timeout(_) => ("lock", "timeout"),
            LockEvent::AutoReleased(_) => ("lock", "auto_released"),
            LockEvent::Cancelled(_) => ("lock", "cancelled"),
            LockEvent::ExpiredCleanup(_) => ("lock", "expired_cleanup"),
            LockEvent::DeadlockPrevented { .. } => ("deadlock", "prevented"),
            LockEvent::DeadlockDetected { .. } => ("deadlock", "detected"),
            LockEvent::DeadlockResolved { .. } => ("deadlock", "resolved"),
            LockEvent::NodeJoined { .. } => ("cluster", "node_joined"),
            LockEvent::NodeLeft { .. } => ("cluster", "node_left"),
            LockEvent::NodeFailed { .. } => ("cluster", "node_failed"),
            LockEvent::LeaderElected { .. } => ("cluster", "leader_elected"),
        };
        format!("{}:{}", category, action)
    }

    /// Lock payload for lock-category events
    pub fn lock_info(&self) -> Option<&LockInfo> {
        match self {
            LockEvent::Acquired(info)
            | LockEvent::Released(info)
            | LockEvent::Transferred(info)
            | LockEvent::Refreshed(info)
            | LockEvent::OwnerChanged(info)
            | LockEvent::Queued { info, .. }
            | LockEvent::Promoted(info)
            | LockEvent::Timeout(info)
            | LockEvent::AutoReleased(info)
            | LockEvent::Cancelled(info)
            | LockEvent::ExpiredCleanup(info) => Some(info),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LockEvent::DeadlockPrevented { timestamp, .. }
            | LockEvent::DeadlockDetected { timestamp, .. }
            | LockEvent::DeadlockResolved { timestamp, .. }
            | LockEvent::NodeJoined { timestamp, .. }
            | LockEvent::NodeLeft { timestamp, .. }
            | LockEvent::NodeFailed { timestamp, .. }
            | LockEvent::LeaderElected { timestamp, .. } => *timestamp,
            other => other
                .lock_info()
                .map(|info| info.timestamp)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
