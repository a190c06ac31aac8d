// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock records, requests and queue entries

use super::legacy::ProjectLock;
use super::resource::ResourceIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Width of one priority band in a queue score.
///
/// Enqueue times are unix milliseconds, which stay well below this value, so
/// bands never overlap and scores remain exact as IEEE doubles.
pub const PRIORITY_BAND: i64 = 10_000_000_000_000;

/// Request priority
///
/// Higher priorities move ahead in the wait queue but never preempt a held lock.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Raise by `levels`, saturating at `Critical`
    pub fn boosted(self, levels: u8) -> Priority {
        Priority::try_from(self.as_u8().saturating_add(levels).min(3)).unwrap_or(Priority::Critical)
    }

    pub fn all() -> [Priority; 4] {
        [Priority::Low, Priority::Normal, Priority::High, Priority::Critical]
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            other => Err(format!("invalid priority: {}", other)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a lock record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    /// Queued waiter, not yet holding
    Pending,
    Acquired,
    Expired,
    Released,
}

/// A lock record owned by a backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnhancedLock {
    pub id: String,
    pub resource: ResourceIdentifier,
    pub state: LockState,
    pub priority: Priority,
    pub owner: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub acquired_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    /// Bumped on refresh and transfer
    pub version: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Legacy lock this record was created from
    #[serde(default, rename = "original_lock", skip_serializing_if = "Option::is_none")]
    pub original: Option<ProjectLock>,
}

impl EnhancedLock {
    /// A held lock granted to `request` at `now`
    pub fn acquired(request: &LockRequest, lock_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: lock_id.into(),
            resource: request.resource.clone(),
            state: LockState::Acquired,
            priority: request.priority,
            owner: request.owner.clone(),
            acquired_at: now,
            expires_at: request.expiry_from(now),
            version: 1,
            metadata: request.metadata.clone(),
            request_id: Some(request.id.clone()),
            original: request.original.clone(),
        }
    }

    /// A waiting lock for a queued request
    pub fn pending(request: &LockRequest, lock_id: impl Into<String>) -> Self {
        Self {
            state: LockState::Pending,
            acquired_at: request.requested_at,
            expires_at: None,
            ..Self::acquired(request, lock_id, request.requested_at)
        }
    }

    pub fn is_held(&self) -> bool {
        self.state == LockState::Acquired
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Time left before expiry, `None` when the lock never expires
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Pull request number of the legacy lock this record wraps
    pub fn pull_num(&self) -> Option<u64> {
        self.original.as_ref().map(|l| l.pull.num)
    }
}

/// A request to lock a resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    pub id: String,
    pub resource: ResourceIdentifier,
    pub priority: Priority,
    /// Lock lifetime once granted and the bound on queued waiting
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub requested_at: DateTime<Utc>,
    pub owner: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Enqueue atomically when the resource is held
    #[serde(default)]
    pub queue_if_held: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<ProjectLock>,
}

impl LockRequest {
    pub fn new(
        id: impl Into<String>,
        resource: ResourceIdentifier,
        owner: impl Into<String>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            resource,
            priority: Priority::Normal,
            timeout: Duration::ZERO,
            requested_at,
            owner: owner.into(),
            metadata: BTreeMap::new(),
            queue_if_held: false,
            original: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_original(mut self, original: ProjectLock) -> Self {
        self.original = Some(original);
        self
    }

    pub fn queued(mut self, queue_if_held: bool) -> Self {
        self.queue_if_held = queue_if_held;
        self
    }

    /// Expiry for a lock granted at `granted_at`; a zero timeout never expires
    pub fn expiry_from(&self, granted_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.timeout.is_zero() {
            return None;
        }
        chrono::Duration::from_std(self.timeout)
            .ok()
            .map(|ttl| granted_at + ttl)
    }
}

/// A request waiting in a per-resource queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request: LockRequest,
    /// Id the lock will carry once promoted
    pub lock_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
    /// Starvation boost in priority levels
    #[serde(default)]
    pub boost: u8,
}

impl QueueEntry {
    pub fn new(request: LockRequest, lock_id: impl Into<String>, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            request,
            lock_id: lock_id.into(),
            enqueued_at,
            boost: 0,
        }
    }

    pub fn effective_priority(&self) -> Priority {
        self.request.priority.boosted(self.boost)
    }

    /// `(4 - effective_priority) * PRIORITY_BAND + enqueue_millis`; lower ranks first
    pub fn rank(&self) -> i64 {
        (4 - i64::from(self.effective_priority().as_u8())) * PRIORITY_BAND
            + self.enqueued_at.timestamp_millis()
    }

    /// Sorted-set score, the same value as `rank`
    pub fn score(&self) -> f64 {
        self.rank() as f64
    }

    /// The pending lock this entry stands for
    pub fn pending_lock(&self) -> EnhancedLock {
        EnhancedLock::pending(&self.request, self.lock_id.clone())
    }
}

/// Durations as integer milliseconds, the unit store scripts compute in
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
