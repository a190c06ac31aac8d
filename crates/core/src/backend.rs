// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend contracts
//!
//! `LockBackend` is the enhanced store (remote or in-process). `LegacyBackend`
//! is the single-node interface older callers are written against.

use crate::error::LockError;
use crate::events::EventReceiver;
use crate::model::{EnhancedLock, LockRequest, Project, ProjectLock, QueueEntry, ResourceIdentifier};
use crate::queue::{QueueStatus, StarvationPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of a non-blocking acquisition attempt
#[derive(Clone, Debug, PartialEq)]
pub enum AcquireOutcome {
    Acquired(EnhancedLock),
    /// Resource held; the request waits in the queue as `lock` (state Pending)
    Queued { lock: EnhancedLock, position: usize },
    /// Resource held and the request asked not to queue
    Held(EnhancedLock),
}

impl AcquireOutcome {
    pub fn acquired(&self) -> Option<&EnhancedLock> {
        match self {
            AcquireOutcome::Acquired(lock) => Some(lock),
            _ => None,
        }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }
}

/// Result of a release
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseOutcome {
    pub released: EnhancedLock,
    /// Queue head promoted in the same atomic step
    pub promoted: Option<EnhancedLock>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub healthy: bool,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub detail: String,
}

impl BackendHealth {
    pub fn up(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency,
            detail: "ok".to_string(),
        }
    }

    pub fn down(latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency,
            detail: detail.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub active_locks: usize,
    pub queued_requests: usize,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_promoted: u64,
    pub backend: String,
}

/// Outcome of one expired-lock sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub scanned: usize,
    pub cleaned: usize,
    /// The scan stopped at its batch bound with keys left to visit
    pub more: bool,
}

// =============================================================================
// Enhanced backend
// =============================================================================

/// Store of enhanced locks and their wait queues
///
/// Every state-changing operation is atomic: a holder check and the mutation
/// it guards happen in one step, and a release promotes the queue head in the
/// same step.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Short name for logs and stats
    fn name(&self) -> &'static str;

    /// Acquire or fail with `LockExists` naming the holder
    async fn acquire_lock(&self, request: &LockRequest) -> Result<EnhancedLock, LockError> {
        let request = request.clone().queued(false);
        match self.try_acquire_lock(&request).await? {
            AcquireOutcome::Acquired(lock) => Ok(lock),
            AcquireOutcome::Held(holder) | AcquireOutcome::Queued { lock: holder, .. } => {
                Err(LockError::LockExists {
                    resource: request.resource.to_string(),
                    pull: holder.pull_num(),
                    holder: holder.owner,
                })
            }
        }
    }

    async fn try_acquire_lock(&self, request: &LockRequest) -> Result<AcquireOutcome, LockError>;

    /// Release the lock with this id; a lock id that does not hold is `LockNotFound`
    async fn release_lock(&self, lock_id: &str) -> Result<ReleaseOutcome, LockError>;

    /// A held lock or queued pending lock by id
    async fn get_lock(&self, lock_id: &str) -> Result<Option<EnhancedLock>, LockError>;

    /// Current holder of a resource
    async fn get_resource_lock(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<EnhancedLock>, LockError>;

    async fn list_locks(&self) -> Result<Vec<EnhancedLock>, LockError>;

    async fn refresh_lock(&self, lock_id: &str, extension: Duration)
        -> Result<EnhancedLock, LockError>;

    async fn transfer_lock(&self, lock_id: &str, new_owner: &str)
        -> Result<EnhancedLock, LockError>;

    /// Queue a request regardless of holder, returning its 1-based position
    async fn enqueue_lock_request(&self, request: &LockRequest) -> Result<usize, LockError>;

    async fn dequeue_next_request(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<QueueEntry>, LockError>;

    async fn remove_queued_request(
        &self,
        resource: &ResourceIdentifier,
        request_id: &str,
    ) -> Result<bool, LockError>;

    async fn get_queue_status(&self, resource: &ResourceIdentifier)
        -> Result<QueueStatus, LockError>;

    /// Apply starvation boosts, returning how many entries changed
    async fn boost_waiting(&self, policy: &StarvationPolicy) -> Result<usize, LockError>;

    /// Drop queued entries older than `max_age`, returning how many
    async fn expire_queued(&self, max_age: Duration) -> Result<usize, LockError>;

    async fn health_check(&self) -> BackendHealth;

    async fn get_stats(&self) -> Result<BackendStats, LockError>;

    /// Receive events matching the patterns; an empty list means everything
    async fn subscribe(&self, patterns: &[&str]) -> Result<EventReceiver, LockError>;

    async fn cleanup_expired_locks(&self) -> Result<CleanupReport, LockError>;

    async fn get_legacy_lock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        let lock = self
            .get_resource_lock(&project.resource(workspace))
            .await?;
        Ok(lock.map(|l| l.to_legacy()))
    }

    fn convert_to_legacy(&self, lock: &EnhancedLock) -> ProjectLock {
        lock.to_legacy()
    }

    fn convert_from_legacy(&self, lock: &ProjectLock, lock_id: &str) -> EnhancedLock {
        EnhancedLock::from_legacy(lock, lock_id)
    }
}

// =============================================================================
// Legacy backend
// =============================================================================

/// The single-node lock interface
#[async_trait]
pub trait LegacyBackend: Send + Sync {
    /// Returns `(true, lock)` when taken, `(false, holder)` when already locked
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock), LockError>;

    /// Remove and return the lock; a missing lock is `Ok(None)`
    async fn unlock(&self, project: &Project, workspace: &str)
        -> Result<Option<ProjectLock>, LockError>;

    async fn list(&self) -> Result<Vec<ProjectLock>, LockError>;

    /// Remove every lock of `repo` held by pull request `pull_num`
    async fn unlock_by_pull(&self, repo: &str, pull_num: u64)
        -> Result<Vec<ProjectLock>, LockError>;

    async fn get_lock(&self, project: &Project, workspace: &str)
        -> Result<Option<ProjectLock>, LockError>;
}
