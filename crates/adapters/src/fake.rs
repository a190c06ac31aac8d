// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake lock backend for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use crate::memory::MemoryBackend;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_core::{
    AcquireOutcome, BackendHealth, BackendStats, CleanupReport, EnhancedLock, EventBus,
    EventReceiver, FakeClock, LockBackend, LockError, LockRequest, QueueEntry, QueueStatus,
    ReleaseOutcome, ResourceIdentifier, SequentialIdGen, StarvationPolicy,
};

/// Recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    TryAcquire { request_id: String, resource: String },
    Release { lock_id: String },
    Refresh { lock_id: String },
    Transfer { lock_id: String, new_owner: String },
    Enqueue { request_id: String },
    Dequeue { resource: String },
    RemoveQueued { request_id: String },
    Boost,
    ExpireQueued,
    Cleanup,
    Subscribe,
}

#[derive(Default)]
struct Failures {
    /// Fail every call with this message until recovered
    persistent: Option<String>,
    /// Fail this many upcoming calls
    remaining: usize,
}

/// In-process backend with call recording and failure injection
///
/// State lives in a `MemoryBackend` driven by a shared `FakeClock`, so tests
/// move time forward with `clock().advance(..)`.
#[derive(Clone)]
pub struct FakeBackend {
    inner: MemoryBackend<FakeClock, SequentialIdGen>,
    clock: FakeClock,
    calls: Arc<Mutex<Vec<BackendCall>>>,
    failures: Arc<Mutex<Failures>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::with_clock(FakeClock::new())
    }

    pub fn with_clock(clock: FakeClock) -> Self {
        Self {
            inner: MemoryBackend::with_clock(clock.clone(), SequentialIdGen::new("lock")),
            clock,
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Failures::default())),
        }
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.inner = self.inner.with_max_queue_size(max);
        self
    }

    pub fn clock(&self) -> &FakeClock {
        &self.clock
    }

    pub fn events(&self) -> &EventBus {
        self.inner.events()
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Fail every call (and report unhealthy) until `recover`
    pub fn fail_all(&self, message: impl Into<String>) {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).persistent = Some(message.into());
    }

    /// Fail the next `n` calls
    pub fn fail_times(&self, n: usize) {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).remaining = n;
    }

    pub fn recover(&self) {
        *self.failures.lock().unwrap_or_else(|e| e.into_inner()) = Failures::default();
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn check(&self) -> Result<(), LockError> {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(message) = &failures.persistent {
            return Err(LockError::Backend(message.clone()));
        }
        if failures.remaining > 0 {
            failures.remaining -= 1;
            return Err(LockError::Backend("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn try_acquire_lock(&self, request: &LockRequest) -> Result<AcquireOutcome, LockError> {
        self.record(BackendCall::TryAcquire {
            request_id: request.id.clone(),
            resource: request.resource.to_string(),
        });
        self.check()?;
        self.inner.try_acquire_lock(request).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<ReleaseOutcome, LockError> {
        self.record(BackendCall::Release {
            lock_id: lock_id.to_string(),
        });
        self.check()?;
        self.inner.release_lock(lock_id).await
    }

    async fn get_lock(&self, lock_id: &str) -> Result<Option<EnhancedLock>, LockError> {
        self.check()?;
        self.inner.get_lock(lock_id).await
    }

    async fn get_resource_lock(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<EnhancedLock>, LockError> {
        self.check()?;
        self.inner.get_resource_lock(resource).await
    }

    async fn list_locks(&self) -> Result<Vec<EnhancedLock>, LockError> {
        self.check()?;
        self.inner.list_locks().await
    }

    async fn refresh_lock(
        &self,
        lock_id: &str,
        extension: Duration,
    ) -> Result<EnhancedLock, LockError> {
        self.record(BackendCall::Refresh {
            lock_id: lock_id.to_string(),
        });
        self.check()?;
        self.inner.refresh_lock(lock_id, extension).await
    }

    async fn transfer_lock(
        &self,
        lock_id: &str,
        new_owner: &str,
    ) -> Result<EnhancedLock, LockError> {
        self.record(BackendCall::Transfer {
            lock_id: lock_id.to_string(),
            new_owner: new_owner.to_string(),
        });
        self.check()?;
        self.inner.transfer_lock(lock_id, new_owner).await
    }

    async fn enqueue_lock_request(&self, request: &LockRequest) -> Result<usize, LockError> {
        self.record(BackendCall::Enqueue {
            request_id: request.id.clone(),
        });
        self.check()?;
        self.inner.enqueue_lock_request(request).await
    }

    async fn dequeue_next_request(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<QueueEntry>, LockError> {
        self.record(BackendCall::Dequeue {
            resource: resource.to_string(),
        });
        self.check()?;
        self.inner.dequeue_next_request(resource).await
    }

    async fn remove_queued_request(
        &self,
        resource: &ResourceIdentifier,
        request_id: &str,
    ) -> Result<bool, LockError> {
        self.record(BackendCall::RemoveQueued {
            request_id: request_id.to_string(),
        });
        self.check()?;
        self.inner.remove_queued_request(resource, request_id).await
    }

    async fn get_queue_status(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<QueueStatus, LockError> {
        self.check()?;
        self.inner.get_queue_status(resource).await
    }

    async fn boost_waiting(&self, policy: &StarvationPolicy) -> Result<usize, LockError> {
        self.record(BackendCall::Boost);
        self.check()?;
        self.inner.boost_waiting(policy).await
    }

    async fn expire_queued(&self, max_age: Duration) -> Result<usize, LockError> {
        self.record(BackendCall::ExpireQueued);
        self.check()?;
        self.inner.expire_queued(max_age).await
    }

    async fn health_check(&self) -> BackendHealth {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match &failures.persistent {
            Some(message) => BackendHealth::down(Duration::ZERO, message.clone()),
            None => BackendHealth::up(Duration::ZERO),
        }
    }

    async fn get_stats(&self) -> Result<BackendStats, LockError> {
        self.check()?;
        let mut stats = self.inner.get_stats().await?;
        stats.backend = self.name().to_string();
        Ok(stats)
    }

    async fn subscribe(&self, patterns: &[&str]) -> Result<EventReceiver, LockError> {
        self.record(BackendCall::Subscribe);
        self.check()?;
        self.inner.subscribe(patterns).await
    }

    async fn cleanup_expired_locks(&self) -> Result<CleanupReport, LockError> {
        self.record(BackendCall::Cleanup);
        self.check()?;
        self.inner.cleanup_expired_locks().await
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
