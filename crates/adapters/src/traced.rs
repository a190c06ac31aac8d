// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced backend wrapper for consistent observability

use async_trait::async_trait;
use std::time::{Duration, Instant};
use warden_core::{
    AcquireOutcome, BackendHealth, BackendStats, CleanupReport, EnhancedLock, EventReceiver,
    LockBackend, LockError, LockRequest, QueueEntry, QueueStatus, ReleaseOutcome,
    ResourceIdentifier, StarvationPolicy,
};

/// Wrapper that adds tracing to any LockBackend
#[derive(Clone)]
pub struct TracedBackend<B> {
    inner: B,
}

impl<B> TracedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[async_trait]
impl<B: LockBackend> LockBackend for TracedBackend<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn try_acquire_lock(&self, request: &LockRequest) -> Result<AcquireOutcome, LockError> {
        let span = tracing::info_span!(
            "backend.acquire",
            backend = self.inner.name(),
            request_id = %request.id,
            resource = %request.resource,
            owner = %request.owner,
        );
        let _guard = span.enter();

        tracing::debug!(
            priority = ?request.priority,
            queue_if_held = request.queue_if_held,
            "attempting"
        );

        let start = Instant::now();
        let result = self.inner.try_acquire_lock(request).await;

        match &result {
            Ok(AcquireOutcome::Acquired(lock)) => {
                tracing::info!(lock_id = %lock.id, elapsed_ms = elapsed_ms(start), "acquired")
            }
            Ok(AcquireOutcome::Queued { lock, position }) => tracing::info!(
                lock_id = %lock.id,
                position,
                elapsed_ms = elapsed_ms(start),
                "queued"
            ),
            Ok(AcquireOutcome::Held(holder)) => {
                tracing::debug!(holder = %holder.owner, elapsed_ms = elapsed_ms(start), "held")
            }
            Err(e) => tracing::error!(elapsed_ms = elapsed_ms(start), error = %e, "acquire failed"),
        }

        result
    }

    async fn release_lock(&self, lock_id: &str) -> Result<ReleaseOutcome, LockError> {
        let span = tracing::info_span!("backend.release", backend = self.inner.name(), lock_id);
        let _guard = span.enter();

        let start = Instant::now();
        let result = self.inner.release_lock(lock_id).await;

        match &result {
            Ok(outcome) => tracing::info!(
                resource = %outcome.released.resource,
                promoted = outcome.promoted.as_ref().map(|l| l.owner.as_str()),
                elapsed_ms = elapsed_ms(start),
                "released"
            ),
            // Releasing an unknown id is a caller mistake, not a store fault
            Err(LockError::LockNotFound(_)) => tracing::warn!("lock not held"),
            Err(e) => tracing::error!(elapsed_ms = elapsed_ms(start), error = %e, "release failed"),
        }

        result
    }

    async fn get_lock(&self, lock_id: &str) -> Result<Option<EnhancedLock>, LockError> {
        let result = self.inner.get_lock(lock_id).await;
        tracing::trace!(lock_id, found = ?result.as_ref().map(Option::is_some).ok(), "get_lock");
        result
    }

    async fn get_resource_lock(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<EnhancedLock>, LockError> {
        let result = self.inner.get_resource_lock(resource).await;
        tracing::trace!(
            %resource,
            holder = ?result.as_ref().ok().and_then(|l| l.as_ref().map(|l| l.owner.clone())),
            "get_resource_lock"
        );
        result
    }

    async fn list_locks(&self) -> Result<Vec<EnhancedLock>, LockError> {
        let result = self.inner.list_locks().await;
        tracing::trace!(count = result.as_ref().map(|v| v.len()).ok(), "listed");
        result
    }

    async fn refresh_lock(
        &self,
        lock_id: &str,
        extension: Duration,
    ) -> Result<EnhancedLock, LockError> {
        let span = tracing::info_span!("backend.refresh", lock_id);
        let _guard = span.enter();

        let result = self.inner.refresh_lock(lock_id, extension).await;
        match &result {
            Ok(lock) => tracing::debug!(
                extension_ms = extension.as_millis() as u64,
                version = lock.version,
                "refreshed"
            ),
            Err(e) => tracing::warn!(error = %e, "refresh failed"),
        }
        result
    }

    async fn transfer_lock(
        &self,
        lock_id: &str,
        new_owner: &str,
    ) -> Result<EnhancedLock, LockError> {
        let span = tracing::info_span!("backend.transfer", lock_id, new_owner);
        let _guard = span.enter();

        let result = self.inner.transfer_lock(lock_id, new_owner).await;
        match &result {
            Ok(_) => tracing::info!("transferred"),
            Err(e) => tracing::warn!(error = %e, "transfer failed"),
        }
        result
    }

    async fn enqueue_lock_request(&self, request: &LockRequest) -> Result<usize, LockError> {
        let span = tracing::info_span!(
            "backend.enqueue",
            request_id = %request.id,
            resource = %request.resource,
        );
        let _guard = span.enter();

        let result = self.inner.enqueue_lock_request(request).await;
        match &result {
            Ok(position) => tracing::info!(position, "enqueued"),
            Err(e) => tracing::warn!(error = %e, "enqueue failed"),
        }
        result
    }

    async fn dequeue_next_request(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<QueueEntry>, LockError> {
        let result = self.inner.dequeue_next_request(resource).await;
        tracing::debug!(
            %resource,
            request_id = ?result.as_ref().ok().and_then(|e| e.as_ref().map(|e| e.request.id.clone())),
            "dequeued"
        );
        result
    }

    async fn remove_queued_request(
        &self,
        resource: &ResourceIdentifier,
        request_id: &str,
    ) -> Result<bool, LockError> {
        let result = self.inner.remove_queued_request(resource, request_id).await;
        tracing::debug!(%resource, request_id, removed = ?result.as_ref().ok(), "remove queued");
        result
    }

    async fn get_queue_status(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<QueueStatus, LockError> {
        self.inner.get_queue_status(resource).await
    }

    async fn boost_waiting(&self, policy: &StarvationPolicy) -> Result<usize, LockError> {
        let result = self.inner.boost_waiting(policy).await;
        match &result {
            Ok(0) => {}
            Ok(changed) => tracing::info!(changed, "boosted waiting requests"),
            Err(e) => tracing::warn!(error = %e, "boost failed"),
        }
        result
    }

    async fn expire_queued(&self, max_age: Duration) -> Result<usize, LockError> {
        let result = self.inner.expire_queued(max_age).await;
        match &result {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "expired queued requests"),
            Err(e) => tracing::warn!(error = %e, "queue expiry failed"),
        }
        result
    }

    async fn health_check(&self) -> BackendHealth {
        let health = self.inner.health_check().await;
        if health.healthy {
            tracing::trace!(latency_ms = health.latency.as_millis() as u64, "healthy");
        } else {
            tracing::warn!(backend = self.inner.name(), detail = %health.detail, "unhealthy");
        }
        health
    }

    async fn get_stats(&self) -> Result<BackendStats, LockError> {
        self.inner.get_stats().await
    }

    async fn subscribe(&self, patterns: &[&str]) -> Result<EventReceiver, LockError> {
        let result = self.inner.subscribe(patterns).await;
        match &result {
            Ok(_) => tracing::debug!(?patterns, "subscribed"),
            Err(e) => tracing::error!(?patterns, error = %e, "subscribe failed"),
        }
        result
    }

    async fn cleanup_expired_locks(&self) -> Result<CleanupReport, LockError> {
        let span = tracing::info_span!("backend.cleanup", backend = self.inner.name());
        let _guard = span.enter();

        let start = Instant::now();
        let result = self.inner.cleanup_expired_locks().await;
        match &result {
            Ok(report) if report.cleaned > 0 => tracing::info!(
                scanned = report.scanned,
                cleaned = report.cleaned,
                more = report.more,
                elapsed_ms = elapsed_ms(start),
                "cleaned expired locks"
            ),
            Ok(report) => tracing::trace!(scanned = report.scanned, "nothing to clean"),
            Err(e) => tracing::error!(elapsed_ms = elapsed_ms(start), error = %e, "cleanup failed"),
        }
        result
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
