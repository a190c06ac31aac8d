// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fallback system
//!
//! Serves the legacy interface from the enhanced backend while a circuit
//! breaker watches its failures. A failed call, or any call while the
//! circuit is open, is replayed against the legacy store and the caller
//! never sees the enhanced error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use warden_core::{
    AcquireOutcome, BackendHealth, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState,
    Clock, IdGen, LegacyBackend, LockBackend, LockError, LockRequest, LockingConfig, Project,
    ProjectLock, SystemClock, UuidIdGen,
};

/// Enhanced failure rate above which migration is not advised
const MAX_MIGRATION_FAILURE_RATE: f64 = 0.10;

type Call<'a, T> = Pin<Box<dyn Future<Output = Result<T, LockError>> + Send + 'a>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackStats {
    pub enhanced_attempts: u64,
    pub enhanced_failures: u64,
    pub fallback_attempts: u64,
    pub fallback_failures: u64,
    pub last_fallback: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
}

impl FallbackStats {
    pub fn failure_rate(&self) -> f64 {
        if self.enhanced_attempts == 0 {
            return 0.0;
        }
        self.enhanced_failures as f64 / self.enhanced_attempts as f64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackHealth {
    /// Either side can serve requests
    pub healthy: bool,
    pub enhanced: BackendHealth,
    pub legacy_healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_error: Option<String>,
    pub breaker: BreakerSnapshot,
}

pub struct FallbackSystem<C: Clock = SystemClock> {
    backend: Arc<dyn LockBackend>,
    enhanced: BackendView,
    legacy: Arc<dyn LegacyBackend>,
    breaker: CircuitBreaker<C>,
    enabled: bool,
    clock: C,
    stats: Mutex<FallbackStats>,
}

impl<C: Clock> FallbackSystem<C> {
    pub fn with_clock(
        backend: Arc<dyn LockBackend>,
        legacy: Arc<dyn LegacyBackend>,
        config: &LockingConfig,
        clock: C,
    ) -> Self {
        Self::with_settings(
            backend,
            legacy,
            config.circuit_breaker.clone(),
            config.fallback.enabled,
            config.default_timeout,
            clock,
        )
    }

    /// `ttl` is the lease given to locks taken through the legacy interface
    pub fn with_settings(
        backend: Arc<dyn LockBackend>,
        legacy: Arc<dyn LegacyBackend>,
        breaker: BreakerConfig,
        enabled: bool,
        ttl: Duration,
        clock: C,
    ) -> Self {
        Self {
            enhanced: BackendView {
                backend: Arc::clone(&backend),
                ttl,
            },
            backend,
            legacy,
            breaker: CircuitBreaker::new(clock.clone(), breaker),
            enabled,
            clock,
            stats: Mutex::new(FallbackStats::default()),
        }
    }

    fn stats_mut(&self) -> MutexGuard<'_, FallbackStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> FallbackStats {
        let mut stats = self.stats_mut().clone();
        stats.circuit_state = self.breaker.state();
        stats
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
        tracing::info!("circuit breaker reset");
    }

    /// Replace the breaker thresholds
    pub fn configure(&self, config: BreakerConfig) {
        tracing::info!(
            failure_threshold = config.failure_threshold,
            recovery_threshold = config.recovery_threshold,
            "circuit breaker reconfigured"
        );
        self.breaker.configure(config);
    }

    pub async fn health_check(&self) -> FallbackHealth {
        let enhanced = self.backend.health_check().await;
        let legacy_error = self.legacy.list().await.err().map(|e| e.to_string());
        let legacy_healthy = legacy_error.is_none();
        FallbackHealth {
            healthy: enhanced.healthy || legacy_healthy,
            enhanced,
            legacy_healthy,
            legacy_error,
            breaker: self.breaker.snapshot(),
        }
    }

    /// Whether the enhanced backend can become the primary
    pub async fn is_ready_for_migration(&self) -> (bool, String) {
        let health = self.backend.health_check().await;
        if !health.healthy {
            return (false, format!("enhanced backend unhealthy: {}", health.detail));
        }
        if self.breaker.state() == CircuitState::Open {
            return (false, "circuit breaker is open".to_string());
        }
        let rate = self.stats().failure_rate();
        if rate > MAX_MIGRATION_FAILURE_RATE {
            return (
                false,
                format!("enhanced failure rate {:.1}% exceeds 10%", rate * 100.0),
            );
        }
        (true, "system ready for migration".to_string())
    }

    /// Run `call` against the enhanced side, replaying it on legacy when needed
    async fn run<'a, T, F>(&'a self, op: &'static str, call: F) -> Result<T, LockError>
    where
        F: Fn(&'a (dyn LegacyBackend + 'a)) -> Call<'a, T> + Send + Sync,
        T: Send,
    {
        match self.guard(op, || call(&self.enhanced)).await? {
            Some(value) => Ok(value),
            None => self.fall_back(op, || call(self.legacy.as_ref())).await,
        }
    }

    /// Run `call` on the enhanced side behind the breaker
    ///
    /// `Ok(None)` sends the caller to legacy: the circuit is open or the call
    /// failed. With fallback disabled both cases are errors instead.
    pub(crate) async fn guard<T, F, Fut>(
        &self,
        op: &'static str,
        call: F,
    ) -> Result<Option<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LockError>>,
    {
        if !self.breaker.allow_request() {
            if !self.enabled {
                return Err(LockError::backend("circuit open, enhanced backend unavailable"));
            }
            tracing::debug!(op, "circuit open, using legacy");
            return Ok(None);
        }

        self.stats_mut().enhanced_attempts += 1;
        match call().await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(Some(value))
            }
            Err(e) if !trips_breaker(&e) => {
                // The backend answered; the request itself was refused
                self.breaker.record_success();
                Err(e)
            }
            Err(e) => {
                self.stats_mut().enhanced_failures += 1;
                self.breaker.record_failure();
                if !self.enabled {
                    return Err(e);
                }
                tracing::warn!(op, error = %e, "enhanced call failed, falling back to legacy");
                Ok(None)
            }
        }
    }

    /// Serve `call` from the legacy store, counted as a fallback
    pub(crate) async fn fall_back<T, F, Fut>(
        &self,
        op: &'static str,
        call: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LockError>>,
    {
        {
            let mut stats = self.stats_mut();
            stats.fallback_attempts += 1;
            stats.last_fallback = Some(self.clock.utc_now());
        }
        let result = call().await;
        if let Err(e) = &result {
            self.stats_mut().fallback_failures += 1;
            tracing::error!(op, error = %e, "legacy fallback failed");
        }
        result
    }
}

/// Errors that say the backend is unwell rather than that it said no
pub(crate) fn trips_breaker(error: &LockError) -> bool {
    error.is_retryable() || matches!(error, LockError::ShuttingDown)
}

#[async_trait]
impl<C: Clock> LegacyBackend for FallbackSystem<C> {
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock), LockError> {
        self.run("try_lock", |b| b.try_lock(lock.clone())).await
    }

    async fn unlock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        self.run("unlock", |b| b.unlock(project, workspace)).await
    }

    async fn list(&self) -> Result<Vec<ProjectLock>, LockError> {
        self.run("list", |b| b.list()).await
    }

    async fn unlock_by_pull(&self, repo: &str, pull_num: u64) -> Result<Vec<ProjectLock>, LockError> {
        self.run("unlock_by_pull", |b| b.unlock_by_pull(repo, pull_num))
            .await
    }

    async fn get_lock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        self.run("get_lock", |b| b.get_lock(project, workspace)).await
    }
}

// =============================================================================
// Legacy view of an enhanced backend
// =============================================================================

/// Legacy operations expressed directly on a `LockBackend`
struct BackendView {
    backend: Arc<dyn LockBackend>,
    ttl: Duration,
}

#[async_trait]
impl LegacyBackend for BackendView {
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock), LockError> {
        let request = LockRequest::new(
            UuidIdGen.next(),
            lock.resource(),
            &lock.user.username,
            lock.time,
        )
        .with_timeout(self.ttl)
        .with_original(lock)
        .queued(false);

        match self.backend.try_acquire_lock(&request).await? {
            AcquireOutcome::Acquired(granted) => Ok((true, granted.to_legacy())),
            AcquireOutcome::Held(holder) => Ok((false, holder.to_legacy())),
            AcquireOutcome::Queued { lock, .. } => {
                self.backend
                    .remove_queued_request(&lock.resource, &request.id)
                    .await?;
                Err(LockError::backend("backend queued a non-queueing request"))
            }
        }
    }

    async fn unlock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        let Some(held) = self
            .backend
            .get_resource_lock(&project.resource(workspace))
            .await?
        else {
            return Ok(None);
        };
        match self.backend.release_lock(&held.id).await {
            Ok(outcome) => Ok(Some(outcome.released.to_legacy())),
            Err(LockError::LockNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<ProjectLock>, LockError> {
        let locks = self.backend.list_locks().await?;
        Ok(locks
            .iter()
            .filter(|l| l.is_held())
            .map(|l| l.to_legacy())
            .collect())
    }

    /// Releases every lock in the repository's namespace
    async fn unlock_by_pull(
        &self,
        repo: &str,
        _pull_num: u64,
    ) -> Result<Vec<ProjectLock>, LockError> {
        let mut removed = Vec::new();
        for lock in self.backend.list_locks().await? {
            if !lock.is_held() || lock.resource.namespace != repo {
                continue;
            }
            match self.backend.release_lock(&lock.id).await {
                Ok(outcome) => removed.push(outcome.released.to_legacy()),
                Err(LockError::LockNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    async fn get_lock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        self.backend.get_legacy_lock(project, workspace).await
    }
}

#[cfg(test)]
#[path = "fallback_tests.rs"]
mod tests;
