// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compatibility adapter
//!
//! Serves the legacy lock interface during a migration. Strict mode keeps
//! everything on the legacy store, Native mode sends everything to the lock
//! manager, and Hybrid mode tries the manager first through the fallback
//! system's circuit breaker while merging reads from both sides so no lock
//! goes unseen.

use crate::fallback::FallbackSystem;
use crate::manager::LockManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use warden_core::{
    exists_reason, BreakerConfig, CircuitState, Clock, CompatibilityMode,
    ConfigError, EnhancedLock, LegacyBackend, LockError, LockingConfig, Priority, Project,
    ProjectLock, SystemClock, User,
};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub mode: CompatibilityMode,
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,
    pub queue_enabled: bool,
    pub queue_max_size: usize,
    pub breaker: BreakerConfig,
    /// Serve from legacy when the enhanced side fails
    pub fallback_enabled: bool,
}

impl AdapterConfig {
    pub fn from_locking(config: &LockingConfig) -> Self {
        Self {
            mode: config.compatibility_mode,
            default_timeout: config.default_timeout,
            max_timeout: config.max_timeout,
            queue_enabled: config.queue.enabled,
            queue_max_size: config.queue.max_size,
            breaker: config.circuit_breaker.clone(),
            fallback_enabled: config.fallback.enabled,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "adapter default timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_timeout < self.default_timeout {
            return Err(ConfigError::Invalid(
                "adapter max timeout must be at least the default timeout".to_string(),
            ));
        }
        if self.queue_enabled && self.queue_max_size == 0 {
            return Err(ConfigError::Invalid(
                "adapter queue size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Migration and stats
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    #[default]
    NotStarted,
    Preparation,
    Active,
    Completed,
    Failed,
}

/// Progress of copying legacy locks into the enhanced backend
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationState {
    pub phase: MigrationPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub legacy_locks: usize,
    pub migrated: usize,
    /// `key: reason` per lock that did not move
    pub failed: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdapterStats {
    pub mode: CompatibilityMode,
    pub legacy_ops: u64,
    pub enhanced_ops: u64,
    pub fallback_ops: u64,
    pub circuit_state: CircuitState,
    pub migration: MigrationState,
}

/// Reason shown to a caller whose lock request was refused
pub fn rejection_reason(holder: &ProjectLock) -> String {
    exists_reason(&holder.user.username, Some(holder.pull.num))
}

// =============================================================================
// Adapter
// =============================================================================

pub struct CompatibilityAdapter<C: Clock = SystemClock> {
    mode: RwLock<CompatibilityMode>,
    manager: LockManager<C>,
    legacy: Arc<dyn LegacyBackend>,
    fallback: Arc<FallbackSystem<C>>,
    clock: C,
    legacy_ops: AtomicU64,
    enhanced_ops: AtomicU64,
    migration: Mutex<MigrationState>,
}

impl<C: Clock> CompatibilityAdapter<C> {
    pub fn new(
        manager: LockManager<C>,
        legacy: Arc<dyn LegacyBackend>,
        config: AdapterConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = manager.clock().clone();
        let fallback = FallbackSystem::with_settings(
            Arc::clone(manager.backend()),
            Arc::clone(&legacy),
            config.breaker,
            config.fallback_enabled,
            config.default_timeout,
            clock.clone(),
        );
        Ok(Self {
            mode: RwLock::new(config.mode),
            manager,
            legacy,
            fallback: Arc::new(fallback),
            clock,
            legacy_ops: AtomicU64::new(0),
            enhanced_ops: AtomicU64::new(0),
            migration: Mutex::new(MigrationState::default()),
        })
    }

    pub fn mode(&self) -> CompatibilityMode {
        *self.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch modes at runtime
    pub fn set_mode(&self, mode: CompatibilityMode) {
        let mut current = self.mode.write().unwrap_or_else(|e| e.into_inner());
        tracing::info!(from = %*current, to = %mode, "compatibility mode changed");
        *current = mode;
    }

    pub fn manager(&self) -> &LockManager<C> {
        &self.manager
    }

    /// Breaker and fallback counters shared by every hybrid call
    pub fn fallback(&self) -> &Arc<FallbackSystem<C>> {
        &self.fallback
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            mode: self.mode(),
            legacy_ops: self.legacy_ops.load(Ordering::Relaxed),
            enhanced_ops: self.enhanced_ops.load(Ordering::Relaxed),
            fallback_ops: self.fallback.stats().fallback_attempts,
            circuit_state: self.fallback.circuit_state(),
            migration: self.migration_status(),
        }
    }

    pub fn migration_status(&self) -> MigrationState {
        self.migration_mut().clone()
    }

    fn migration_mut(&self) -> MutexGuard<'_, MigrationState> {
        self.migration.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn legacy(&self) -> &dyn LegacyBackend {
        self.legacy_ops.fetch_add(1, Ordering::Relaxed);
        self.legacy.as_ref()
    }

    fn enhanced(&self) -> &LockManager<C> {
        self.enhanced_ops.fetch_add(1, Ordering::Relaxed);
        &self.manager
    }

    /// `Ok(None)` sends the caller to legacy: the circuit is open or the call failed
    async fn try_enhanced<'a, T, F, Fut>(
        &'a self,
        op: &'static str,
        call: F,
    ) -> Result<Option<T>, LockError>
    where
        F: FnOnce(&'a LockManager<C>) -> Fut,
        Fut: Future<Output = Result<T, LockError>>,
    {
        self.fallback.guard(op, || call(self.enhanced())).await
    }

    /// Legacy half of a hybrid call, counted as a fallback when enhanced was skipped
    async fn legacy_side<T, F, Fut>(
        &self,
        op: &'static str,
        fell_back: bool,
        call: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LockError>>,
    {
        if fell_back {
            self.fallback.fall_back(op, call).await
        } else {
            call().await
        }
    }

    // -- enhanced-aware operations --

    fn require_enhanced(&self) -> Result<&LockManager<C>, LockError> {
        if self.mode() == CompatibilityMode::Strict {
            return Err(LockError::InvalidRequest(
                "enhanced operations are unavailable in strict mode".to_string(),
            ));
        }
        Ok(self.enhanced())
    }

    pub async fn lock_with_priority(
        &self,
        project: &Project,
        workspace: &str,
        user: &User,
        priority: Priority,
    ) -> Result<EnhancedLock, LockError> {
        self.require_enhanced()?
            .lock_with_priority(project, workspace, user, priority)
            .await
    }

    pub async fn lock_with_timeout(
        &self,
        project: &Project,
        workspace: &str,
        user: &User,
        timeout: Duration,
    ) -> Result<EnhancedLock, LockError> {
        self.require_enhanced()?
            .lock_with_timeout(project, workspace, user, timeout)
            .await
    }

    pub async fn get_queue_position(
        &self,
        project: &Project,
        workspace: &str,
        request_id: &str,
    ) -> Result<Option<usize>, LockError> {
        self.require_enhanced()?
            .get_queue_position(project, workspace, request_id)
            .await
    }

    // -- migration --

    /// Copy every legacy lock into the enhanced backend
    pub async fn start_migration(&self) -> Result<MigrationState, LockError> {
        {
            let mut state = self.migration_mut();
            if state.phase != MigrationPhase::NotStarted {
                return Err(LockError::InvalidRequest(
                    "migration already started".to_string(),
                ));
            }
            let now = self.clock.utc_now();
            state.phase = MigrationPhase::Preparation;
            state.started_at = Some(now);
            state.last_update = Some(now);
        }
        tracing::info!("starting migration to enhanced locking");

        let locks = match self.legacy().list().await {
            Ok(locks) => locks,
            Err(e) => {
                let mut state = self.migration_mut();
                state.phase = MigrationPhase::Failed;
                state.last_update = Some(self.clock.utc_now());
                return Err(e);
            }
        };
        {
            let mut state = self.migration_mut();
            state.phase = MigrationPhase::Active;
            state.legacy_locks = locks.len();
        }

        for lock in locks {
            let key = lock.key();
            let outcome = LegacyBackend::try_lock(self.enhanced(), lock).await;
            let mut state = self.migration_mut();
            match outcome {
                Ok((true, _)) => state.migrated += 1,
                Ok((false, holder)) => {
                    tracing::warn!(key = %key, holder = %holder.user.username, "lock not migrated");
                    state
                        .failed
                        .push(format!("{}: held by {}", key, holder.user.username));
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "lock not migrated");
                    state.failed.push(format!("{}: {}", key, e));
                }
            }
        }

        let mut state = self.migration_mut();
        state.phase = MigrationPhase::Completed;
        state.last_update = Some(self.clock.utc_now());
        tracing::info!(
            migrated = state.migrated,
            total = state.legacy_locks,
            "migration completed"
        );
        Ok(state.clone())
    }
}

/// Enhanced entries first, then legacy entries whose key is new
fn merge(enhanced: Vec<ProjectLock>, legacy: Vec<ProjectLock>) -> Vec<ProjectLock> {
    let mut seen = HashSet::new();
    enhanced
        .into_iter()
        .chain(legacy)
        .filter(|lock| seen.insert(lock.key()))
        .collect()
}

#[async_trait]
impl<C: Clock> LegacyBackend for CompatibilityAdapter<C> {
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock), LockError> {
        match self.mode() {
            CompatibilityMode::Strict => self.legacy().try_lock(lock).await,
            CompatibilityMode::Native => LegacyBackend::try_lock(self.enhanced(), lock).await,
            CompatibilityMode::Hybrid => {
                // A lock taken on legacy during an outage still excludes
                let legacy_holder = self
                    .legacy()
                    .get_lock(&lock.project, &lock.workspace)
                    .await;
                match legacy_holder {
                    Ok(Some(holder)) => return Ok((false, holder)),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "legacy lookup failed"),
                }
                let enhanced = self
                    .try_enhanced("try_lock", |m| LegacyBackend::try_lock(m, lock.clone()))
                    .await?;
                match enhanced {
                    Some(result) => Ok(result),
                    None => {
                        self.fallback
                            .fall_back("try_lock", || self.legacy().try_lock(lock))
                            .await
                    }
                }
            }
        }
    }

    async fn unlock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        match self.mode() {
            CompatibilityMode::Strict => self.legacy().unlock(project, workspace).await,
            CompatibilityMode::Native => {
                LegacyBackend::unlock(self.enhanced(), project, workspace).await
            }
            CompatibilityMode::Hybrid => {
                let enhanced = self
                    .try_enhanced("unlock", |m| LegacyBackend::unlock(m, project, workspace))
                    .await?;
                let legacy = self
                    .legacy_side("unlock", enhanced.is_none(), || {
                        self.legacy().unlock(project, workspace)
                    })
                    .await;
                match (enhanced.flatten(), legacy) {
                    (Some(released), Ok(_)) => Ok(Some(released)),
                    (Some(released), Err(e)) => {
                        tracing::warn!(error = %e, "legacy unlock failed");
                        Ok(Some(released))
                    }
                    (None, legacy) => legacy,
                }
            }
        }
    }

    async fn list(&self) -> Result<Vec<ProjectLock>, LockError> {
        match self.mode() {
            CompatibilityMode::Strict => self.legacy().list().await,
            CompatibilityMode::Native => LegacyBackend::list(self.enhanced()).await,
            CompatibilityMode::Hybrid => {
                let enhanced = self
                    .try_enhanced("list", |m| LegacyBackend::list(m))
                    .await?;
                let legacy = self
                    .legacy_side("list", enhanced.is_none(), || self.legacy().list())
                    .await;
                match (enhanced, legacy) {
                    (enhanced, Ok(legacy)) => Ok(merge(enhanced.unwrap_or_default(), legacy)),
                    (Some(enhanced), Err(e)) => {
                        tracing::warn!(error = %e, "legacy list failed");
                        Ok(enhanced)
                    }
                    (None, Err(e)) => Err(e),
                }
            }
        }
    }

    async fn unlock_by_pull(
        &self,
        repo: &str,
        pull_num: u64,
    ) -> Result<Vec<ProjectLock>, LockError> {
        match self.mode() {
            CompatibilityMode::Strict => self.legacy().unlock_by_pull(repo, pull_num).await,
            CompatibilityMode::Native => {
                LegacyBackend::unlock_by_pull(self.enhanced(), repo, pull_num).await
            }
            CompatibilityMode::Hybrid => {
                let enhanced = self
                    .try_enhanced("unlock_by_pull", |m| {
                        LegacyBackend::unlock_by_pull(m, repo, pull_num)
                    })
                    .await?;
                let legacy = self
                    .legacy_side("unlock_by_pull", enhanced.is_none(), || {
                        self.legacy().unlock_by_pull(repo, pull_num)
                    })
                    .await;
                match (enhanced, legacy) {
                    (enhanced, Ok(legacy)) => Ok(merge(enhanced.unwrap_or_default(), legacy)),
                    (Some(enhanced), Err(e)) => {
                        tracing::warn!(error = %e, "legacy unlock_by_pull failed");
                        Ok(enhanced)
                    }
                    (None, Err(e)) => Err(e),
                }
            }
        }
    }

    async fn get_lock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        match self.mode() {
            CompatibilityMode::Strict => self.legacy().get_lock(project, workspace).await,
            CompatibilityMode::Native => {
                LegacyBackend::get_lock(self.enhanced(), project, workspace).await
            }
            CompatibilityMode::Hybrid => {
                let enhanced = self
                    .try_enhanced("get_lock", |m| LegacyBackend::get_lock(m, project, workspace))
                    .await?;
                match enhanced {
                    Some(Some(lock)) => Ok(Some(lock)),
                    Some(None) => self.legacy().get_lock(project, workspace).await,
                    None => {
                        self.fallback
                            .fall_back("get_lock", || self.legacy().get_lock(project, workspace))
                            .await
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
