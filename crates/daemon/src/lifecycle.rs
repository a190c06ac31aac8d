// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, assembly, shutdown.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warden_adapters::{
    MemoryBackend, MemoryClusterStore, RedisBackend, RedisClusterStore, TracedBackend,
};
use warden_core::{
    BackendKind, ClusterStore, CompatibilityMode, ConfigError, EngineConfig, LegacyBackend,
    LockBackend, LockError,
};
use warden_engine::{
    AdapterConfig, ClusterCoordinator, CompatibilityAdapter, FallbackSystem, LockManager,
};
use warden_storage::{LegacyLockStore, WalError};

/// Filesystem locations owned by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Directory holding the default log and pid files
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub pid_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
}

impl Paths {
    /// Configured paths, falling back to the state directory
    pub fn resolve(config: &EngineConfig) -> Result<Self, LifecycleError> {
        let state_dir = state_dir()?;
        Ok(Self {
            pid_path: config
                .daemon
                .pid_path
                .clone()
                .unwrap_or_else(|| state_dir.join("wardend.pid")),
            log_path: config
                .daemon
                .log_path
                .clone()
                .unwrap_or_else(|| state_dir.join("wardend.log")),
            state_dir,
        })
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("legacy store error: {0}")]
    Wal(#[from] WalError),

    #[error("backend error: {0}")]
    Backend(#[from] LockError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Running daemon: the assembled components and their background tasks
pub struct Daemon {
    pub config: EngineConfig,
    pub paths: Paths,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub backend: Arc<dyn LockBackend>,
    pub legacy: Arc<dyn LegacyBackend>,
    pub adapter: Arc<CompatibilityAdapter>,
    pub fallback: Arc<FallbackSystem>,
    pub cluster: Option<Arc<ClusterCoordinator>>,
    cluster_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    /// When daemon started
    pub start_time: Instant,
}

/// Enhanced backend chosen by `locking.backend`, plus its cluster store
struct Assembled {
    backend: Arc<dyn LockBackend>,
    cluster_store: Arc<dyn ClusterStore>,
}

impl Daemon {
    pub fn manager(&self) -> &LockManager {
        self.adapter.manager()
    }

    /// Log component health, fallback counters and migration readiness
    pub async fn report_health(&self) {
        let health = self.manager().get_health().await;
        let stats = self.fallback.stats();
        info!(
            score = health.score,
            healthy = health.healthy,
            mode = %self.adapter.mode(),
            circuit = ?stats.circuit_state,
            fallback_attempts = stats.fallback_attempts,
            "health check"
        );
        if !health.healthy {
            warn!(score = health.score, "lock engine degraded");
        }
        let Some(cluster) = &self.cluster else {
            return;
        };
        match cluster.cluster_health().await {
            Ok(status) => info!(
                level = ?status.level,
                active = status.active,
                known = status.known,
                leader = status.leader.as_deref().unwrap_or("-"),
                "cluster health"
            ),
            Err(e) => warn!(error = %e, "cluster health unavailable"),
        }
    }

    /// Shutdown the daemon gracefully
    pub async fn shutdown(mut self) -> Result<(), LifecycleError> {
        info!("shutting down daemon");

        // 1. Stop the cluster loop, then leave so another node can lead
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.cluster_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "cluster loop ended abnormally");
            }
        }
        if let Some(cluster) = &self.cluster {
            if let Err(e) = cluster.leave().await {
                warn!(error = %e, "failed to leave cluster");
            }
        }

        // 2. Drain waiters and stop the manager's loops
        self.manager().shutdown().await;

        // 3. Remove PID file
        if self.paths.pid_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.pid_path) {
                warn!(error = %e, "failed to remove PID file");
            }
        }

        // 4. Lock file is released automatically when self.lock_file is dropped

        info!("daemon shutdown complete");
        Ok(())
    }
}

/// Start the daemon
pub async fn startup(config: EngineConfig, paths: Paths) -> Result<Daemon, LifecycleError> {
    match startup_inner(config, &paths).await {
        Ok(daemon) => Ok(daemon),
        Err(e) => {
            // Clean up any resources created before failure
            cleanup_on_failure(&paths);
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(mut config: EngineConfig, paths: &Paths) -> Result<Daemon, LifecycleError> {
    config.validate()?;

    // 1. Acquire lock file FIRST - prevents races
    if let Some(parent) = paths.pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut lock_file = File::create(&paths.pid_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    {
        use std::io::Write;
        writeln!(lock_file, "{}", std::process::id())?;
    }

    // 2. Legacy store, replayed from its WAL when configured
    let legacy: Arc<dyn LegacyBackend> = match &config.legacy.wal_path {
        Some(path) => {
            let store = LegacyLockStore::open(path)?;
            info!(path = %path.display(), "legacy store opened");
            Arc::new(store)
        }
        None => Arc::new(LegacyLockStore::in_memory()),
    };

    // 3. Without an enhanced backend only the legacy path is served
    if !config.locking.enabled || config.locking.backend == BackendKind::LegacyStore {
        if config.locking.compatibility_mode != CompatibilityMode::Strict {
            info!(
                configured = %config.locking.compatibility_mode,
                "enhanced locking unavailable, forcing strict mode"
            );
        }
        config.locking.compatibility_mode = CompatibilityMode::Strict;
        config.locking.cluster.enabled = false;
    }

    // 4. Enhanced backend (wrapped with tracing for observability)
    let Assembled {
        backend,
        cluster_store,
    } = assemble_backend(&config).await?;

    // 5. Manager and its maintenance loops
    let manager = LockManager::new(Arc::clone(&backend), config.locking.clone());
    if config.locking.compatibility_mode != CompatibilityMode::Strict {
        manager.start();
    }

    // 6. Cluster membership
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (cluster, cluster_task) = if config.locking.cluster.enabled {
        let coordinator = Arc::new(ClusterCoordinator::new(
            cluster_store,
            config.locking.cluster.clone(),
        ));
        coordinator.join().await?;
        let task = coordinator.spawn(manager.clone(), shutdown_rx);
        info!(node_id = %coordinator.node_id(), "joined cluster");
        (Some(coordinator), Some(task))
    } else {
        (None, None)
    };

    // 7. Adapter for legacy callers; its fallback system guards hybrid calls
    let adapter = Arc::new(CompatibilityAdapter::new(
        manager,
        Arc::clone(&legacy),
        AdapterConfig::from_locking(&config.locking),
    )?);
    let fallback = Arc::clone(adapter.fallback());

    if adapter.mode() != CompatibilityMode::Strict {
        let (ready, reason) = fallback.is_ready_for_migration().await;
        info!(ready, reason = %reason, "migration readiness");
    }

    info!(
        backend = backend.name(),
        mode = %adapter.mode(),
        cluster = cluster.is_some(),
        "daemon started"
    );

    Ok(Daemon {
        config,
        paths: paths.clone(),
        lock_file,
        backend,
        legacy,
        adapter,
        fallback,
        cluster,
        cluster_task,
        shutdown_tx,
        start_time: Instant::now(),
    })
}

async fn assemble_backend(config: &EngineConfig) -> Result<Assembled, LifecycleError> {
    let locking = &config.locking;
    match locking.backend {
        BackendKind::Redis => {
            let redis =
                RedisBackend::connect(&config.redis, locking.queue.max_size, locking.max_timeout)
                    .await?;
            let cluster_store = RedisClusterStore::new(
                redis.connection(),
                redis.keys().clone(),
                config.redis.operation_timeout,
            );
            Ok(Assembled {
                backend: Arc::new(TracedBackend::new(redis)),
                cluster_store: Arc::new(cluster_store),
            })
        }
        // The legacy store has no enhanced side; strict mode never calls this one
        BackendKind::Memory | BackendKind::LegacyStore => {
            let memory = MemoryBackend::new()
                .with_max_queue_size(locking.queue.max_size)
                .with_max_ttl(locking.max_timeout);
            Ok(Assembled {
                backend: Arc::new(TracedBackend::new(memory)),
                cluster_store: Arc::new(MemoryClusterStore::new()),
            })
        }
    }
}

/// Clean up resources on startup failure
fn cleanup_on_failure(paths: &Paths) {
    if paths.pid_path.exists() {
        let _ = std::fs::remove_file(&paths.pid_path);
    }
}

/// Get the state directory for warden
fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("WARDEN_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    // Use XDG_STATE_HOME or default to ~/.local/state
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("warden"));
    }

    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/warden"))
}

/// Read the configuration file, or defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, LifecycleError> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => {
            let config = EngineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
