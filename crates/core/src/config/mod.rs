// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration
//!
//! Loaded from TOML. Durations are humantime strings (`"30s"`, `"2h"`).

mod sections;

pub use sections::{
    BackendKind, ClusterConfig, CompatibilityMode, DaemonConfig, DeadlockConfig, FallbackConfig,
    LegacyConfig, LockingConfig, MaintenanceConfig, QueueConfig, RedisConfig, RetryConfig,
};

use crate::breaker::BreakerConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete engine configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub locking: LockingConfig,
    pub redis: RedisConfig,
    pub legacy: LegacyConfig,
    pub daemon: DaemonConfig,
}

impl EngineConfig {
    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Millisecond-scale intervals for tests
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        let locking = &mut config.locking;
        locking.default_timeout = Duration::from_secs(5);
        locking.max_timeout = Duration::from_secs(30);
        locking.queue.poll_interval = Duration::from_millis(5);
        locking.queue.starvation_threshold = Duration::from_millis(200);
        locking.retry.policy = RetryPolicy::for_testing();
        locking.deadlock.check_interval = Duration::from_millis(20);
        locking.circuit_breaker = BreakerConfig::for_testing();
        locking.cluster.heartbeat_interval = Duration::from_millis(20);
        locking.cluster.node_timeout = Duration::from_millis(60);
        locking.cluster.election_timeout = Duration::from_millis(20);
        locking.maintenance.cleanup_interval = Duration::from_millis(20);
        locking.maintenance.starvation_interval = Duration::from_millis(20);
        locking.maintenance.health_interval = Duration::from_millis(20);
        config.redis.operation_timeout = Duration::from_millis(500);
        config
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.locking;
        let checks: [(bool, &str); 14] = [
            (l.default_timeout.is_zero(), "locking.default_timeout must be greater than zero"),
            (l.max_timeout < l.default_timeout, "locking.max_timeout must be at least default_timeout"),
            (l.queue.max_size == 0, "locking.queue.max_size must be greater than zero"),
            (l.queue.starvation_threshold.is_zero(), "locking.queue.starvation_threshold must be greater than zero"),
            (l.queue.poll_interval.is_zero(), "locking.queue.poll_interval must be greater than zero"),
            (l.retry.policy.max_attempts == 0, "locking.retry.max_attempts must be at least 1"),
            (l.retry.policy.max_delay < l.retry.policy.base_delay, "locking.retry.max_delay must be at least base_delay"),
            (l.deadlock.check_interval.is_zero(), "locking.deadlock.check_interval must be greater than zero"),
            (l.circuit_breaker.failure_threshold == 0, "locking.circuit_breaker.failure_threshold must be at least 1"),
            (l.circuit_breaker.recovery_threshold == 0, "locking.circuit_breaker.recovery_threshold must be at least 1"),
            (l.cluster.heartbeat_interval.is_zero(), "locking.cluster.heartbeat_interval must be greater than zero"),
            (l.cluster.node_timeout <= l.cluster.heartbeat_interval, "locking.cluster.node_timeout must exceed heartbeat_interval"),
            (l.cluster.consensus_threshold == 0 || l.cluster.max_cluster_size < l.cluster.consensus_threshold,
                "locking.cluster.consensus_threshold must be between 1 and max_cluster_size"),
            (l.backend == BackendKind::Redis && self.redis.url.trim().is_empty(), "redis.url is required for the redis backend"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid((*message).to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
