// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration tables
//!
//! Every field has a default so any table may be omitted.

use crate::breaker::BreakerConfig;
use crate::deadlock::ResolutionPolicy;
use crate::queue::StarvationPolicy;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which enhanced backend to run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Redis,
    /// The durable legacy store only
    LegacyStore,
    /// In-process backend, single node
    #[default]
    Memory,
}

/// How the compatibility adapter routes legacy calls
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatibilityMode {
    /// Legacy backend only
    Strict,
    /// Enhanced backend only
    Native,
    /// Enhanced first, legacy on failure, merged reads
    #[default]
    Hybrid,
}

impl std::fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompatibilityMode::Strict => "strict",
            CompatibilityMode::Native => "native",
            CompatibilityMode::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    pub backend: BackendKind,
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Upper bound for request timeouts and refreshed TTLs
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,
    pub compatibility_mode: CompatibilityMode,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub deadlock: DeadlockConfig,
    pub cluster: ClusterConfig,
    pub fallback: FallbackConfig,
    pub circuit_breaker: BreakerConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            enabled: true,
            default_timeout: Duration::from_secs(30 * 60),
            max_timeout: Duration::from_secs(2 * 60 * 60),
            compatibility_mode: CompatibilityMode::default(),
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            deadlock: DeadlockConfig::default(),
            cluster: ClusterConfig::default(),
            fallback: FallbackConfig::default(),
            circuit_breaker: BreakerConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub enabled: bool,
    pub max_size: usize,
    #[serde(with = "humantime_serde")]
    pub starvation_threshold: Duration,
    pub max_boost: u8,
    /// Queued entries older than this are dropped
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// How often a waiting caller checks for promotion
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let starvation = StarvationPolicy::default();
        Self {
            enabled: true,
            max_size: 100,
            starvation_threshold: starvation.threshold,
            max_boost: starvation.max_boost,
            max_age: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl QueueConfig {
    pub fn starvation(&self) -> StarvationPolicy {
        StarvationPolicy {
            threshold: self.starvation_threshold,
            max_boost: self.max_boost,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub policy: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: RetryPolicy::default(),
        }
    }
}

impl RetryConfig {
    /// The policy to apply, a single attempt when disabled
    pub fn effective(&self) -> RetryPolicy {
        if self.enabled {
            self.policy.clone()
        } else {
            RetryPolicy::none()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlockConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    pub resolution_policy: ResolutionPolicy,
    pub history_size: usize,
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(30),
            resolution_policy: ResolutionPolicy::default(),
            history_size: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    /// Generated at startup when absent
    pub node_id: Option<String>,
    pub address: String,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub node_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub election_timeout: Duration,
    pub consensus_threshold: usize,
    pub max_cluster_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: None,
            address: "127.0.0.1:4141".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            node_timeout: Duration::from_secs(90),
            election_timeout: Duration::from_secs(10),
            consensus_threshold: 2,
            max_cluster_size: 7,
        }
    }
}

impl ClusterConfig {
    /// TTL of a node's membership record
    pub fn node_ttl(&self) -> Duration {
        self.heartbeat_interval * 2
    }

    /// TTL of the leader key
    pub fn leader_ttl(&self) -> Duration {
        self.election_timeout * 2
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Expired-lock cleanup and queue aging
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub starvation_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub health_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
            starvation_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Prepended to every lock and queue key
    pub key_prefix: String,
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    pub cleanup_batch_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
            operation_timeout: Duration::from_secs(5),
            cleanup_batch_size: 100,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyConfig {
    /// Write-ahead log for the legacy store; in-memory when absent
    pub wal_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub log_path: Option<PathBuf>,
    pub pid_path: Option<PathBuf>,
}
