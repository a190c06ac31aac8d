// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! warden-core: vocabulary and policy for distributed lock coordination
//!
//! This crate provides:
//! - Resource, lock, request and legacy lock types
//! - Backend, legacy and cluster-store contracts
//! - Pure policy components: priority queue, deadlock detector, circuit
//!   breaker, retry policy, health scoring
//! - Event bus and configuration

pub mod clock;
pub mod id;

pub mod error;
pub mod model;

pub mod backend;
pub mod breaker;
pub mod cluster;
pub mod config;
pub mod deadlock;
pub mod events;
pub mod health;
pub mod queue;
pub mod retry;

// Re-exports
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{exists_reason, ErrorKind, LockError};
pub use id::{IdGen, RequestIds, SequentialIdGen, UuidIdGen};
pub use model::{
    legacy_key, EnhancedLock, LockRequest, LockState, Priority, Project, ProjectLock, PullRequest,
    QueueEntry, ResourceIdentifier, ResourceType, User, PRIORITY_BAND,
};

pub use backend::{
    AcquireOutcome, BackendHealth, BackendStats, CleanupReport, LegacyBackend, LockBackend,
    ReleaseOutcome,
};
pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use cluster::{leader_priority, ClusterNode, ClusterStore, ElectionOutcome, JoinOutcome, NodeStatus};
pub use config::{
    BackendKind, ClusterConfig, CompatibilityMode, ConfigError, DaemonConfig, DeadlockConfig,
    EngineConfig, FallbackConfig, LegacyConfig, LockingConfig, MaintenanceConfig, QueueConfig,
    RedisConfig, RetryConfig,
};
pub use deadlock::{DeadlockDetector, DeadlockMetrics, DeadlockRecord, PendingRequest, ResolutionPolicy};
pub use events::{EventBus, EventPattern, EventReceiver, LockEvent, LockInfo};
pub use health::{ComponentState, ComponentStatus, HealthLevel, HealthReport};
pub use queue::{QueueStatus, ResourceQueue, StarvationPolicy};
pub use retry::{RetryPolicy, RetryStrategy};
