// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Warden lock engine
//!
//! The `LockManager` drives a `LockBackend` with timers, queue maintenance
//! and deadlock checks. Around it sit the cluster coordinator, the fallback
//! system that shields legacy callers from backend outages, and the
//! compatibility adapter that routes the legacy interface by mode.

mod adapter;
mod cluster;
mod compat;
mod fallback;
mod maintenance;
mod manager;
mod metrics;
mod timers;

pub use adapter::{
    rejection_reason, AdapterConfig, AdapterStats, CompatibilityAdapter, MigrationPhase,
    MigrationState,
};
pub use cluster::{ClusterCoordinator, ClusterHealth, NodeLoad};
pub use compat::{CheckError, CheckResult, CompatibilityChecker, CompatibilityReport};
pub use fallback::{FallbackHealth, FallbackStats, FallbackSystem};
pub use manager::{LockManager, LockOptions};
pub use metrics::{ManagerStats, RequestCounters};
