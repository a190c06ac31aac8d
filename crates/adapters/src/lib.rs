// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Lock backends and cluster stores
//!
//! - `MemoryBackend` / `MemoryClusterStore`: single-process state
//! - `RedisBackend` / `RedisClusterStore`: shared state on a Redis server
//! - `TracedBackend`: span-per-operation wrapper for any backend

pub mod memory;
pub mod redis;
pub mod traced;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use memory::{MemoryBackend, MemoryClusterStore};
pub use self::redis::{Keys, RedisBackend, RedisClusterStore, RedisStoreError};
pub use traced::TracedBackend;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use fake::{BackendCall, FakeBackend};
