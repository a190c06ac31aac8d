// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared vocabulary for lock coordination
//!
//! This module provides:
//! - `ResourceIdentifier` - The unit of mutual exclusion
//! - `EnhancedLock` / `LockRequest` / `QueueEntry` - Lock records and waiters
//! - Legacy `ProjectLock` types and conversions to and from enhanced locks

mod legacy;
mod lock;
mod resource;

pub use legacy::{legacy_key, Project, ProjectLock, PullRequest, User};
pub use lock::{EnhancedLock, LockRequest, LockState, Priority, QueueEntry, PRIORITY_BAND};
pub use resource::{ResourceIdentifier, ResourceType};
