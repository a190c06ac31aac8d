// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script reply decoding

use serde::Deserialize;
use warden_core::{
    AcquireOutcome, EnhancedLock, LockError, LockState, QueueEntry, ReleaseOutcome,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AcquireReply {
    Acquired { lock: EnhancedLock },
    Queued { position: usize, entry: QueueEntry },
    Exists { holder: EnhancedLock },
    QueueFull { size: usize },
}

impl AcquireReply {
    /// Map onto the backend outcome; `max` reports the bound on `QueueFull`
    pub fn into_outcome(self, resource: &str, max: usize) -> Result<AcquireOutcome, LockError> {
        match self {
            AcquireReply::Acquired { lock } => Ok(AcquireOutcome::Acquired(lock)),
            AcquireReply::Queued { position, entry } => Ok(AcquireOutcome::Queued {
                lock: entry.pending_lock(),
                position,
            }),
            AcquireReply::Exists { holder } => Ok(AcquireOutcome::Held(holder)),
            AcquireReply::QueueFull { .. } => Err(LockError::QueueFull {
                resource: resource.to_string(),
                max,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReleaseReply {
    Released { lock: EnhancedLock },
    Transferred { lock: EnhancedLock, next: EnhancedLock },
    NotFound,
    NotOwner,
}

impl ReleaseReply {
    pub fn into_outcome(self, lock_id: &str) -> Result<ReleaseOutcome, LockError> {
        let (mut released, promoted) = match self {
            ReleaseReply::Released { lock } => (lock, None),
            ReleaseReply::Transferred { lock, next } => (lock, Some(next)),
            ReleaseReply::NotFound | ReleaseReply::NotOwner => {
                return Err(LockError::LockNotFound(lock_id.to_string()))
            }
        };
        released.state = LockState::Released;
        Ok(ReleaseOutcome { released, promoted })
    }
}

/// Reply of refresh and transfer
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutateReply {
    Refreshed { lock: EnhancedLock },
    Transferred { lock: EnhancedLock },
    NotFound,
    NotOwner,
    Expired,
}

impl MutateReply {
    pub fn into_lock(self, lock_id: &str) -> Result<EnhancedLock, LockError> {
        match self {
            MutateReply::Refreshed { lock } | MutateReply::Transferred { lock } => Ok(lock),
            MutateReply::NotFound | MutateReply::NotOwner => {
                Err(LockError::LockNotFound(lock_id.to_string()))
            }
            MutateReply::Expired => Err(LockError::LockExpired(lock_id.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SweepReply {
    #[serde(default)]
    pub cleaned: usize,
    #[serde(default)]
    pub promoted: bool,
}

/// Decode a JSON script reply
pub fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, LockError> {
    serde_json::from_str(raw)
        .map_err(|e| LockError::Backend(format!("unexpected script reply: {}", e)))
}
