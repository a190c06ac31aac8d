// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-node legacy lock store

use crate::state::{LockTable, StoreOp};
use crate::wal::{Wal, WalError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use warden_core::{legacy_key, LegacyBackend, LockError, Project, ProjectLock};

impl From<WalError> for LockError {
    fn from(e: WalError) -> Self {
        LockError::Backend(format!("legacy store: {}", e))
    }
}

struct Inner {
    table: LockTable,
    wal: Option<Wal>,
}

impl Inner {
    /// Log then apply, so a failed write leaves the table untouched
    fn commit(&mut self, op: StoreOp) -> Result<Option<ProjectLock>, WalError> {
        if let Some(wal) = &mut self.wal {
            wal.append(&op)?;
        }
        Ok(self.table.apply(&op))
    }
}

/// Legacy backend over a lock table, optionally backed by a WAL
#[derive(Clone)]
pub struct LegacyLockStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for LegacyLockStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LegacyLockStore {
    /// Store that forgets everything on drop
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                table: LockTable::default(),
                wal: None,
            })),
        }
    }

    /// Open a durable store, replaying the log at `path`
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let mut table = LockTable::default();
        let ops = Wal::replay(path)?;
        for (_, op) in &ops {
            table.apply(op);
        }
        let wal = Wal::open(path)?;
        tracing::info!(
            path = %path.display(),
            entries = ops.len(),
            locks = table.len(),
            "legacy store recovered"
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                table,
                wal: Some(wal),
            })),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LegacyBackend for LegacyLockStore {
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock), LockError> {
        let mut inner = self.lock();
        if let Some(current) = inner.table.get(&lock.key()) {
            return Ok((false, current.clone()));
        }
        inner.commit(StoreOp::Put { lock: lock.clone() })?;
        Ok((true, lock))
    }

    async fn unlock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        let key = legacy_key(project, workspace);
        let mut inner = self.lock();
        if inner.table.get(&key).is_none() {
            return Ok(None);
        }
        Ok(inner.commit(StoreOp::Delete { key })?)
    }

    async fn list(&self) -> Result<Vec<ProjectLock>, LockError> {
        Ok(self.lock().table.locks().cloned().collect())
    }

    async fn unlock_by_pull(
        &self,
        repo: &str,
        pull_num: u64,
    ) -> Result<Vec<ProjectLock>, LockError> {
        let mut inner = self.lock();
        let mut removed = Vec::new();
        for key in inner.table.keys_for_pull(repo, pull_num) {
            if let Some(lock) = inner.commit(StoreOp::Delete { key })? {
                removed.push(lock);
            }
        }
        Ok(removed)
    }

    async fn get_lock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        Ok(self
            .lock()
            .table
            .get(&legacy_key(project, workspace))
            .cloned())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
