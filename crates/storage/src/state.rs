// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized lock table built from WAL replay

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_core::ProjectLock;

/// A recorded change to the lock table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreOp {
    Put { lock: ProjectLock },
    Delete { key: String },
}

/// Legacy locks keyed by `repo/path/workspace`
#[derive(Debug, Default, Clone)]
pub struct LockTable {
    locks: BTreeMap<String, ProjectLock>,
}

impl LockTable {
    pub fn get(&self, key: &str) -> Option<&ProjectLock> {
        self.locks.get(key)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// All locks in key order
    pub fn locks(&self) -> impl Iterator<Item = &ProjectLock> {
        self.locks.values()
    }

    /// Keys of the locks `repo` holds for pull request `pull_num`
    pub fn keys_for_pull(&self, repo: &str, pull_num: u64) -> Vec<String> {
        self.locks
            .iter()
            .filter(|(_, l)| l.project.repo_full_name == repo && l.pull.num == pull_num)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Apply an operation to update the table
    pub fn apply(&mut self, op: &StoreOp) -> Option<ProjectLock> {
        match op {
            StoreOp::Put { lock } => self.locks.insert(lock.key(), lock.clone()),
            StoreOp::Delete { key } => self.locks.remove(key),
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
