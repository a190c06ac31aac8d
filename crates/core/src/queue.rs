// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-resource priority queue with starvation control
//!
//! Entries are kept sorted by rank (highest effective priority first, then
//! oldest). Equal ranks keep insertion order.

use crate::error::LockError;
use crate::model::{Priority, QueueEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// How waiting entries gain priority over time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarvationPolicy {
    /// Waiting time that earns one level of boost
    #[serde(with = "humantime_serde")]
    pub threshold: Duration,
    pub max_boost: u8,
}

impl Default for StarvationPolicy {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(5 * 60),
            max_boost: 3,
        }
    }
}

impl StarvationPolicy {
    /// `min(floor(waited / threshold), max_boost)`
    pub fn boost_for(&self, waited: Duration) -> u8 {
        if self.threshold.is_zero() {
            return 0;
        }
        let levels = waited.as_millis() / self.threshold.as_millis().max(1);
        levels.min(u128::from(self.max_boost)) as u8
    }
}

/// Snapshot of one resource's queue
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub size: usize,
    /// Entry counts by effective priority
    pub by_priority: BTreeMap<Priority, usize>,
    pub entries: Vec<QueueEntry>,
    pub oldest: Option<DateTime<Utc>>,
}

/// Ordered waiters for a single resource
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceQueue {
    entries: Vec<QueueEntry>,
}

impl ResourceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from entries in any order
    pub fn from_entries(mut entries: Vec<QueueEntry>) -> Self {
        entries.sort_by_key(QueueEntry::rank);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Insert by rank, returning the 1-based position
    ///
    /// Fails with `QueueFull` once `max_size` entries are waiting. A request id
    /// that is already queued keeps its existing position.
    pub fn push(&mut self, entry: QueueEntry, max_size: usize) -> Result<usize, LockError> {
        if let Some(pos) = self.position(&entry.request.id) {
            return Ok(pos);
        }
        if self.entries.len() >= max_size {
            return Err(LockError::QueueFull {
                resource: entry.request.resource.to_string(),
                max: max_size,
            });
        }
        let rank = entry.rank();
        let idx = self.entries.partition_point(|e| e.rank() <= rank);
        self.entries.insert(idx, entry);
        Ok(idx + 1)
    }

    /// Remove the highest-priority, oldest entry
    pub fn pop(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }

    pub fn remove(&mut self, request_id: &str) -> Option<QueueEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.request.id == request_id)?;
        Some(self.entries.remove(idx))
    }

    /// 1-based position of a queued request
    pub fn position(&self, request_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.request.id == request_id)
            .map(|idx| idx + 1)
    }

    pub fn find_lock(&self, lock_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.lock_id == lock_id)
    }

    /// Recompute every entry's boost from its waiting time
    ///
    /// Returns how many boosts changed. Running twice at the same instant
    /// changes nothing the second time.
    pub fn boost_starving(&mut self, policy: &StarvationPolicy, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            let waited = (now - entry.enqueued_at).to_std().unwrap_or(Duration::ZERO);
            let boost = policy.boost_for(waited);
            if boost != entry.boost {
                entry.boost = boost;
                changed += 1;
            }
        }
        if changed > 0 {
            self.entries.sort_by_key(QueueEntry::rank);
        }
        changed
    }

    /// Drop entries enqueued more than `max_age` ago
    pub fn expire_older_than(&mut self, max_age: Duration, now: DateTime<Utc>) -> Vec<QueueEntry> {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return Vec::new();
        };
        let cutoff = now - max_age;
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.enqueued_at < cutoff);
        self.entries = kept;
        expired
    }

    pub fn status(&self) -> QueueStatus {
        let mut by_priority = BTreeMap::new();
        for entry in &self.entries {
            *by_priority.entry(entry.effective_priority()).or_insert(0) += 1;
        }
        QueueStatus {
            size: self.entries.len(),
            by_priority,
            entries: self.entries.clone(),
            oldest: self.entries.iter().map(|e| e.enqueued_at).min(),
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
