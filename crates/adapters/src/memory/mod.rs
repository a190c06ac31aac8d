// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process lock backend
//!
//! All locks and queues live behind one mutex, so every operation is a single
//! atomic step in the same way a store-side script is. Expired holder records
//! stay visible (as `Expired`) until a cleanup sweep or the next acquire on
//! the resource removes them.

mod cluster;

pub use cluster::MemoryClusterStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use warden_core::{
    AcquireOutcome, BackendHealth, BackendStats, CleanupReport, Clock, EnhancedLock, EventBus,
    EventReceiver, IdGen, LockBackend, LockError, LockEvent, LockInfo, LockRequest, LockState,
    QueueEntry, QueueStatus, ReleaseOutcome, ResourceIdentifier, ResourceQueue,
    StarvationPolicy, SystemClock, UuidIdGen,
};

/// Default per-resource queue bound
pub const DEFAULT_MAX_QUEUE: usize = 100;
/// Default cap on a refreshed lock's remaining lifetime
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Default)]
struct Totals {
    acquired: u64,
    released: u64,
    promoted: u64,
}

#[derive(Default)]
struct State {
    holders: HashMap<ResourceIdentifier, EnhancedLock>,
    queues: HashMap<ResourceIdentifier, ResourceQueue>,
    totals: Totals,
}

impl State {
    fn holder_by_id(&self, lock_id: &str) -> Option<&EnhancedLock> {
        self.holders.values().find(|l| l.id == lock_id)
    }

    fn queued_by_lock_id(&self, lock_id: &str) -> Option<&QueueEntry> {
        self.queues.values().find_map(|q| q.find_lock(lock_id))
    }

    /// Pop the queue head and make it the holder
    fn promote(&mut self, resource: &ResourceIdentifier, now: chrono::DateTime<chrono::Utc>) -> Option<EnhancedLock> {
        let queue = self.queues.get_mut(resource)?;
        let entry = queue.pop()?;
        if queue.is_empty() {
            self.queues.remove(resource);
        }
        let lock = EnhancedLock::acquired(&entry.request, entry.lock_id, now);
        self.holders.insert(resource.clone(), lock.clone());
        self.totals.promoted += 1;
        Some(lock)
    }

    /// Drop an expired holder and hand a vacant resource to its queue head
    fn settle(
        &mut self,
        resource: &ResourceIdentifier,
        now: chrono::DateTime<chrono::Utc>,
        events: &mut Vec<LockEvent>,
    ) {
        if let Some(expired) = self.holders.get(resource).filter(|l| l.is_expired(now)) {
            events.push(LockEvent::ExpiredCleanup(LockInfo::of(expired, now)));
            self.holders.remove(resource);
        }
        if !self.holders.contains_key(resource) {
            if let Some(promoted) = self.promote(resource, now) {
                events.push(LockEvent::Transferred(LockInfo::of(&promoted, now)));
            }
        }
    }
}

/// In-process backend with the same semantics as the remote store
#[derive(Clone)]
pub struct MemoryBackend<C: Clock = SystemClock, I: IdGen = UuidIdGen> {
    clock: C,
    ids: I,
    state: Arc<Mutex<State>>,
    events: EventBus,
    max_queue_size: usize,
    max_ttl: Duration,
}

impl MemoryBackend<SystemClock, UuidIdGen> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock, UuidIdGen)
    }
}

impl Default for MemoryBackend<SystemClock, UuidIdGen> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock, I: IdGen> MemoryBackend<C, I> {
    pub fn with_clock(clock: C, ids: I) -> Self {
        Self {
            clock,
            ids,
            state: Arc::new(Mutex::new(State::default())),
            events: EventBus::new(),
            max_queue_size: DEFAULT_MAX_QUEUE,
            max_ttl: DEFAULT_MAX_TTL,
        }
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_all(&self, events: Vec<LockEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }
}

#[async_trait]
impl<C: Clock, I: IdGen> LockBackend for MemoryBackend<C, I> {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn try_acquire_lock(&self, request: &LockRequest) -> Result<AcquireOutcome, LockError> {
        request.resource.validate()?;
        let now = self.clock.utc_now();
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.state();
            state.settle(&request.resource, now, &mut events);

            match state.holders.get(&request.resource).cloned() {
                None => {
                    let lock = EnhancedLock::acquired(request, self.ids.next(), now);
                    state.holders.insert(request.resource.clone(), lock.clone());
                    state.totals.acquired += 1;
                    events.push(LockEvent::Acquired(LockInfo::of(&lock, now)));
                    AcquireOutcome::Acquired(lock)
                }
                Some(holder) if holder.request_id.as_deref() == Some(request.id.as_str()) => {
                    AcquireOutcome::Acquired(holder)
                }
                Some(_) if request.queue_if_held => {
                    let queue = state.queues.entry(request.resource.clone()).or_default();
                    let existing = queue.position(&request.id).and_then(|pos| {
                        queue.entries().get(pos - 1).map(|e| (e.pending_lock(), pos))
                    });
                    match existing {
                        Some((lock, position)) => AcquireOutcome::Queued { lock, position },
                        None => {
                            let entry = QueueEntry::new(request.clone(), self.ids.next(), now);
                            let lock = entry.pending_lock();
                            let position = queue.push(entry, self.max_queue_size)?;
                            events.push(LockEvent::Queued {
                                info: LockInfo::of(&lock, now),
                                position: position as u64,
                            });
                            AcquireOutcome::Queued { lock, position }
                        }
                    }
                }
                Some(holder) => AcquireOutcome::Held(holder),
            }
        };
        self.publish_all(events);
        Ok(outcome)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<ReleaseOutcome, LockError> {
        let now = self.clock.utc_now();
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.state();
            let resource = state
                .holder_by_id(lock_id)
                .map(|l| l.resource.clone())
                .ok_or_else(|| LockError::LockNotFound(lock_id.to_string()))?;
            let mut released = state
                .holders
                .remove(&resource)
                .ok_or_else(|| LockError::LockNotFound(lock_id.to_string()))?;
            released.state = LockState::Released;
            state.totals.released += 1;

            let promoted = state.promote(&resource, now);
            match &promoted {
                Some(next) => events.push(LockEvent::Transferred(LockInfo::of(next, now))),
                None => events.push(LockEvent::Released(LockInfo::of(&released, now))),
            }
            ReleaseOutcome { released, promoted }
        };
        self.publish_all(events);
        Ok(outcome)
    }

    async fn get_lock(&self, lock_id: &str) -> Result<Option<EnhancedLock>, LockError> {
        let now = self.clock.utc_now();
        let state = self.state();
        if let Some(lock) = state.holder_by_id(lock_id) {
            return Ok((!lock.is_expired(now)).then(|| lock.clone()));
        }
        Ok(state.queued_by_lock_id(lock_id).map(QueueEntry::pending_lock))
    }

    async fn get_resource_lock(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<EnhancedLock>, LockError> {
        let now = self.clock.utc_now();
        let state = self.state();
        Ok(state
            .holders
            .get(resource)
            .filter(|l| !l.is_expired(now))
            .cloned())
    }

    async fn list_locks(&self) -> Result<Vec<EnhancedLock>, LockError> {
        let now = self.clock.utc_now();
        let state = self.state();
        let mut locks: Vec<EnhancedLock> = state
            .holders
            .values()
            .map(|l| {
                let mut lock = l.clone();
                if lock.is_expired(now) {
                    lock.state = LockState::Expired;
                }
                lock
            })
            .collect();
        locks.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at).then_with(|| a.id.cmp(&b.id)));
        Ok(locks)
    }

    async fn refresh_lock(
        &self,
        lock_id: &str,
        extension: Duration,
    ) -> Result<EnhancedLock, LockError> {
        let now = self.clock.utc_now();
        let refreshed = {
            let mut state = self.state();
            let lock = state
                .holders
                .values_mut()
                .find(|l| l.id == lock_id)
                .ok_or_else(|| LockError::LockNotFound(lock_id.to_string()))?;
            if lock.is_expired(now) {
                return Err(LockError::LockExpired(lock_id.to_string()));
            }
            let remaining = lock.remaining(now).unwrap_or(Duration::ZERO);
            let ttl = remaining.saturating_add(extension).min(self.max_ttl);
            lock.expires_at = chrono::Duration::from_std(ttl).ok().map(|ttl| now + ttl);
            lock.version += 1;
            lock.clone()
        };
        self.events
            .publish(LockEvent::Refreshed(LockInfo::of(&refreshed, now)));
        Ok(refreshed)
    }

    async fn transfer_lock(
        &self,
        lock_id: &str,
        new_owner: &str,
    ) -> Result<EnhancedLock, LockError> {
        let now = self.clock.utc_now();
        let transferred = {
            let mut state = self.state();
            let lock = state
                .holders
                .values_mut()
                .find(|l| l.id == lock_id)
                .ok_or_else(|| LockError::LockNotFound(lock_id.to_string()))?;
            if lock.is_expired(now) {
                return Err(LockError::LockExpired(lock_id.to_string()));
            }
            lock.owner = new_owner.to_string();
            lock.version += 1;
            lock.clone()
        };
        self.events
            .publish(LockEvent::OwnerChanged(LockInfo::of(&transferred, now)));
        Ok(transferred)
    }

    async fn enqueue_lock_request(&self, request: &LockRequest) -> Result<usize, LockError> {
        request.resource.validate()?;
        let now = self.clock.utc_now();
        let entry = QueueEntry::new(request.clone(), self.ids.next(), now);
        let info = LockInfo::of(&entry.pending_lock(), now);
        let position = {
            let mut state = self.state();
            state
                .queues
                .entry(request.resource.clone())
                .or_default()
                .push(entry, self.max_queue_size)?
        };
        self.events.publish(LockEvent::Queued {
            info,
            position: position as u64,
        });
        Ok(position)
    }

    async fn dequeue_next_request(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<QueueEntry>, LockError> {
        let mut state = self.state();
        let Some(queue) = state.queues.get_mut(resource) else {
            return Ok(None);
        };
        let entry = queue.pop();
        if queue.is_empty() {
            state.queues.remove(resource);
        }
        Ok(entry)
    }

    async fn remove_queued_request(
        &self,
        resource: &ResourceIdentifier,
        request_id: &str,
    ) -> Result<bool, LockError> {
        let mut state = self.state();
        let Some(queue) = state.queues.get_mut(resource) else {
            return Ok(false);
        };
        let removed = queue.remove(request_id).is_some();
        if queue.is_empty() {
            state.queues.remove(resource);
        }
        Ok(removed)
    }

    async fn get_queue_status(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<QueueStatus, LockError> {
        let state = self.state();
        Ok(state
            .queues
            .get(resource)
            .map(ResourceQueue::status)
            .unwrap_or_default())
    }

    async fn boost_waiting(&self, policy: &StarvationPolicy) -> Result<usize, LockError> {
        let now = self.clock.utc_now();
        let mut state = self.state();
        Ok(state
            .queues
            .values_mut()
            .map(|q| q.boost_starving(policy, now))
            .sum())
    }

    async fn expire_queued(&self, max_age: Duration) -> Result<usize, LockError> {
        let now = self.clock.utc_now();
        let mut state = self.state();
        let mut expired = 0;
        for queue in state.queues.values_mut() {
            expired += queue.expire_older_than(max_age, now).len();
        }
        state.queues.retain(|_, q| !q.is_empty());
        Ok(expired)
    }

    async fn health_check(&self) -> BackendHealth {
        BackendHealth::up(Duration::ZERO)
    }

    async fn get_stats(&self) -> Result<BackendStats, LockError> {
        let now = self.clock.utc_now();
        let state = self.state();
        Ok(BackendStats {
            active_locks: state.holders.values().filter(|l| !l.is_expired(now)).count(),
            queued_requests: state.queues.values().map(ResourceQueue::len).sum(),
            total_acquired: state.totals.acquired,
            total_released: state.totals.released,
            total_promoted: state.totals.promoted,
            backend: self.name().to_string(),
        })
    }

    async fn subscribe(&self, patterns: &[&str]) -> Result<EventReceiver, LockError> {
        Ok(self.events.subscribe_patterns(patterns))
    }

    async fn cleanup_expired_locks(&self) -> Result<CleanupReport, LockError> {
        let now = self.clock.utc_now();
        let mut events = Vec::new();
        let report = {
            let mut state = self.state();
            let scanned = state.holders.len();
            let expired: Vec<ResourceIdentifier> = state
                .holders
                .iter()
                .filter(|(_, l)| l.is_expired(now))
                .map(|(r, _)| r.clone())
                .collect();
            for resource in &expired {
                state.settle(resource, now, &mut events);
            }
            CleanupReport {
                scanned,
                cleaned: expired.len(),
                more: false,
            }
        };
        self.publish_all(events);
        Ok(report)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
