// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote backend over Redis
//!
//! State-changing operations run as Lua scripts (see `scripts`). Reads go
//! straight to the keys. Every call carries the configured deadline.

mod cluster;
mod events;
mod keys;
mod reply;
mod scripts;

pub use cluster::RedisClusterStore;
pub use keys::Keys;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use reply::{AcquireReply, MutateReply, ReleaseReply, SweepReply};
use scripts::Scripts;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use warden_core::config::RedisConfig;
use warden_core::{
    AcquireOutcome, BackendHealth, BackendStats, CleanupReport, Clock, EnhancedLock, EventBus,
    EventReceiver, IdGen, LockBackend, LockError, LockRequest, LockState, QueueEntry,
    QueueStatus, ReleaseOutcome, ResourceIdentifier, ResourceQueue, StarvationPolicy,
    SystemClock, UuidIdGen, PRIORITY_BAND,
};

/// How long a holder record outlives its expiry, so it can still be released
/// and handed to the queue by cleanup
pub const EXPIRY_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RedisStoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<RedisStoreError> for LockError {
    fn from(e: RedisStoreError) -> Self {
        LockError::Backend(e.to_string())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Default)]
struct Totals {
    acquired: AtomicU64,
    released: AtomicU64,
    promoted: AtomicU64,
}

/// Lock backend on a shared Redis server
pub struct RedisBackend<C: Clock = SystemClock, I: IdGen = UuidIdGen> {
    client: redis::Client,
    conn: ConnectionManager,
    keys: Keys,
    scripts: Scripts,
    clock: C,
    ids: I,
    timeout: Duration,
    batch: usize,
    max_queue_size: usize,
    max_ttl: Duration,
    totals: Totals,
    /// Scan cursors for the lock and queue sweeps
    cursors: Mutex<(u64, u64)>,
    events: EventBus,
    forwarder: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RedisBackend<SystemClock, UuidIdGen> {
    pub async fn connect(
        config: &RedisConfig,
        max_queue_size: usize,
        max_ttl: Duration,
    ) -> Result<Self, LockError> {
        Self::connect_with(config, max_queue_size, max_ttl, SystemClock, UuidIdGen).await
    }
}

impl<C: Clock, I: IdGen> RedisBackend<C, I> {
    pub async fn connect_with(
        config: &RedisConfig,
        max_queue_size: usize,
        max_ttl: Duration,
        clock: C,
        ids: I,
    ) -> Result<Self, LockError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| LockError::backend(format!("invalid redis url: {}", e)))?;
        let conn = tokio::time::timeout(config.operation_timeout, client.get_connection_manager())
            .await
            .map_err(|_| RedisStoreError::Timeout(config.operation_timeout))?
            .map_err(RedisStoreError::from)?;
        tracing::info!(url = %config.url, prefix = %config.key_prefix, "connected to redis");
        Ok(Self {
            client,
            conn,
            keys: Keys::new(config.key_prefix.clone()),
            scripts: Scripts::new(),
            clock,
            ids,
            timeout: config.operation_timeout,
            batch: config.cleanup_batch_size.max(1),
            max_queue_size,
            max_ttl,
            totals: Totals::default(),
            cursors: Mutex::new((0, 0)),
            events: EventBus::new(),
            forwarder: tokio::sync::Mutex::new(None),
        })
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Connection shared with the cluster store
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Bound a store call by the operation deadline
    async fn run<T, F>(&self, fut: F) -> Result<T, LockError>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| RedisStoreError::from(e).into()),
            Err(_) => Err(RedisStoreError::Timeout(self.timeout).into()),
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.utc_now().timestamp_millis()
    }

    /// Every key matching `pattern`, scanning in batches
    async fn scan_all(&self, pattern: &str) -> Result<Vec<String>, LockError> {
        let mut found = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch) = self.scan_page(pattern, cursor).await?;
            found.extend(batch);
            if next == 0 {
                return Ok(found);
            }
            cursor = next;
        }
    }

    async fn scan_page(&self, pattern: &str, cursor: u64) -> Result<(u64, Vec<String>), LockError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(self.batch);
        self.run(async move { cmd.query_async(&mut conn).await }).await
    }

    async fn read_lock(&self, key: &str) -> Result<Option<EnhancedLock>, LockError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let raw: Option<String> = self.run(async move { conn.get(key).await }).await?;
        raw.map(|r| reply::decode::<EnhancedLock>(&r)).transpose()
    }

    async fn read_queue(&self, queue_key: &str) -> Result<Vec<QueueEntry>, LockError> {
        let mut conn = self.conn.clone();
        let key = queue_key.to_string();
        let members: Vec<String> =
            self.run(async move { conn.zrange(key, 0, -1).await }).await?;
        members.iter().map(|m| reply::decode(m)).collect()
    }

    async fn take_queued(
        &self,
        resource: &ResourceIdentifier,
        request_id: &str,
        mode: &str,
    ) -> Result<Option<QueueEntry>, LockError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.take_queued.prepare_invoke();
        invocation
            .key(self.keys.queue(resource))
            .arg(request_id)
            .arg(self.keys.index_prefix())
            .arg(mode);
        let raw: Option<String> = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        raw.map(|r| reply::decode::<QueueEntry>(&r)).transpose()
    }

    async fn sweep(&self, suffix: &str) -> Result<SweepReply, LockError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.sweep.prepare_invoke();
        invocation
            .key(self.keys.lock_from_suffix(suffix))
            .key(self.keys.queue_from_suffix(suffix))
            .arg(self.now_ms())
            .arg(millis(EXPIRY_GRACE))
            .arg(self.keys.index_prefix())
            .arg(self.keys.lock_channel())
            .arg(suffix);
        let raw: String = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        reply::decode(&raw)
    }

    /// Resource key suffix for a held or queued lock id
    async fn suffix_for(&self, lock_id: &str) -> Result<Option<String>, LockError> {
        let mut conn = self.conn.clone();
        let key = self.keys.index(lock_id);
        self.run(async move { conn.get(key).await }).await
    }
}

#[async_trait]
impl<C: Clock, I: IdGen> LockBackend for RedisBackend<C, I> {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn try_acquire_lock(&self, request: &LockRequest) -> Result<AcquireOutcome, LockError> {
        request.resource.validate()?;
        let now = self.clock.utc_now();
        let lock_id = self.ids.next();
        let lock = EnhancedLock::acquired(request, lock_id.clone(), now);
        let entry = QueueEntry::new(request.clone(), lock_id.clone(), now);

        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.acquire.prepare_invoke();
        invocation
            .key(self.keys.lock(&request.resource))
            .key(self.keys.queue(&request.resource))
            .key(self.keys.index(&lock_id))
            .arg(serde_json::to_string(&lock)?)
            .arg(serde_json::to_string(&entry)?)
            .arg(now.timestamp_millis())
            .arg(if request.queue_if_held { "1" } else { "0" })
            .arg(self.max_queue_size)
            .arg(keys::score_arg(&entry))
            .arg(&request.id)
            .arg(millis(EXPIRY_GRACE))
            .arg(self.keys.index_prefix())
            .arg(self.keys.lock_channel())
            .arg(request.resource.key());
        let raw: String = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;

        let outcome = reply::decode::<AcquireReply>(&raw)?
            .into_outcome(&request.resource.to_string(), self.max_queue_size)?;
        if let AcquireOutcome::Acquired(granted) = &outcome {
            if granted.id == lock_id {
                self.totals.acquired.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(outcome)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<ReleaseOutcome, LockError> {
        let suffix = self
            .suffix_for(lock_id)
            .await?
            .ok_or_else(|| LockError::LockNotFound(lock_id.to_string()))?;

        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.release.prepare_invoke();
        invocation
            .key(self.keys.lock_from_suffix(&suffix))
            .key(self.keys.queue_from_suffix(&suffix))
            .arg(lock_id)
            .arg(self.now_ms())
            .arg(millis(EXPIRY_GRACE))
            .arg(self.keys.index_prefix())
            .arg(self.keys.lock_channel())
            .arg(&suffix);
        let raw: String = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;

        let outcome = reply::decode::<ReleaseReply>(&raw)?.into_outcome(lock_id)?;
        self.totals.released.fetch_add(1, Ordering::Relaxed);
        if outcome.promoted.is_some() {
            self.totals.promoted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    async fn get_lock(&self, lock_id: &str) -> Result<Option<EnhancedLock>, LockError> {
        let Some(suffix) = self.suffix_for(lock_id).await? else {
            return Ok(None);
        };
        let now = self.clock.utc_now();
        if let Some(lock) = self.read_lock(&self.keys.lock_from_suffix(&suffix)).await? {
            if lock.id == lock_id {
                return Ok((!lock.is_expired(now)).then_some(lock));
            }
        }
        let queued = self.read_queue(&self.keys.queue_from_suffix(&suffix)).await?;
        Ok(queued
            .iter()
            .find(|e| e.lock_id == lock_id)
            .map(QueueEntry::pending_lock))
    }

    async fn get_resource_lock(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<EnhancedLock>, LockError> {
        let now = self.clock.utc_now();
        let lock = self.read_lock(&self.keys.lock(resource)).await?;
        Ok(lock.filter(|l| !l.is_expired(now)))
    }

    async fn list_locks(&self) -> Result<Vec<EnhancedLock>, LockError> {
        let now = self.clock.utc_now();
        let mut locks = Vec::new();
        for key in self.scan_all(&self.keys.lock_pattern()).await? {
            // Keys can vanish between scan and read
            if let Some(mut lock) = self.read_lock(&key).await? {
                if lock.is_expired(now) {
                    lock.state = LockState::Expired;
                }
                locks.push(lock);
            }
        }
        locks.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at).then_with(|| a.id.cmp(&b.id)));
        Ok(locks)
    }

    async fn refresh_lock(
        &self,
        lock_id: &str,
        extension: Duration,
    ) -> Result<EnhancedLock, LockError> {
        let suffix = self
            .suffix_for(lock_id)
            .await?
            .ok_or_else(|| LockError::LockNotFound(lock_id.to_string()))?;
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.refresh.prepare_invoke();
        invocation
            .key(self.keys.lock_from_suffix(&suffix))
            .key(self.keys.index(lock_id))
            .arg(lock_id)
            .arg(millis(extension))
            .arg(millis(self.max_ttl))
            .arg(self.now_ms())
            .arg(millis(EXPIRY_GRACE))
            .arg(self.keys.lock_channel())
            .arg(&suffix);
        let raw: String = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        reply::decode::<MutateReply>(&raw)?.into_lock(lock_id)
    }

    async fn transfer_lock(
        &self,
        lock_id: &str,
        new_owner: &str,
    ) -> Result<EnhancedLock, LockError> {
        let suffix = self
            .suffix_for(lock_id)
            .await?
            .ok_or_else(|| LockError::LockNotFound(lock_id.to_string()))?;
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.transfer.prepare_invoke();
        invocation
            .key(self.keys.lock_from_suffix(&suffix))
            .arg(lock_id)
            .arg(new_owner)
            .arg(self.now_ms())
            .arg(self.keys.lock_channel())
            .arg(&suffix);
        let raw: String = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        reply::decode::<MutateReply>(&raw)?.into_lock(lock_id)
    }

    async fn enqueue_lock_request(&self, request: &LockRequest) -> Result<usize, LockError> {
        request.resource.validate()?;
        let now = self.clock.utc_now();
        let lock_id = self.ids.next();
        let entry = QueueEntry::new(request.clone(), lock_id.clone(), now);

        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.enqueue.prepare_invoke();
        invocation
            .key(self.keys.queue(&request.resource))
            .key(self.keys.index(&lock_id))
            .arg(serde_json::to_string(&entry)?)
            .arg(keys::score_arg(&entry))
            .arg(self.max_queue_size)
            .arg(&request.id)
            .arg(request.resource.key())
            .arg(self.keys.lock_channel())
            .arg(now.timestamp_millis());
        let raw: String = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        match reply::decode::<AcquireReply>(&raw)?
            .into_outcome(&request.resource.to_string(), self.max_queue_size)?
        {
            AcquireOutcome::Queued { position, .. } => Ok(position),
            other => Err(LockError::backend(format!(
                "unexpected enqueue reply: {:?}",
                other
            ))),
        }
    }

    async fn dequeue_next_request(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<Option<QueueEntry>, LockError> {
        self.take_queued(resource, "", "pop").await
    }

    async fn remove_queued_request(
        &self,
        resource: &ResourceIdentifier,
        request_id: &str,
    ) -> Result<bool, LockError> {
        Ok(self
            .take_queued(resource, request_id, "remove")
            .await?
            .is_some())
    }

    async fn get_queue_status(
        &self,
        resource: &ResourceIdentifier,
    ) -> Result<QueueStatus, LockError> {
        let entries = self.read_queue(&self.keys.queue(resource)).await?;
        Ok(ResourceQueue::from_entries(entries).status())
    }

    async fn boost_waiting(&self, policy: &StarvationPolicy) -> Result<usize, LockError> {
        let mut changed = 0usize;
        for key in self.scan_all(&self.keys.queue_pattern()).await? {
            let mut conn = self.conn.clone();
            let mut invocation = self.scripts.boost.prepare_invoke();
            invocation
                .key(key)
                .arg(self.now_ms())
                .arg(millis(policy.threshold))
                .arg(policy.max_boost)
                .arg(PRIORITY_BAND);
            let n: usize = self
                .run(async move { invocation.invoke_async(&mut conn).await })
                .await?;
            changed += n;
        }
        Ok(changed)
    }

    async fn expire_queued(&self, max_age: Duration) -> Result<usize, LockError> {
        let cutoff = self.now_ms() - i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let mut removed = 0usize;
        for key in self.scan_all(&self.keys.queue_pattern()).await? {
            let mut conn = self.conn.clone();
            let mut invocation = self.scripts.expire_queued.prepare_invoke();
            invocation.key(key).arg(cutoff).arg(self.keys.index_prefix());
            let n: usize = self
                .run(async move { invocation.invoke_async(&mut conn).await })
                .await?;
            removed += n;
        }
        Ok(removed)
    }

    async fn health_check(&self) -> BackendHealth {
        let start = Instant::now();
        let mut conn = self.conn.clone();
        let result: Result<String, LockError> = self
            .run(async move { redis::cmd("PING").query_async(&mut conn).await })
            .await;
        match result {
            Ok(_) => BackendHealth::up(start.elapsed()),
            Err(e) => BackendHealth::down(start.elapsed(), e.to_string()),
        }
    }

    async fn get_stats(&self) -> Result<BackendStats, LockError> {
        let active_locks = self.scan_all(&self.keys.lock_pattern()).await?.len();
        let mut queued_requests = 0usize;
        for key in self.scan_all(&self.keys.queue_pattern()).await? {
            let mut conn = self.conn.clone();
            let n: usize = self.run(async move { conn.zcard(key).await }).await?;
            queued_requests += n;
        }
        Ok(BackendStats {
            active_locks,
            queued_requests,
            total_acquired: self.totals.acquired.load(Ordering::Relaxed),
            total_released: self.totals.released.load(Ordering::Relaxed),
            total_promoted: self.totals.promoted.load(Ordering::Relaxed),
            backend: self.name().to_string(),
        })
    }

    async fn subscribe(&self, patterns: &[&str]) -> Result<EventReceiver, LockError> {
        let mut forwarder = self.forwarder.lock().await;
        if forwarder.as_ref().map_or(true, |h| h.is_finished()) {
            let handle = events::spawn_forwarder(
                self.client.clone(),
                self.keys.channel_pattern(),
                self.events.clone(),
            )
            .await?;
            *forwarder = Some(handle);
        }
        Ok(self.events.subscribe_patterns(patterns))
    }

    async fn cleanup_expired_locks(&self) -> Result<CleanupReport, LockError> {
        let (lock_cursor, queue_cursor) = *self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let (next_lock, lock_keys) = self.scan_page(&self.keys.lock_pattern(), lock_cursor).await?;
        let (next_queue, queue_keys) = self
            .scan_page(&self.keys.queue_pattern(), queue_cursor)
            .await?;
        *self.cursors.lock().unwrap_or_else(|e| e.into_inner()) = (next_lock, next_queue);

        let mut suffixes: Vec<&str> = lock_keys
            .iter()
            .chain(queue_keys.iter())
            .filter_map(|k| self.keys.suffix_of(k))
            .collect();
        suffixes.sort_unstable();
        suffixes.dedup();

        let mut cleaned = 0;
        for suffix in &suffixes {
            let swept = self.sweep(suffix).await?;
            cleaned += swept.cleaned;
            if swept.promoted {
                self.totals.promoted.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(CleanupReport {
            scanned: lock_keys.len() + queue_keys.len(),
            cleaned,
            more: next_lock != 0 || next_queue != 0,
        })
    }
}

#[cfg(test)]
#[path = "redis_tests.rs"]
mod tests;
