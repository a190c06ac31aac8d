// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock manager
//!
//! Front door for lock requests. A request is validated, checked against the
//! wait graph, and handed to the backend under one admission mutex so the
//! deadlock check and the wait it guards cannot interleave with another
//! request's, nor with a release that promotes the next waiter. Granted
//! locks get an expiry timer; queued requests poll for promotion until
//! granted, cancelled, or timed out.

use crate::maintenance;
use crate::metrics::{Counter, ManagerStats, Metrics};
use crate::timers::LockTimers;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use warden_core::{
    AcquireOutcome, BackendStats, Clock, ComponentStatus, DeadlockDetector, DeadlockRecord,
    EnhancedLock, EventBus, EventReceiver, HealthReport, LegacyBackend, LockBackend, LockError,
    LockEvent, LockInfo, LockRequest, LockingConfig, PendingRequest, Priority, Project,
    ProjectLock, PullRequest, RequestIds, ResourceIdentifier, SystemClock, User,
};

/// Bound on waiting for queued callers to leave during shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Request options
// =============================================================================

/// Everything a lock request can specify
#[derive(Clone, Debug, PartialEq)]
pub struct LockOptions {
    pub project: Project,
    pub workspace: String,
    pub user: User,
    pub pull: PullRequest,
    pub priority: Priority,
    /// Lock lifetime and wait bound; zero means the configured default
    pub timeout: Duration,
    pub metadata: BTreeMap<String, String>,
    /// Wait in the queue when held; `None` follows the queue config
    pub queue: Option<bool>,
}

impl LockOptions {
    pub fn new(project: Project, workspace: impl Into<String>, user: User) -> Self {
        Self {
            project,
            workspace: workspace.into(),
            user,
            pull: PullRequest::default(),
            priority: Priority::Normal,
            timeout: Duration::ZERO,
            metadata: BTreeMap::new(),
            queue: None,
        }
    }

    /// Options that take the same lock a legacy caller asked for
    pub fn from_legacy(lock: &ProjectLock) -> Self {
        Self::new(lock.project.clone(), lock.workspace.clone(), lock.user.clone())
            .with_pull(lock.pull.clone())
    }

    pub fn with_pull(mut self, pull: PullRequest) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn queued(mut self, queue: bool) -> Self {
        self.queue = Some(queue);
        self
    }
}

// =============================================================================
// Waiters
// =============================================================================

/// Why a queued caller stopped waiting before promotion
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum WaitAbort {
    Cancelled,
    Deadlock { cycle: Vec<String> },
    Shutdown,
}

impl WaitAbort {
    fn into_error(self, request_id: &str) -> LockError {
        match self {
            WaitAbort::Cancelled => LockError::LockNotFound("request cancelled".to_string()),
            WaitAbort::Deadlock { cycle } => LockError::Deadlock {
                request_id: request_id.to_string(),
                cycle,
            },
            WaitAbort::Shutdown => LockError::ShuttingDown,
        }
    }
}

struct Waiter {
    resource: ResourceIdentifier,
    lock_id: String,
    owner: String,
    abort: watch::Sender<Option<WaitAbort>>,
}

/// Result of admitting a request without waiting
enum Admission {
    Granted(EnhancedLock),
    /// Held by someone else and the request does not queue
    Held(EnhancedLock),
    Queued {
        pending: EnhancedLock,
        abort: watch::Receiver<Option<WaitAbort>>,
    },
}

// =============================================================================
// Shared state
// =============================================================================

pub(crate) struct Inner<C: Clock> {
    me: Weak<Inner<C>>,
    pub(crate) backend: Arc<dyn LockBackend>,
    pub(crate) config: LockingConfig,
    pub(crate) clock: C,
    ids: RequestIds,
    pub(crate) detector: DeadlockDetector<C>,
    timers: LockTimers,
    metrics: Metrics,
    events: EventBus,
    admission: tokio::sync::Mutex<()>,
    waiters: Mutex<HashMap<String, Waiter>>,
    drained: Notify,
    accepting: AtomicBool,
    pub(crate) shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

/// Orchestrates lock requests over a backend
pub struct LockManager<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for LockManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl LockManager<SystemClock> {
    pub fn new(backend: Arc<dyn LockBackend>, config: LockingConfig) -> Self {
        Self::with_clock(backend, config, SystemClock)
    }
}

impl<C: Clock> LockManager<C> {
    pub fn with_clock(backend: Arc<dyn LockBackend>, config: LockingConfig, clock: C) -> Self {
        let (shutdown, _) = watch::channel(false);
        let detector = DeadlockDetector::new(
            clock.clone(),
            config.deadlock.resolution_policy,
            config.deadlock.history_size,
        );
        let started_at = clock.utc_now();
        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            backend,
            config,
            clock,
            ids: RequestIds::new(),
            detector,
            timers: LockTimers::new(),
            metrics: Metrics::default(),
            events: EventBus::new(),
            admission: tokio::sync::Mutex::new(()),
            waiters: Mutex::new(HashMap::new()),
            drained: Notify::new(),
            accepting: AtomicBool::new(true),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            started_at,
        });
        Self { inner }
    }

    pub fn backend(&self) -> &Arc<dyn LockBackend> {
        &self.inner.backend
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner<C>> {
        &self.inner
    }

    pub fn config(&self) -> &LockingConfig {
        &self.inner.config
    }

    pub(crate) fn clock(&self) -> &C {
        &self.inner.clock
    }

    /// Manager lifecycle events (`lock:*`, `deadlock:*`)
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self, patterns: &[&str]) -> EventReceiver {
        self.inner.events.subscribe_patterns(patterns)
    }

    pub fn deadlock_history(&self) -> Vec<DeadlockRecord> {
        self.inner.detector.history()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Locks granted through this manager that it still holds
    pub fn held_locally(&self) -> usize {
        self.inner.timers.len()
    }

    /// Requests from this manager waiting in a queue
    pub fn waiting_locally(&self) -> usize {
        self.inner.waiters().len()
    }

    // -- acquisition --

    pub async fn lock(
        &self,
        project: &Project,
        workspace: &str,
        user: &User,
    ) -> Result<EnhancedLock, LockError> {
        self.lock_with_options(LockOptions::new(project.clone(), workspace, user.clone()))
            .await
    }

    pub async fn lock_with_priority(
        &self,
        project: &Project,
        workspace: &str,
        user: &User,
        priority: Priority,
    ) -> Result<EnhancedLock, LockError> {
        self.lock_with_options(
            LockOptions::new(project.clone(), workspace, user.clone()).with_priority(priority),
        )
        .await
    }

    pub async fn lock_with_timeout(
        &self,
        project: &Project,
        workspace: &str,
        user: &User,
        timeout: Duration,
    ) -> Result<EnhancedLock, LockError> {
        self.lock_with_options(
            LockOptions::new(project.clone(), workspace, user.clone()).with_timeout(timeout),
        )
        .await
    }

    /// Acquire, waiting in the queue when the options and config allow it
    pub async fn lock_with_options(&self, options: LockOptions) -> Result<EnhancedLock, LockError> {
        match self.inner.acquire(options).await? {
            Ok(lock) => Ok(lock),
            Err(holder) => Err(LockError::LockExists {
                resource: holder.resource.to_string(),
                pull: holder.pull_num(),
                holder: holder.owner,
            }),
        }
    }

    // -- release --

    /// Release the caller's lock; no lock is `Ok(None)`
    pub async fn unlock(
        &self,
        project: &Project,
        workspace: &str,
        user: &User,
    ) -> Result<Option<EnhancedLock>, LockError> {
        let resource = project.resource(workspace);
        let Some(holder) = self.inner.backend.get_resource_lock(&resource).await? else {
            return Ok(None);
        };
        if holder.owner != user.username {
            return Err(LockError::PermissionDenied(format!(
                "{} is locked by {}",
                resource, holder.owner
            )));
        }
        self.inner.release(holder).await
    }

    /// Release whoever holds the resource
    pub async fn release_resource(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<EnhancedLock>, LockError> {
        match self
            .inner
            .backend
            .get_resource_lock(&project.resource(workspace))
            .await?
        {
            Some(holder) => self.inner.release(holder).await,
            None => Ok(None),
        }
    }

    // -- inspection --

    /// Held locks
    pub async fn list(&self) -> Result<Vec<EnhancedLock>, LockError> {
        let locks = self.inner.backend.list_locks().await?;
        Ok(locks.into_iter().filter(EnhancedLock::is_held).collect())
    }

    /// 1-based queue position of a waiting request
    pub async fn get_queue_position(
        &self,
        project: &Project,
        workspace: &str,
        request_id: &str,
    ) -> Result<Option<usize>, LockError> {
        let status = self
            .inner
            .backend
            .get_queue_status(&project.resource(workspace))
            .await?;
        Ok(status
            .entries
            .iter()
            .position(|e| e.request.id == request_id)
            .map(|i| i + 1))
    }

    /// Pull a waiting request out of its queue; its caller gets `LockNotFound`
    pub async fn cancel_queued_request(&self, request_id: &str) -> Result<(), LockError> {
        let inner = &self.inner;
        let Some((resource, lock_id, owner)) = inner.waiter(request_id) else {
            return Err(LockError::LockNotFound(request_id.to_string()));
        };
        if !inner
            .backend
            .remove_queued_request(&resource, request_id)
            .await?
        {
            return Err(LockError::LockNotFound(request_id.to_string()));
        }
        inner.detector.remove_waiting(request_id);
        inner.metrics.incr(Counter::Cancelled);
        inner.events.publish(LockEvent::Cancelled(LockInfo::new(
            &resource,
            &owner,
            &lock_id,
            inner.clock.utc_now(),
        )));
        inner.signal(request_id, WaitAbort::Cancelled);
        tracing::info!(request_id, resource = %resource, "queued request cancelled");
        Ok(())
    }

    pub async fn get_stats(&self) -> ManagerStats {
        let inner = &self.inner;
        let backend = match inner.backend.get_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "backend stats unavailable");
                BackendStats {
                    backend: inner.backend.name().to_string(),
                    ..BackendStats::default()
                }
            }
        };
        let (latency_avg, latency_p95) = inner.metrics.latency();
        ManagerStats {
            requests: inner.metrics.counters(),
            latency_avg,
            latency_p95,
            backend,
            deadlock: inner.detector.metrics(),
        }
    }

    pub async fn get_health(&self) -> HealthReport {
        self.inner.health().await
    }

    // -- lifecycle --

    /// Spawn the background loops; a second call is a no-op
    pub fn start(&self) {
        let mut tasks = self.inner.tasks();
        if !tasks.is_empty() || !self.is_accepting() {
            return;
        }
        tasks.extend(maintenance::spawn_loops(&self.inner));
        tracing::info!(
            backend = self.inner.backend.name(),
            loops = tasks.len(),
            "lock manager started"
        );
    }

    /// Refuse new requests, stop loops, drain waiters, then cancel timers
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if !inner.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("lock manager shutting down");

        let _ = inner.shutdown.send(true);
        let tasks = std::mem::take(&mut *inner.tasks());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background loop ended abnormally");
            }
        }

        let waiting = inner.waiter_ids();
        for request_id in &waiting {
            inner.signal(request_id, WaitAbort::Shutdown);
        }
        inner.drain().await;

        let timers = inner.timers.cancel_all();
        tracing::info!(
            waiters = waiting.len(),
            timers,
            "lock manager stopped"
        );
    }
}

// =============================================================================
// Request flow
// =============================================================================

impl<C: Clock> Inner<C> {
    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<String, Waiter>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Granted lock, or the holder when the request did not queue
    async fn acquire(
        &self,
        options: LockOptions,
    ) -> Result<Result<EnhancedLock, EnhancedLock>, LockError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(LockError::ShuttingDown);
        }
        let started = Instant::now();
        self.metrics.incr(Counter::Total);

        let result = match self.build_request(options) {
            Ok(request) => self.admit_and_wait(&request).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(Ok(lock)) => {
                self.metrics.incr(Counter::Acquired);
                self.metrics.record_latency(started.elapsed());
                tracing::debug!(
                    lock_id = %lock.id,
                    owner = %lock.owner,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "lock granted"
                );
            }
            Ok(Err(_)) | Err(_) => self.metrics.incr(Counter::Failed),
        }
        result
    }

    fn build_request(&self, options: LockOptions) -> Result<LockRequest, LockError> {
        if options.project.repo_full_name.is_empty() {
            return Err(LockError::InvalidRequest("repository is required".to_string()));
        }
        if options.workspace.is_empty() {
            return Err(LockError::InvalidRequest("workspace is required".to_string()));
        }
        if options.user.username.is_empty() {
            return Err(LockError::InvalidRequest("user is required".to_string()));
        }
        let timeout = if options.timeout.is_zero() {
            self.config.default_timeout
        } else {
            options.timeout
        };
        if timeout > self.config.max_timeout {
            return Err(LockError::InvalidRequest(format!(
                "timeout {:?} exceeds maximum {:?}",
                timeout, self.config.max_timeout
            )));
        }

        let resource = options.project.resource(&options.workspace);
        resource.validate()?;
        let queue = options.queue.unwrap_or(true) && self.config.queue.enabled;
        let now = self.clock.utc_now();
        let original = ProjectLock::new(
            options.project,
            options.workspace,
            options.user.clone(),
            options.pull,
            now,
        );
        Ok(LockRequest::new(self.ids.next(now), resource, options.user.username, now)
            .with_priority(options.priority)
            .with_timeout(timeout)
            .with_metadata(options.metadata)
            .with_original(original)
            .queued(queue))
    }

    async fn admit_and_wait(
        &self,
        request: &LockRequest,
    ) -> Result<Result<EnhancedLock, EnhancedLock>, LockError> {
        match self.admit(request).await? {
            Admission::Granted(lock) => Ok(Ok(lock)),
            Admission::Held(holder) => Ok(Err(holder)),
            Admission::Queued { pending, abort } => {
                self.wait_for_promotion(request, pending, abort).await.map(Ok)
            }
        }
    }

    /// Admit with retries; backoff sleeps run outside the admission mutex
    async fn admit(&self, request: &LockRequest) -> Result<Admission, LockError> {
        self.config
            .retry
            .effective()
            .run(
                || self.admit_once(request),
                |attempt, e| {
                    self.metrics.incr(Counter::Retries);
                    tracing::warn!(attempt, error = %e, "retrying acquisition");
                },
            )
            .await
    }

    /// Deadlock check, backend attempt and wait-graph update as one step
    async fn admit_once(&self, request: &LockRequest) -> Result<Admission, LockError> {
        let _admission = self.admission.lock().await;
        let waiting = PendingRequest {
            request_id: request.id.clone(),
            owner: request.owner.clone(),
            resource: request.resource.key(),
            priority: request.priority,
            since: request.requested_at,
        };
        let track_waits = request.queue_if_held && self.config.deadlock.enabled;

        if track_waits {
            self.sync_holder(&request.resource).await?;
            if let Err(e) = self.detector.prevent_deadlock(&waiting) {
                self.metrics.incr(Counter::DeadlocksPrevented);
                if let LockError::Deadlock { request_id, cycle } = &e {
                    self.events.publish(LockEvent::DeadlockPrevented {
                        request_id: request_id.clone(),
                        cycle: cycle.clone(),
                        timestamp: self.clock.utc_now(),
                    });
                }
                return Err(e);
            }
        }

        match self.backend.try_acquire_lock(request).await? {
            AcquireOutcome::Acquired(lock) => {
                self.on_granted(&lock);
                self.events
                    .publish(LockEvent::Acquired(LockInfo::of(&lock, self.clock.utc_now())));
                Ok(Admission::Granted(lock))
            }
            AcquireOutcome::Held(holder) => {
                tracing::debug!(
                    resource = %request.resource,
                    holder = %holder.owner,
                    "resource held"
                );
                Ok(Admission::Held(holder))
            }
            AcquireOutcome::Queued { lock, position } => {
                if track_waits {
                    self.detector.add_waiting(waiting);
                }
                let (tx, rx) = watch::channel(None);
                self.waiters().insert(
                    request.id.clone(),
                    Waiter {
                        resource: request.resource.clone(),
                        lock_id: lock.id.clone(),
                        owner: request.owner.clone(),
                        abort: tx,
                    },
                );
                self.metrics.incr(Counter::Queued);
                self.events.publish(LockEvent::Queued {
                    info: LockInfo::of(&lock, self.clock.utc_now()),
                    position: position as u64,
                });
                tracing::debug!(
                    request_id = %request.id,
                    resource = %request.resource,
                    position,
                    "request queued"
                );
                Ok(Admission::Queued {
                    pending: lock,
                    abort: rx,
                })
            }
        }
    }

    /// Poll until the backend names our pending lock as holder
    async fn wait_for_promotion(
        &self,
        request: &LockRequest,
        pending: EnhancedLock,
        mut abort: watch::Receiver<Option<WaitAbort>>,
    ) -> Result<EnhancedLock, LockError> {
        let deadline = tokio::time::Instant::now() + request.timeout;
        let poll = self.config.queue.poll_interval;

        let outcome = loop {
            match self.backend.get_resource_lock(&request.resource).await {
                Ok(Some(holder)) if holder.id == pending.id => break Ok(holder),
                Ok(_) => {}
                Err(e) => tracing::debug!(request_id = %request.id, error = %e, "promotion poll failed"),
            }
            let aborted = abort.borrow_and_update().clone();
            if let Some(reason) = aborted {
                break Err(Some(reason));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break Err(None);
            }
            let nap = poll.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                changed = abort.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep(nap).await;
                    }
                }
            }
        };

        let result = match outcome {
            Ok(lock) => Ok(lock),
            Err(None) => match self.withdraw(request, &pending).await {
                Some(lock) => Ok(lock),
                None => {
                    self.metrics.incr(Counter::Timeouts);
                    self.events.publish(LockEvent::Timeout(LockInfo::of(
                        &pending,
                        self.clock.utc_now(),
                    )));
                    tracing::info!(request_id = %request.id, resource = %request.resource, "queued request timed out");
                    Err(LockError::Timeout {
                        resource: request.resource.to_string(),
                        waited: request.timeout,
                    })
                }
            },
            Err(Some(WaitAbort::Shutdown)) => {
                if let Some(lock) = self.withdraw(request, &pending).await {
                    let _ = self.release(lock).await;
                }
                Err(LockError::ShuttingDown)
            }
            Err(Some(reason)) => Err(reason.into_error(&request.id)),
        };

        self.detector.remove_waiting(&request.id);
        self.unregister(&request.id);
        if let Ok(lock) = &result {
            self.on_granted(lock);
            self.events
                .publish(LockEvent::Promoted(LockInfo::of(lock, self.clock.utc_now())));
        }
        result
    }

    /// Take a request out of the queue; returns the lock if it was granted first
    async fn withdraw(&self, request: &LockRequest, pending: &EnhancedLock) -> Option<EnhancedLock> {
        match self
            .backend
            .remove_queued_request(&request.resource, &request.id)
            .await
        {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => tracing::warn!(request_id = %request.id, error = %e, "failed to remove queued request"),
        }
        match self.backend.get_resource_lock(&request.resource).await {
            Ok(Some(holder)) if holder.id == pending.id => Some(holder),
            _ => None,
        }
    }

    // -- holders and timers --

    fn on_granted(&self, lock: &EnhancedLock) {
        self.detector.set_holder(&lock.resource.key(), &lock.owner);
        self.arm_timer(lock);
    }

    /// Auto-release `lock` when its TTL lapses
    fn arm_timer(&self, lock: &EnhancedLock) {
        let Some(ttl) = lock.remaining(self.clock.utc_now()) else {
            return;
        };
        let me = self.me.clone();
        let lock_id = lock.id.clone();
        self.timers.arm(&lock.id, ttl, async move {
            if let Some(inner) = me.upgrade() {
                inner.auto_release(&lock_id).await;
            }
        });
    }

    async fn auto_release(&self, lock_id: &str) {
        let _admission = self.admission.lock().await;
        match self.backend.release_lock(lock_id).await {
            Ok(outcome) => {
                self.metrics.incr(Counter::AutoReleased);
                self.events.publish(LockEvent::AutoReleased(LockInfo::of(
                    &outcome.released,
                    self.clock.utc_now(),
                )));
                tracing::info!(
                    lock_id,
                    resource = %outcome.released.resource,
                    owner = %outcome.released.owner,
                    "lock auto-released"
                );
                self.after_release(&outcome.released, outcome.promoted.as_ref());
            }
            Err(LockError::LockNotFound(_)) => {
                tracing::debug!(lock_id, "expired lock already released");
            }
            Err(e) => tracing::error!(lock_id, error = %e, "auto-release failed"),
        }
    }

    async fn release(&self, holder: EnhancedLock) -> Result<Option<EnhancedLock>, LockError> {
        let _admission = self.admission.lock().await;
        let outcome = match self.backend.release_lock(&holder.id).await {
            Ok(outcome) => outcome,
            Err(LockError::LockNotFound(_)) => {
                self.timers.cancel(&holder.id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.timers.cancel(&holder.id);
        self.events.publish(LockEvent::Released(LockInfo::of(
            &outcome.released,
            self.clock.utc_now(),
        )));
        tracing::info!(
            lock_id = %outcome.released.id,
            resource = %outcome.released.resource,
            owner = %outcome.released.owner,
            promoted = outcome.promoted.as_ref().map(|l| l.owner.as_str()),
            "lock released"
        );
        self.after_release(&outcome.released, outcome.promoted.as_ref());
        Ok(Some(outcome.released))
    }

    fn after_release(&self, released: &EnhancedLock, promoted: Option<&EnhancedLock>) {
        match promoted {
            Some(next) => self.on_granted(next),
            None => self.detector.clear_holder(&released.resource.key()),
        }
    }

    /// Mirror the backend's holder into the wait graph
    async fn sync_holder(&self, resource: &ResourceIdentifier) -> Result<(), LockError> {
        match self.backend.get_resource_lock(resource).await? {
            Some(holder) => self.detector.set_holder(&resource.key(), &holder.owner),
            None => self.detector.clear_holder(&resource.key()),
        }
        Ok(())
    }

    // -- waiter registry --

    fn waiter(&self, request_id: &str) -> Option<(ResourceIdentifier, String, String)> {
        self.waiters()
            .get(request_id)
            .map(|w| (w.resource.clone(), w.lock_id.clone(), w.owner.clone()))
    }

    fn waiter_ids(&self) -> Vec<String> {
        self.waiters().keys().cloned().collect()
    }

    fn signal(&self, request_id: &str, reason: WaitAbort) {
        if let Some(waiter) = self.waiters().get(request_id) {
            waiter.abort.send_replace(Some(reason));
        }
    }

    fn unregister(&self, request_id: &str) {
        let mut waiters = self.waiters();
        waiters.remove(request_id);
        if waiters.is_empty() {
            self.drained.notify_waiters();
        }
    }

    async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.waiters().is_empty() {
                return;
            }
            if tokio::time::timeout(DRAIN_TIMEOUT, notified).await.is_err() {
                tracing::warn!(
                    remaining = self.waiters().len(),
                    "waiters did not drain before shutdown"
                );
                return;
            }
        }
    }

    // -- background work --

    /// Find wait cycles and cancel one queued request per cycle
    pub(crate) async fn sweep_deadlocks(&self) -> usize {
        let mut resources: Vec<ResourceIdentifier> =
            self.waiters().values().map(|w| w.resource.clone()).collect();
        resources.sort_by_key(ResourceIdentifier::key);
        resources.dedup();
        for resource in &resources {
            if let Err(e) = self.sync_holder(resource).await {
                tracing::debug!(resource = %resource, error = %e, "holder refresh failed");
            }
        }

        let records = self.detector.detect();
        for record in &records {
            self.events.publish(LockEvent::DeadlockDetected {
                id: record.id.clone(),
                cycle: record.cycle.clone(),
                timestamp: record.detected_at,
            });
            let Some(victim) = self.detector.choose_victim(record) else {
                continue;
            };
            if self
                .abort_waiter(
                    &victim.request_id,
                    WaitAbort::Deadlock {
                        cycle: record.cycle.clone(),
                    },
                )
                .await
            {
                self.detector.mark_resolved(&record.id, &victim.request_id);
                self.events.publish(LockEvent::DeadlockResolved {
                    id: record.id.clone(),
                    victim: victim.request_id.clone(),
                    timestamp: self.clock.utc_now(),
                });
                tracing::warn!(
                    id = %record.id,
                    victim = %victim.request_id,
                    "deadlock resolved"
                );
            }
        }
        records.len()
    }

    /// Remove a local waiter's queue entry and wake it with `reason`
    async fn abort_waiter(&self, request_id: &str, reason: WaitAbort) -> bool {
        let Some((resource, _, _)) = self.waiter(request_id) else {
            return false;
        };
        match self.backend.remove_queued_request(&resource, request_id).await {
            Ok(true) => {
                self.signal(request_id, reason);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(request_id, error = %e, "failed to cancel queued request");
                false
            }
        }
    }

    pub(crate) async fn health(&self) -> HealthReport {
        let now = self.clock.utc_now();
        let started = self.started_at;
        let stopping = !self.accepting.load(Ordering::SeqCst);

        let probe = self.backend.health_check().await;
        let backend = ComponentStatus::running("backend", started, now);
        let mut components = vec![if probe.healthy {
            backend
        } else {
            backend.degraded(0, probe.detail)
        }];
        if self.config.queue.enabled {
            components.push(ComponentStatus::running("queue", started, now));
        }
        if self.config.deadlock.enabled {
            components.push(ComponentStatus::running("deadlock_detector", started, now));
        }
        components.push(ComponentStatus::running("lock_timers", started, now));
        if !self.tasks().is_empty() {
            components.push(ComponentStatus::running("maintenance", started, now));
        }
        if stopping {
            components = components.into_iter().map(ComponentStatus::stopped).collect();
        }
        HealthReport::new(components, now)
    }
}

// =============================================================================
// Legacy interface
// =============================================================================

#[async_trait]
impl<C: Clock> LegacyBackend for LockManager<C> {
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock), LockError> {
        match self
            .inner
            .acquire(LockOptions::from_legacy(&lock).queued(false))
            .await?
        {
            Ok(granted) => Ok((true, granted.to_legacy())),
            Err(holder) => Ok((false, holder.to_legacy())),
        }
    }

    async fn unlock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        let released = self.release_resource(project, workspace).await?;
        Ok(released.map(|l| l.to_legacy()))
    }

    async fn list(&self) -> Result<Vec<ProjectLock>, LockError> {
        let locks = LockManager::list(self).await?;
        Ok(locks.iter().map(EnhancedLock::to_legacy).collect())
    }

    /// Releases every lock in the repository's namespace
    async fn unlock_by_pull(
        &self,
        repo: &str,
        _pull_num: u64,
    ) -> Result<Vec<ProjectLock>, LockError> {
        let mut removed = Vec::new();
        for lock in LockManager::list(self).await? {
            if lock.resource.namespace != repo {
                continue;
            }
            if let Some(released) = self.inner.release(lock).await? {
                removed.push(released.to_legacy());
            }
        }
        Ok(removed)
    }

    async fn get_lock(
        &self,
        project: &Project,
        workspace: &str,
    ) -> Result<Option<ProjectLock>, LockError> {
        self.inner.backend.get_legacy_lock(project, workspace).await
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
