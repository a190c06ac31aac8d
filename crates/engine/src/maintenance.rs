// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic background loops
//!
//! Each loop runs on its own interval and stops when the shutdown signal
//! flips or its sender is dropped. A failed cycle is logged and the loop
//! carries on with the next tick.

use crate::manager::Inner;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use warden_core::Clock;

/// Cleanup passes per tick while the backend reports more to scan
const MAX_CLEANUP_PASSES: usize = 10;

/// Run `tick` every `period` until `shutdown` fires
pub(crate) fn periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(name, "loop stopped");
    })
}

/// Spawn the lock manager's loops
pub(crate) fn spawn_loops<C: Clock>(inner: &Arc<Inner<C>>) -> Vec<JoinHandle<()>> {
    let config = &inner.config;
    let mut loops = vec![
        every(inner, "cleanup", config.maintenance.cleanup_interval, |inner| async move {
            cleanup(&inner).await;
        }),
        every(inner, "queue_aging", config.maintenance.cleanup_interval, |inner| async move {
            age_queues(&inner).await;
        }),
        every(inner, "health", config.maintenance.health_interval, |inner| async move {
            poll_health(&inner).await;
        }),
    ];
    if config.queue.enabled {
        loops.push(every(
            inner,
            "starvation",
            config.maintenance.starvation_interval,
            |inner| async move {
                boost_starving(&inner).await;
            },
        ));
    }
    if config.deadlock.enabled {
        loops.push(every(
            inner,
            "deadlock",
            config.deadlock.check_interval,
            |inner| async move {
                inner.sweep_deadlocks().await;
            },
        ));
    }
    loops
}

/// A loop holding only a weak reference to the manager
fn every<C, F, Fut>(
    inner: &Arc<Inner<C>>,
    name: &'static str,
    period: Duration,
    cycle: F,
) -> JoinHandle<()>
where
    C: Clock,
    F: Fn(Arc<Inner<C>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let weak: Weak<Inner<C>> = Arc::downgrade(inner);
    let cycle = Arc::new(cycle);
    periodic(name, period, inner.shutdown.subscribe(), move || {
        let weak = weak.clone();
        let cycle = Arc::clone(&cycle);
        async move {
            if let Some(inner) = weak.upgrade() {
                cycle(inner).await;
            }
        }
    })
}

pub(crate) async fn cleanup<C: Clock>(inner: &Inner<C>) -> usize {
    let mut cleaned = 0;
    for _ in 0..MAX_CLEANUP_PASSES {
        match inner.backend.cleanup_expired_locks().await {
            Ok(report) => {
                cleaned += report.cleaned;
                if !report.more {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "expired-lock cleanup failed");
                break;
            }
        }
    }
    if cleaned > 0 {
        tracing::info!(cleaned, "expired locks cleaned");
    }
    cleaned
}

pub(crate) async fn boost_starving<C: Clock>(inner: &Inner<C>) -> usize {
    match inner
        .backend
        .boost_waiting(&inner.config.queue.starvation())
        .await
    {
        Ok(boosted) => {
            if boosted > 0 {
                tracing::debug!(boosted, "starving requests boosted");
            }
            boosted
        }
        Err(e) => {
            tracing::error!(error = %e, "starvation boost failed");
            0
        }
    }
}

pub(crate) async fn age_queues<C: Clock>(inner: &Inner<C>) -> usize {
    match inner.backend.expire_queued(inner.config.queue.max_age).await {
        Ok(expired) => {
            if expired > 0 {
                tracing::info!(expired, "stale queued requests dropped");
            }
            expired
        }
        Err(e) => {
            tracing::error!(error = %e, "queue aging failed");
            0
        }
    }
}

async fn poll_health<C: Clock>(inner: &Inner<C>) {
    let report = inner.health().await;
    if report.healthy {
        tracing::debug!(score = report.score, "health check");
    } else {
        let failing: Vec<&str> = report
            .components
            .iter()
            .filter(|c| c.error.is_some())
            .map(|c| c.name.as_str())
            .collect();
        tracing::warn!(score = report.score, failing = ?failing, "engine unhealthy");
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
