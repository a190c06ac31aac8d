// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request counters and acquisition latency

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use warden_core::{BackendStats, DeadlockMetrics};

/// Latency samples kept for the average and p95
const LATENCY_WINDOW: usize = 1000;

/// Counter snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounters {
    pub total: u64,
    pub acquired: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub deadlocks_prevented: u64,
    pub queued: u64,
    pub cancelled: u64,
    pub auto_released: u64,
    pub retries: u64,
}

/// Everything `LockManager::get_stats` reports
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub requests: RequestCounters,
    #[serde(with = "humantime_serde")]
    pub latency_avg: Duration,
    #[serde(with = "humantime_serde")]
    pub latency_p95: Duration,
    pub backend: BackendStats,
    pub deadlock: DeadlockMetrics,
}

#[derive(Default)]
pub(crate) struct Metrics {
    total: AtomicU64,
    acquired: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    deadlocks_prevented: AtomicU64,
    queued: AtomicU64,
    cancelled: AtomicU64,
    auto_released: AtomicU64,
    retries: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Counter {
    Total,
    Acquired,
    Failed,
    Timeouts,
    DeadlocksPrevented,
    Queued,
    Cancelled,
    AutoReleased,
    Retries,
}

impl Metrics {
    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Total => &self.total,
            Counter::Acquired => &self.acquired,
            Counter::Failed => &self.failed,
            Counter::Timeouts => &self.timeouts,
            Counter::DeadlocksPrevented => &self.deadlocks_prevented,
            Counter::Queued => &self.queued,
            Counter::Cancelled => &self.cancelled,
            Counter::AutoReleased => &self.auto_released,
            Counter::Retries => &self.retries,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    /// Record the time from request to grant
    pub fn record_latency(&self, latency: Duration) {
        let mut samples = self.latencies.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() == LATENCY_WINDOW {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    pub fn counters(&self) -> RequestCounters {
        let get = |c| self.counter(c).load(Ordering::Relaxed);
        RequestCounters {
            total: get(Counter::Total),
            acquired: get(Counter::Acquired),
            failed: get(Counter::Failed),
            timeouts: get(Counter::Timeouts),
            deadlocks_prevented: get(Counter::DeadlocksPrevented),
            queued: get(Counter::Queued),
            cancelled: get(Counter::Cancelled),
            auto_released: get(Counter::AutoReleased),
            retries: get(Counter::Retries),
        }
    }

    /// Average and 95th percentile of the recorded latencies
    pub fn latency(&self) -> (Duration, Duration) {
        let mut samples: Vec<Duration> = {
            let guard = self.latencies.lock().unwrap_or_else(|e| e.into_inner());
            guard.iter().copied().collect()
        };
        if samples.is_empty() {
            return (Duration::ZERO, Duration::ZERO);
        }
        samples.sort();
        let total: Duration = samples.iter().sum();
        let avg = total / samples.len() as u32;
        let rank = (samples.len() * 95).div_ceil(100).max(1);
        (avg, samples[rank - 1])
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
