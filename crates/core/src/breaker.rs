// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit breaker guarding the enhanced backend
//!
//! Transitions are Closed→Open→HalfOpen→{Closed|Open}. Recovery always
//! passes through HalfOpen.

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Breaker thresholds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub recovery_threshold: u32,
    /// Cooldown before probing
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,
    /// Failures older than this no longer count toward the threshold
    #[serde(with = "humantime_serde")]
    pub failure_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_threshold: 3,
            open_timeout: Duration::from_secs(60),
            failure_window: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn for_testing() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 2,
            open_timeout: Duration::from_millis(50),
            failure_window: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub trips: u64,
}

struct Inner {
    config: BreakerConfig,
    state: CircuitState,
    failures: u32,
    successes: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    trips: u64,
}

impl Inner {
    /// Open→HalfOpen once the cooldown has elapsed
    fn tick(&mut self, now: Instant) {
        if self.state != CircuitState::Open {
            return;
        }
        let cooled = self
            .opened_at
            .map_or(true, |at| now.duration_since(at) >= self.config.open_timeout);
        if cooled {
            self.state = CircuitState::HalfOpen;
            self.successes = 0;
            tracing::info!("circuit breaker half-open, probing");
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.successes = 0;
        self.failures = 0;
        self.window_start = None;
        self.trips += 1;
    }
}

pub struct CircuitBreaker<C: Clock> {
    clock: C,
    inner: Mutex<Inner>,
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn new(clock: C, config: BreakerConfig) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner {
                config,
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                window_start: None,
                opened_at: None,
                trips: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick(self.clock.now());
        inner.state
    }

    /// Whether a call may go to the guarded dependency
    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick(self.clock.now());
        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
                inner.window_start = None;
            }
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= inner.config.recovery_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                    tracing::info!("circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick(now);
        match inner.state {
            CircuitState::Closed => {
                let window = inner.config.failure_window;
                let stale = inner
                    .window_start
                    .map_or(true, |start| now.duration_since(start) > window);
                if stale {
                    inner.window_start = Some(now);
                    inner.failures = 0;
                }
                inner.failures += 1;
                if inner.failures >= inner.config.failure_threshold {
                    let failures = inner.failures;
                    inner.open(now);
                    tracing::warn!(failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                inner.open(now);
                tracing::warn!("circuit breaker probe failed, reopened");
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker closed and clear counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.window_start = None;
        inner.opened_at = None;
    }

    /// Replace thresholds; the current state is kept
    pub fn configure(&self, config: BreakerConfig) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.config = config;
    }

    pub fn config(&self) -> BreakerConfig {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.config.clone()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick(self.clock.now());
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.failures,
            consecutive_successes: inner.successes,
            trips: inner.trips,
        }
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
