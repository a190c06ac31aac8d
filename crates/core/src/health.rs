// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Component health scoring and reporting.
//!
//! This module provides:
//! - `ComponentStatus` for each engine component (backend, queue, cluster, ...)
//! - `HealthReport`, whose score is the average of component health
//! - `HealthLevel` for ratio-based classification such as cluster liveness

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of a ratio of live to expected things.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    /// Ratio at or above 0.9
    Healthy,
    /// Ratio between 0.7 and 0.9
    Degraded,
    /// Ratio between 0.5 and 0.7
    Warning,
    /// Ratio below 0.5
    Critical,
}

impl HealthLevel {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.9 {
            HealthLevel::Healthy
        } else if ratio >= 0.7 {
            HealthLevel::Degraded
        } else if ratio >= 0.5 {
            HealthLevel::Warning
        } else {
            HealthLevel::Critical
        }
    }

    pub fn is_concerning(&self) -> bool {
        !matches!(self, HealthLevel::Healthy)
    }
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Degraded => "degraded",
            HealthLevel::Warning => "warning",
            HealthLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Run state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Starting,
    Running,
    Degraded,
    Failed,
    Stopped,
}

/// Health of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub state: ComponentState,
    /// 0 (dead) to 100 (fully healthy)
    pub health: u8,
    pub last_check: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub restarts: u32,
}

impl ComponentStatus {
    pub fn running(name: impl Into<String>, started_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Running,
            health: 100,
            last_check: now,
            error: None,
            started_at,
            restarts: 0,
        }
    }

    /// Mark unhealthy with the given score and reason.
    pub fn degraded(mut self, health: u8, error: impl Into<String>) -> Self {
        self.health = health.min(100);
        self.state = if health == 0 {
            ComponentState::Failed
        } else {
            ComponentState::Degraded
        };
        self.error = Some(error.into());
        self
    }

    pub fn stopped(mut self) -> Self {
        self.state = ComponentState::Stopped;
        self.health = 0;
        self
    }
}

/// Health of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Average of component health
    pub score: u8,
    pub healthy: bool,
    pub components: Vec<ComponentStatus>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(components: Vec<ComponentStatus>, checked_at: DateTime<Utc>) -> Self {
        let score = if components.is_empty() {
            0
        } else {
            let total: u32 = components.iter().map(|c| u32::from(c.health)).sum();
            (total / components.len() as u32) as u8
        };
        let healthy = !components.is_empty()
            && components
                .iter()
                .all(|c| !matches!(c.state, ComponentState::Failed));
        Self {
            score,
            healthy,
            components,
            checked_at,
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentStatus> {
        self.components.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
