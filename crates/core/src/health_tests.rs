// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    all_alive = { 1.0, HealthLevel::Healthy },
    boundary_healthy = { 0.9, HealthLevel::Healthy },
    degraded = { 0.75, HealthLevel::Degraded },
    warning = { 0.5, HealthLevel::Warning },
    critical = { 0.2, HealthLevel::Critical },
)]
fn level_from_ratio(ratio: f64, expected: HealthLevel) {
    assert_eq!(HealthLevel::from_ratio(ratio), expected);
}

#[test]
fn report_score_is_average_of_components() {
    let now = Utc::now();
    let report = HealthReport::new(
        vec![
            ComponentStatus::running("backend", now, now),
            ComponentStatus::running("queue", now, now).degraded(50, "slow"),
        ],
        now,
    );
    assert_eq!(report.score, 75);
    assert!(report.healthy);
    assert_eq!(report.component("queue").unwrap().state, ComponentState::Degraded);
}

#[test]
fn failed_component_makes_report_unhealthy() {
    let now = Utc::now();
    let report = HealthReport::new(
        vec![ComponentStatus::running("backend", now, now).degraded(0, "unreachable")],
        now,
    );
    assert_eq!(report.score, 0);
    assert!(!report.healthy);
}
