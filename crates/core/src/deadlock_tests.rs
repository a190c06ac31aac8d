// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use proptest::prelude::*;

fn detector(policy: ResolutionPolicy) -> DeadlockDetector<FakeClock> {
    DeadlockDetector::new(FakeClock::new(), policy, 10)
}

fn waiting(id: &str, owner: &str, resource: &str, priority: Priority, since_ms: i64) -> PendingRequest {
    PendingRequest {
        request_id: id.to_string(),
        owner: owner.to_string(),
        resource: resource.to_string(),
        priority,
        since: DateTime::from_timestamp_millis(since_ms).unwrap(),
    }
}

#[test]
fn crossed_waits_are_refused() {
    let d = detector(ResolutionPolicy::default());
    d.set_holder("A", "u1");
    d.set_holder("B", "u2");
    d.add_waiting(waiting("r1", "u1", "B", Priority::Normal, 0));

    let err = d
        .prevent_deadlock(&waiting("r2", "u2", "A", Priority::Normal, 1))
        .unwrap_err();
    match err {
        LockError::Deadlock { request_id, cycle } => {
            assert_eq!(request_id, "r2");
            assert_eq!(cycle, vec!["u2".to_string(), "u1".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(d.metrics().prevented, 1);
}

#[test]
fn waiting_on_own_lock_is_a_cycle() {
    let d = detector(ResolutionPolicy::default());
    d.set_holder("A", "u1");
    assert_eq!(d.would_deadlock("u1", "A"), Some(vec!["u1".to_string()]));
}

#[test]
fn waiting_on_free_or_unrelated_resource_is_fine() {
    let d = detector(ResolutionPolicy::default());
    d.set_holder("A", "u1");
    d.add_waiting(waiting("r1", "u2", "A", Priority::Normal, 0));
    assert!(d.prevent_deadlock(&waiting("r2", "u3", "A", Priority::Normal, 0)).is_ok());
    assert!(d.prevent_deadlock(&waiting("r3", "u1", "C", Priority::Normal, 0)).is_ok());
}

#[test]
fn three_way_cycle_is_detected_once() {
    let d = detector(ResolutionPolicy::default());
    d.set_holder("A", "u1");
    d.set_holder("B", "u2");
    d.set_holder("C", "u3");
    d.add_waiting(waiting("r1", "u1", "B", Priority::Normal, 0));
    d.add_waiting(waiting("r2", "u2", "C", Priority::Normal, 0));
    d.add_waiting(waiting("r3", "u3", "A", Priority::Normal, 0));

    let records = d.detect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cycle.len(), 3);
    assert_eq!(records[0].requests, vec!["r1", "r2", "r3"]);
    assert_eq!(d.metrics().detected, 1);
}

#[test]
fn lowest_priority_victim_prefers_youngest_on_ties() {
    let d = detector(ResolutionPolicy::LowestPriority);
    d.set_holder("A", "u1");
    d.set_holder("B", "u2");
    d.set_holder("C", "u3");
    d.add_waiting(waiting("r1", "u1", "B", Priority::High, 0));
    d.add_waiting(waiting("r2", "u2", "C", Priority::Low, 10));
    d.add_waiting(waiting("r3", "u3", "A", Priority::Low, 20));

    let record = d.detect().remove(0);
    let victim = d.choose_victim(&record).unwrap();
    assert_eq!(victim.request_id, "r3");

    d.mark_resolved(&record.id, &victim.request_id);
    let history = d.history();
    assert!(history[0].resolved);
    assert_eq!(history[0].victim.as_deref(), Some("r3"));
    assert!(d.detect().is_empty());
    assert_eq!(d.metrics().resolved, 1);
}

#[test]
fn oldest_and_youngest_policies() {
    for (policy, expected) in [
        (ResolutionPolicy::Oldest, "r1"),
        (ResolutionPolicy::Youngest, "r2"),
    ] {
        let d = detector(policy);
        d.set_holder("A", "u1");
        d.set_holder("B", "u2");
        d.add_waiting(waiting("r1", "u1", "B", Priority::Normal, 0));
        d.add_waiting(waiting("r2", "u2", "A", Priority::Normal, 50));
        let record = d.detect().remove(0);
        assert_eq!(d.choose_victim(&record).unwrap().request_id, expected);
    }
}

#[test]
fn history_is_bounded() {
    let d = DeadlockDetector::new(FakeClock::new(), ResolutionPolicy::default(), 2);
    d.set_holder("A", "u1");
    d.add_waiting(waiting("r1", "u1", "A", Priority::Normal, 0));
    for _ in 0..5 {
        d.detect();
    }
    assert_eq!(d.history().len(), 2);
    assert_eq!(d.metrics().detected, 5);
}

proptest! {
    /// Owners only wait on resources held by higher-numbered owners, so the
    /// graph is acyclic.
    #[test]
    fn acyclic_graph_never_reports_deadlock(
        waits in proptest::collection::vec((0usize..8, 0usize..8), 0..30)
    ) {
        let d = detector(ResolutionPolicy::default());
        for i in 0..8 {
            d.set_holder(&format!("res-{}", i), &format!("owner-{}", i));
        }
        for (n, (a, b)) in waits.iter().enumerate() {
            let (waiter, holder) = if a < b { (a, b) } else if b < a { (b, a) } else { continue };
            d.add_waiting(waiting(
                &format!("r{}", n),
                &format!("owner-{}", waiter),
                &format!("res-{}", holder),
                Priority::Normal,
                0,
            ));
        }
        prop_assert!(d.detect().is_empty());
        // a new wait that respects the ordering never closes a cycle
        for i in 0..8 {
            for j in (i + 1)..8 {
                let owner = format!("owner-{}", i);
                let resource = format!("res-{}", j);
                prop_assert!(d.would_deadlock(&owner, &resource).is_none());
            }
        }
    }
}
