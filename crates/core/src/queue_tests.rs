// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::{LockRequest, ResourceIdentifier};
use proptest::prelude::*;
use yare::parameterized;

fn at_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

fn entry(id: &str, priority: Priority, enqueued_ms: i64) -> QueueEntry {
    let at = at_millis(enqueued_ms);
    let request = LockRequest::new(id, ResourceIdentifier::project("owner/repo", ".", "default"), id, at)
        .with_priority(priority);
    QueueEntry::new(request, format!("lock-{}", id), at)
}

fn ids(queue: &ResourceQueue) -> Vec<String> {
    queue.entries().iter().map(|e| e.request.id.clone()).collect()
}

#[test]
fn push_orders_by_priority_then_age() {
    let mut queue = ResourceQueue::new();
    queue.push(entry("low", Priority::Low, 1_000), 10).unwrap();
    queue.push(entry("normal", Priority::Normal, 2_000), 10).unwrap();
    let pos = queue.push(entry("critical", Priority::Critical, 3_000), 10).unwrap();
    queue.push(entry("normal-2", Priority::Normal, 4_000), 10).unwrap();

    assert_eq!(pos, 1);
    assert_eq!(ids(&queue), vec!["critical", "normal", "normal-2", "low"]);
    assert_eq!(queue.position("low"), Some(4));
}

#[test]
fn equal_rank_keeps_insertion_order() {
    let mut queue = ResourceQueue::new();
    queue.push(entry("a", Priority::Normal, 1_000), 10).unwrap();
    queue.push(entry("b", Priority::Normal, 1_000), 10).unwrap();
    assert_eq!(queue.pop().unwrap().request.id, "a");
    assert_eq!(queue.pop().unwrap().request.id, "b");
    assert!(queue.pop().is_none());
}

#[test]
fn from_entries_sorts_by_rank() {
    let queue = ResourceQueue::from_entries(vec![
        entry("low", Priority::Low, 1_000),
        entry("high", Priority::High, 5_000),
        entry("normal", Priority::Normal, 2_000),
    ]);
    assert_eq!(ids(&queue), vec!["high", "normal", "low"]);
}

#[test]
fn push_beyond_max_size_is_queue_full() {
    let mut queue = ResourceQueue::new();
    queue.push(entry("a", Priority::Normal, 1), 2).unwrap();
    queue.push(entry("b", Priority::Normal, 2), 2).unwrap();
    let err = queue.push(entry("c", Priority::Critical, 3), 2).unwrap_err();
    assert!(matches!(err, LockError::QueueFull { max: 2, .. }));
    assert_eq!(queue.len(), 2);
}

#[test]
fn pushing_same_request_twice_keeps_position() {
    let mut queue = ResourceQueue::new();
    queue.push(entry("a", Priority::Normal, 1), 10).unwrap();
    queue.push(entry("b", Priority::Normal, 2), 10).unwrap();
    assert_eq!(queue.push(entry("a", Priority::Normal, 9), 10).unwrap(), 1);
    assert_eq!(queue.len(), 2);
}

#[test]
fn remove_and_peek() {
    let mut queue = ResourceQueue::new();
    queue.push(entry("a", Priority::Normal, 1), 10).unwrap();
    queue.push(entry("b", Priority::High, 2), 10).unwrap();
    assert_eq!(queue.peek().unwrap().request.id, "b");
    assert!(queue.remove("b").is_some());
    assert!(queue.remove("b").is_none());
    assert_eq!(queue.peek().unwrap().request.id, "a");
    assert_eq!(queue.find_lock("lock-a").unwrap().request.id, "a");
}

#[parameterized(
    fresh = { 0, 0 },
    just_under = { 299, 0 },
    one_threshold = { 300, 1 },
    two_thresholds = { 650, 2 },
    capped = { 3_600, 3 },
)]
fn boost_levels(waited_secs: u64, expected: u8) {
    let policy = StarvationPolicy::default();
    assert_eq!(policy.boost_for(Duration::from_secs(waited_secs)), expected);
}

#[test]
fn starving_low_entry_overtakes_newer_high() {
    let mut queue = ResourceQueue::new();
    queue.push(entry("old-low", Priority::Low, 0), 10).unwrap();
    queue.push(entry("new-high", Priority::High, 1_199_000), 10).unwrap();
    assert_eq!(ids(&queue), vec!["new-high", "old-low"]);

    let policy = StarvationPolicy {
        threshold: Duration::from_secs(300),
        max_boost: 3,
    };
    // old-low waited 20 minutes, new-high one second
    let now = at_millis(1_200_000);
    assert_eq!(queue.boost_starving(&policy, now), 1);
    assert_eq!(queue.peek().unwrap().effective_priority(), Priority::Critical);
    assert_eq!(ids(&queue), vec!["old-low", "new-high"]);

    assert_eq!(queue.boost_starving(&policy, now), 0);
}

#[test]
fn expire_drops_aged_entries() {
    let mut queue = ResourceQueue::new();
    queue.push(entry("old", Priority::Normal, 0), 10).unwrap();
    queue.push(entry("new", Priority::Normal, 3_000_000), 10).unwrap();

    let expired = queue.expire_older_than(Duration::from_secs(3_600), at_millis(3_700_000));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].request.id, "old");
    assert_eq!(ids(&queue), vec!["new"]);
}

#[test]
fn status_counts_by_effective_priority() {
    let mut queue = ResourceQueue::new();
    queue.push(entry("a", Priority::Normal, 10), 10).unwrap();
    queue.push(entry("b", Priority::Normal, 20), 10).unwrap();
    queue.push(entry("c", Priority::Critical, 30), 10).unwrap();

    let status = queue.status();
    assert_eq!(status.size, 3);
    assert_eq!(status.by_priority.get(&Priority::Normal), Some(&2));
    assert_eq!(status.by_priority.get(&Priority::Critical), Some(&1));
    assert_eq!(status.oldest, Some(at_millis(10)));
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

proptest! {
    #[test]
    fn pop_order_is_non_decreasing_rank(
        items in proptest::collection::vec((arb_priority(), 0i64..1_000_000), 0..30)
    ) {
        let mut queue = ResourceQueue::new();
        for (i, (priority, at)) in items.iter().enumerate() {
            queue.push(entry(&format!("r{}", i), *priority, *at), 100).unwrap();
        }

        let mut last = i64::MIN;
        let mut popped = 0;
        while let Some(e) = queue.pop() {
            prop_assert!(e.rank() >= last);
            last = e.rank();
            popped += 1;
        }
        prop_assert_eq!(popped, items.len());
    }

    #[test]
    fn higher_effective_priority_always_first(
        items in proptest::collection::vec((arb_priority(), 0i64..1_000_000), 1..30)
    ) {
        let mut queue = ResourceQueue::new();
        for (i, (priority, at)) in items.iter().enumerate() {
            queue.push(entry(&format!("r{}", i), *priority, *at), 100).unwrap();
        }
        let max = items.iter().map(|(p, _)| *p).max().unwrap();
        prop_assert_eq!(queue.peek().unwrap().effective_priority(), max);
    }
}
