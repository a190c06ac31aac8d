// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::AtomicUsize;

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn bump(count: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
    let count = Arc::clone(count);
    async move {
        count.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn fires_after_delay_and_disarms() {
    let timers = LockTimers::new();
    let fired = counter();
    timers.arm("lock-1", Duration::from_secs(5), bump(&fired));
    assert!(timers.is_armed("lock-1"));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!timers.is_armed("lock-1"));
    assert!(timers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_prevents_firing() {
    let timers = LockTimers::new();
    let fired = counter();
    timers.arm("lock-1", Duration::from_secs(5), bump(&fired));

    assert!(timers.cancel("lock-1"));
    assert!(!timers.cancel("lock-1"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn rearming_replaces_previous_timer() {
    let timers = LockTimers::new();
    let first = counter();
    let second = counter();
    timers.arm("lock-1", Duration::from_secs(5), bump(&first));
    timers.arm("lock-1", Duration::from_secs(20), bump(&second));
    assert_eq!(timers.len(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert!(timers.is_armed("lock-1"));

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_aborts_everything() {
    let timers = LockTimers::new();
    let fired = counter();
    timers.arm("a", Duration::from_secs(1), bump(&fired));
    timers.arm("b", Duration::from_secs(2), bump(&fired));

    assert_eq!(timers.cancel_all(), 2);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn immediate_timer_does_not_stay_armed() {
    let timers = LockTimers::new();
    for i in 0..50 {
        let id = format!("lock-{}", i);
        let fired = counter();
        timers.arm(&id, Duration::ZERO, bump(&fired));
        for _ in 0..200 {
            if fired.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(&id), "{} still armed after firing", id);
    }
    assert!(timers.is_empty());
}
