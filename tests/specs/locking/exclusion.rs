//! Mutual exclusion, unlock and handoff specs

use crate::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn without_queue() -> LockingConfig {
    let mut config = locking();
    config.queue.enabled = false;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_holder_per_resource() {
    let manager = engine(without_queue());
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        let holders = Arc::clone(&holders);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            let me = user(&format!("user{}", i));
            loop {
                match manager.lock(&project(), "default", &me).await {
                    Ok(_) => break,
                    Err(LockError::LockExists { .. }) => {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    Err(e) => panic!("unexpected error: {:?}", e),
                }
            }
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
            manager.unlock(&project(), "default", &me).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unlock_without_holder_is_a_noop_everywhere() {
    let manager = engine(locking());
    assert_eq!(
        manager.unlock(&project(), "default", &user("alice")).await.unwrap(),
        None
    );

    let legacy = LegacyLockStore::in_memory();
    assert_eq!(legacy.unlock(&project(), "default").await.unwrap(), None);

    let adapter = CompatibilityAdapter::new(
        manager,
        Arc::new(legacy),
        AdapterConfig::from_locking(&locking()),
    )
    .unwrap();
    assert_eq!(adapter.unlock(&project(), "default").await.unwrap(), None);
}

#[tokio::test]
async fn holder_handoff() {
    let manager = engine(without_queue());
    let alice = LockOptions::new(project(), "default", user("alice"))
        .with_pull(PullRequest::new(42, "alice"));
    manager.lock_with_options(alice).await.unwrap();

    let err = manager
        .lock(&project(), "default", &user("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::LockExists { .. }), "{:?}", err);
    assert!(err.to_string().contains("pull #42"), "{}", err);

    manager
        .unlock(&project(), "default", &user("alice"))
        .await
        .unwrap();
    let lock = manager
        .lock(&project(), "default", &user("bob"))
        .await
        .unwrap();
    assert_eq!(lock.owner, "bob");
}

#[tokio::test]
async fn release_promotes_exactly_one_waiter() {
    let manager = engine(locking());
    manager
        .lock(&project(), "default", &user("alice"))
        .await
        .unwrap();

    let waiters: Vec<_> = ["bob", "carol", "dave"]
        .iter()
        .map(|name| spawn_lock(&manager, "default", name, Priority::Normal))
        .collect();
    wait_for_queue(&manager, "default", 3).await;

    manager
        .unlock(&project(), "default", &user("alice"))
        .await
        .unwrap();

    // Wait for the promoted waiter, then check nobody else got in
    let mut promoted = None;
    for _ in 0..400 {
        if let Some(i) = waiters.iter().position(|w| w.is_finished()) {
            promoted = Some(i);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let promoted = promoted.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(waiters.iter().filter(|w| w.is_finished()).count(), 1);

    let held = manager.list().await.unwrap();
    assert_eq!(held.len(), 1);
    let status = manager
        .backend()
        .get_queue_status(&project().resource("default"))
        .await
        .unwrap();
    assert_eq!(status.size, 2);

    for (i, waiter) in waiters.into_iter().enumerate() {
        if i == promoted {
            assert_eq!(waiter.await.unwrap().unwrap().owner, held[0].owner);
        } else {
            waiter.abort();
        }
    }
    manager.shutdown().await;
}
