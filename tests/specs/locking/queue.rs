//! Priority queue specs

use crate::prelude::*;

#[tokio::test]
async fn lowest_priority_waiter_eventually_acquires() {
    let manager = engine(locking());
    manager
        .lock(&project(), "default", &user("alice"))
        .await
        .unwrap();

    let low = spawn_lock(&manager, "default", "bob", Priority::Low);
    wait_for_queue(&manager, "default", 1).await;
    let high = spawn_lock(&manager, "default", "carol", Priority::High);
    wait_for_queue(&manager, "default", 2).await;
    let critical = spawn_lock(&manager, "default", "dave", Priority::Critical);
    wait_for_queue(&manager, "default", 3).await;

    manager
        .unlock(&project(), "default", &user("alice"))
        .await
        .unwrap();
    assert_eq!(critical.await.unwrap().unwrap().owner, "dave");

    manager
        .unlock(&project(), "default", &user("dave"))
        .await
        .unwrap();
    assert_eq!(high.await.unwrap().unwrap().owner, "carol");

    manager
        .unlock(&project(), "default", &user("carol"))
        .await
        .unwrap();
    let lock = low.await.unwrap().unwrap();
    assert_eq!(lock.owner, "bob");
    assert!(lock.is_held());
}

#[tokio::test]
async fn queue_position_is_reported_to_waiters() {
    let manager = engine(locking());
    manager
        .lock(&project(), "default", &user("alice"))
        .await
        .unwrap();
    let waiter = spawn_lock(&manager, "default", "bob", Priority::Normal);
    wait_for_queue(&manager, "default", 1).await;

    let status = manager
        .backend()
        .get_queue_status(&project().resource("default"))
        .await
        .unwrap();
    let request_id = status.entries[0].request.id.clone();
    assert_eq!(
        manager
            .get_queue_position(&project(), "default", &request_id)
            .await
            .unwrap(),
        Some(1)
    );

    manager
        .unlock(&project(), "default", &user("alice"))
        .await
        .unwrap();
    assert_eq!(waiter.await.unwrap().unwrap().owner, "bob");
}
