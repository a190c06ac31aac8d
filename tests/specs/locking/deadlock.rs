//! Deadlock rejection specs

use crate::prelude::*;

#[tokio::test]
async fn second_crossing_request_is_rejected() {
    let manager = engine(locking());
    manager.lock(&project(), "a", &user("alice")).await.unwrap();
    manager.lock(&project(), "b", &user("bob")).await.unwrap();

    let alice_wants_b = spawn_lock(&manager, "b", "alice", Priority::Normal);
    wait_for_queue(&manager, "b", 1).await;

    let err = manager
        .lock(&project(), "a", &user("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Deadlock { .. }), "{:?}", err);

    // The first waiter is unaffected
    manager.unlock(&project(), "b", &user("bob")).await.unwrap();
    assert_eq!(alice_wants_b.await.unwrap().unwrap().owner, "alice");
    assert_eq!(manager.get_stats().await.requests.deadlocks_prevented, 1);
}
