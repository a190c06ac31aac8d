// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::DateTime;
use warden_core::{PullRequest, User};

fn project() -> Project {
    Project::new("owner/repo", ".")
}

fn lock(workspace: &str, user: &str, pull: u64) -> ProjectLock {
    ProjectLock::new(
        project(),
        workspace,
        User::new(user),
        PullRequest::new(pull, user),
        DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    )
}

#[tokio::test]
async fn try_lock_reports_current_holder() {
    let store = LegacyLockStore::in_memory();

    let (acquired, _) = store.try_lock(lock("default", "alice", 1)).await.unwrap();
    assert!(acquired);

    let (acquired, current) = store.try_lock(lock("default", "bob", 2)).await.unwrap();
    assert!(!acquired);
    assert_eq!(current.user.username, "alice");
    assert_eq!(current.pull.num, 1);
}

#[tokio::test]
async fn unlock_is_idempotent() {
    let store = LegacyLockStore::in_memory();
    store.try_lock(lock("default", "alice", 1)).await.unwrap();

    let removed = store.unlock(&project(), "default").await.unwrap();
    assert_eq!(removed.map(|l| l.user.username), Some("alice".to_string()));
    assert_eq!(store.unlock(&project(), "default").await.unwrap(), None);
    assert_eq!(store.get_lock(&project(), "default").await.unwrap(), None);
}

#[tokio::test]
async fn unlock_by_pull_removes_only_matching_locks() {
    let store = LegacyLockStore::in_memory();
    store.try_lock(lock("default", "alice", 1)).await.unwrap();
    store.try_lock(lock("staging", "alice", 1)).await.unwrap();
    store.try_lock(lock("prod", "bob", 2)).await.unwrap();

    let removed = store.unlock_by_pull("owner/repo", 1).await.unwrap();
    assert_eq!(removed.len(), 2);

    let remaining = store.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].workspace, "prod");
}

#[tokio::test]
async fn durable_store_recovers_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("legacy.wal");

    {
        let store = LegacyLockStore::open(&path).unwrap();
        store.try_lock(lock("default", "alice", 1)).await.unwrap();
        store.try_lock(lock("staging", "bob", 2)).await.unwrap();
        store.unlock(&project(), "default").await.unwrap();
    }

    let store = LegacyLockStore::open(&path).unwrap();
    let locks = store.list().await.unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].user.username, "bob");

    // New writes continue the same log
    store.try_lock(lock("default", "carol", 3)).await.unwrap();
    assert_eq!(Wal::replay(&path).unwrap().len(), 4);
}
