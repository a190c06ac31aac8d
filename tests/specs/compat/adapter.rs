//! Compatibility adapter specs: fallback, merged reads, diagnostics

use crate::prelude::*;
use std::sync::Arc;
use warden_engine::CompatibilityChecker;

struct Hybrid {
    backend: FakeBackend,
    legacy: Arc<LegacyLockStore>,
    adapter: Arc<CompatibilityAdapter>,
}

fn hybrid() -> Hybrid {
    let mut config = locking();
    config.compatibility_mode = CompatibilityMode::Hybrid;
    let backend = FakeBackend::new();
    let manager = LockManager::new(Arc::new(backend.clone()), config.clone());
    let legacy = Arc::new(LegacyLockStore::in_memory());
    let adapter = CompatibilityAdapter::new(
        manager,
        legacy.clone(),
        AdapterConfig::from_locking(&config),
    )
    .unwrap();
    Hybrid {
        backend,
        legacy,
        adapter: Arc::new(adapter),
    }
}

#[tokio::test]
async fn hybrid_try_lock_survives_enhanced_outage() {
    let h = hybrid();
    h.backend.fail_all("connection refused");

    let (acquired, lock) = h
        .adapter
        .try_lock(project_lock("default", "alice", 7))
        .await
        .unwrap();
    assert!(acquired);
    assert_eq!(lock.user.username, "alice");
    assert_eq!(h.adapter.stats().fallback_ops, 1);
    assert_eq!(h.legacy.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unlock_by_pull_merges_both_backends() {
    let h = hybrid();
    h.adapter
        .try_lock(project_lock("default", "alice", 7))
        .await
        .unwrap();
    h.legacy
        .try_lock(project_lock("staging", "alice", 7))
        .await
        .unwrap();
    // Present on both sides; reported once
    h.legacy
        .try_lock(project_lock("default", "alice", 7))
        .await
        .unwrap();

    let removed = h.adapter.unlock_by_pull("owner/repo", 7).await.unwrap();
    let mut workspaces: Vec<_> = removed.iter().map(|l| l.workspace.clone()).collect();
    workspaces.sort();
    assert_eq!(workspaces, vec!["default", "staging"]);
    assert!(h.adapter.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn checker_reports_each_sub_test() {
    let h = hybrid();
    let report = CompatibilityChecker::new(h.adapter.clone()).run().await;
    assert!(report.success, "{:?}", report);
    assert_eq!(report.tests.len(), 4);

    h.backend.fail_all("connection refused");
    let report = CompatibilityChecker::new(h.adapter.clone()).run().await;
    assert!(report.success, "fallback should keep legacy callers working: {:?}", report);
}
