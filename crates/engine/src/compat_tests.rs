// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use async_trait::async_trait;
use warden_adapters::FakeBackend;
use warden_core::{CompatibilityMode, EngineConfig};
use warden_storage::LegacyLockStore;

use crate::{AdapterConfig, CompatibilityAdapter, LockManager};

fn names(report: &CompatibilityReport) -> Vec<&str> {
    report.failed().map(|t| t.name.as_str()).collect()
}

/// Every call fails as if the store were unreachable
struct Unreachable;

#[async_trait]
impl LegacyBackend for Unreachable {
    async fn try_lock(&self, _lock: ProjectLock) -> Result<(bool, ProjectLock), LockError> {
        Err(LockError::backend("connection refused"))
    }

    async fn unlock(&self, _: &Project, _: &str) -> Result<Option<ProjectLock>, LockError> {
        Err(LockError::backend("connection refused"))
    }

    async fn list(&self) -> Result<Vec<ProjectLock>, LockError> {
        Err(LockError::backend("connection refused"))
    }

    async fn unlock_by_pull(&self, _: &str, _: u64) -> Result<Vec<ProjectLock>, LockError> {
        Err(LockError::backend("connection refused"))
    }

    async fn get_lock(&self, _: &Project, _: &str) -> Result<Option<ProjectLock>, LockError> {
        Err(LockError::backend("connection refused"))
    }
}

/// A store whose pull-request cleanup silently does nothing
struct IgnoresPullCleanup(LegacyLockStore);

#[async_trait]
impl LegacyBackend for IgnoresPullCleanup {
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock), LockError> {
        self.0.try_lock(lock).await
    }

    async fn unlock(&self, p: &Project, ws: &str) -> Result<Option<ProjectLock>, LockError> {
        self.0.unlock(p, ws).await
    }

    async fn list(&self) -> Result<Vec<ProjectLock>, LockError> {
        self.0.list().await
    }

    async fn unlock_by_pull(&self, _: &str, _: u64) -> Result<Vec<ProjectLock>, LockError> {
        Ok(Vec::new())
    }

    async fn get_lock(&self, p: &Project, ws: &str) -> Result<Option<ProjectLock>, LockError> {
        self.0.get_lock(p, ws).await
    }
}

#[tokio::test]
async fn legacy_store_passes_every_check() {
    let checker = CompatibilityChecker::new(Arc::new(LegacyLockStore::in_memory()));
    let report = checker.run().await;

    assert!(report.success, "{:?}", report);
    let ran: Vec<_> = report.tests.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        ran,
        vec!["BasicLockUnlock", "ConcurrentAccess", "UnlockByPull", "ListConsistency"]
    );
    assert!(report.finished_at >= report.started_at);
}

#[tokio::test]
async fn hybrid_adapter_passes_every_check() {
    let mut config = EngineConfig::for_testing().locking;
    config.compatibility_mode = CompatibilityMode::Hybrid;
    let backend = FakeBackend::new();
    let manager =
        LockManager::with_clock(Arc::new(backend.clone()), config.clone(), backend.clock().clone());
    let adapter = CompatibilityAdapter::new(
        manager,
        Arc::new(LegacyLockStore::in_memory()),
        AdapterConfig::from_locking(&config),
    )
    .unwrap();
    let adapter = Arc::new(adapter);

    let report = CompatibilityChecker::new(adapter.clone()).run().await;
    assert!(report.success, "{:?}", report);
    assert!(adapter.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn existing_locks_are_left_alone() {
    let store = Arc::new(LegacyLockStore::in_memory());
    store
        .try_lock(ProjectLock::new(
            Project::new("owner/repo", "."),
            "default",
            User::new("alice"),
            PullRequest::new(CHECK_PULL, "alice"),
            Utc::now(),
        ))
        .await
        .unwrap();

    let report = CompatibilityChecker::new(store.clone()).run().await;
    assert!(report.success, "{:?}", report);

    let remaining = store.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user.username, "alice");
}

#[tokio::test]
async fn unreachable_backend_fails_each_check_with_cause() {
    let report = CompatibilityChecker::new(Arc::new(Unreachable)).run().await;

    assert!(!report.success);
    assert_eq!(report.failed().count(), 4);
    for test in &report.tests {
        let error = test.error.as_deref().unwrap_or_default();
        assert!(error.contains("connection refused"), "{}: {}", test.name, error);
    }
}

#[tokio::test]
async fn partial_regression_is_isolated_to_its_check() {
    let store = Arc::new(IgnoresPullCleanup(LegacyLockStore::in_memory()));
    let report = CompatibilityChecker::new(store.clone()).run().await;

    assert!(!report.success);
    assert_eq!(names(&report), vec!["UnlockByPull"]);
    let error = report.tests[2].error.as_deref().unwrap_or_default();
    assert!(error.contains("expected 3 unlocked locks, got 0"), "{}", error);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn backward_compatibility_can_run_alone() {
    let checker = CompatibilityChecker::new(Arc::new(LegacyLockStore::in_memory()));
    checker.verify_backward_compatibility().await.unwrap();

    let err = CompatibilityChecker::new(Arc::new(Unreachable))
        .verify_backward_compatibility()
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::Call { op: "try_lock", .. }));
}
