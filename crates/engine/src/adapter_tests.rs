// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tracing_subscriber::fmt::MakeWriter;
use warden_adapters::FakeBackend;
use warden_core::{EngineConfig, FakeClock, PullRequest};
use warden_storage::LegacyLockStore;
use yare::parameterized;

struct Setup {
    backend: FakeBackend,
    legacy: Arc<LegacyLockStore>,
    adapter: CompatibilityAdapter<FakeClock>,
}

fn setup(mode: CompatibilityMode) -> Setup {
    let mut config = EngineConfig::for_testing().locking;
    config.compatibility_mode = mode;
    let backend = FakeBackend::new();
    let manager =
        LockManager::with_clock(Arc::new(backend.clone()), config.clone(), backend.clock().clone());
    let legacy = Arc::new(LegacyLockStore::in_memory());
    let adapter =
        CompatibilityAdapter::new(manager, legacy.clone(), AdapterConfig::from_locking(&config))
            .unwrap();
    Setup {
        backend,
        legacy,
        adapter,
    }
}

fn project() -> Project {
    Project::new("owner/repo", ".")
}

fn project_lock(workspace: &str, user: &str, pull: u64) -> ProjectLock {
    ProjectLock::new(
        project(),
        workspace,
        User::new(user),
        PullRequest::new(pull, user),
        Utc::now(),
    )
}

// =============================================================================
// Configuration
// =============================================================================

#[parameterized(
    zero_default = { 0, 60, true, 10, "default timeout" },
    max_below_default = { 60, 30, true, 10, "max timeout" },
    empty_queue = { 30, 60, true, 0, "queue size" },
)]
fn invalid_configs_are_rejected(
    default_secs: u64,
    max_secs: u64,
    queue_enabled: bool,
    queue_max_size: usize,
    needle: &str,
) {
    let config = AdapterConfig {
        mode: CompatibilityMode::Hybrid,
        default_timeout: Duration::from_secs(default_secs),
        max_timeout: Duration::from_secs(max_secs),
        queue_enabled,
        queue_max_size,
        breaker: BreakerConfig::default(),
        fallback_enabled: true,
    };
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains(needle), "{}", err);
}

#[test]
fn disabled_queue_may_have_zero_size() {
    let mut config = AdapterConfig::from_locking(&EngineConfig::default().locking);
    config.queue_enabled = false;
    config.queue_max_size = 0;
    assert!(config.validate().is_ok());
}

#[test]
fn rejection_reason_names_pull_request() {
    let holder = project_lock("default", "alice", 42);
    assert_eq!(
        rejection_reason(&holder),
        "This project is currently locked by an unapplied plan from pull #42 (by alice)"
    );
    let holder = project_lock("default", "alice", 0);
    assert_eq!(
        rejection_reason(&holder),
        "This project is currently locked by alice"
    );
}

// =============================================================================
// Modes
// =============================================================================

#[tokio::test]
async fn strict_mode_uses_legacy_only() {
    let s = setup(CompatibilityMode::Strict);
    let (acquired, _) = s.adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap();
    assert!(acquired);
    assert_eq!(s.legacy.list().await.unwrap().len(), 1);
    assert!(s.adapter.manager().list().await.unwrap().is_empty());

    let stats = s.adapter.stats();
    assert_eq!(stats.legacy_ops, 1);
    assert_eq!(stats.enhanced_ops, 0);
}

#[tokio::test]
async fn strict_mode_refuses_enhanced_operations() {
    let s = setup(CompatibilityMode::Strict);
    let err = s
        .adapter
        .lock_with_priority(&project(), "default", &User::new("alice"), Priority::High)
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::InvalidRequest(_)));
}

#[tokio::test]
async fn native_mode_uses_enhanced_only() {
    let s = setup(CompatibilityMode::Native);
    s.adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap();
    assert_eq!(s.adapter.manager().list().await.unwrap().len(), 1);
    assert!(s.legacy.list().await.unwrap().is_empty());

    s.backend.fail_all("connection refused");
    let err = s.adapter.list().await.unwrap_err();
    assert!(matches!(err, LockError::Backend(_)));
    assert_eq!(s.adapter.stats().fallback_ops, 0);
}

#[tokio::test]
async fn hybrid_try_lock_falls_back_when_enhanced_fails() {
    let s = setup(CompatibilityMode::Hybrid);
    s.backend.fail_all("connection refused");

    let (acquired, lock) = s.adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap();
    assert!(acquired);
    assert_eq!(lock.user.username, "alice");
    assert_eq!(s.legacy.list().await.unwrap().len(), 1);
    assert_eq!(s.adapter.stats().fallback_ops, 1);
}

#[tokio::test]
async fn hybrid_respects_locks_taken_on_legacy() {
    let s = setup(CompatibilityMode::Hybrid);
    s.backend.fail_all("connection refused");
    s.adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap();
    s.backend.recover();

    let (acquired, holder) = s.adapter.try_lock(project_lock("default", "bob", 2)).await.unwrap();
    assert!(!acquired);
    assert_eq!(holder.user.username, "alice");
    assert!(s.adapter.manager().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn hybrid_list_merges_and_deduplicates() {
    let s = setup(CompatibilityMode::Hybrid);
    s.adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap();
    s.legacy.try_lock(project_lock("staging", "bob", 2)).await.unwrap();
    // Same key on both sides: the enhanced record wins
    s.legacy.try_lock(project_lock("default", "carol", 3)).await.unwrap();

    let locks = s.adapter.list().await.unwrap();
    assert_eq!(locks.len(), 2);
    assert_eq!(locks[0].user.username, "alice");
    assert_eq!(locks[1].user.username, "bob");
}

#[tokio::test]
async fn hybrid_unlock_by_pull_merges_both_sides() {
    let s = setup(CompatibilityMode::Hybrid);
    s.adapter.try_lock(project_lock("default", "alice", 7)).await.unwrap();
    s.legacy.try_lock(project_lock("staging", "alice", 7)).await.unwrap();

    let removed = s.adapter.unlock_by_pull("owner/repo", 7).await.unwrap();
    let mut workspaces: Vec<_> = removed.iter().map(|l| l.workspace.as_str()).collect();
    workspaces.sort();
    assert_eq!(workspaces, vec!["default", "staging"]);
    assert!(s.adapter.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn hybrid_unlock_clears_both_sides() {
    let s = setup(CompatibilityMode::Hybrid);
    s.adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap();

    let released = s.adapter.unlock(&project(), "default").await.unwrap();
    assert_eq!(released.map(|l| l.user.username), Some("alice".to_string()));
    assert_eq!(s.adapter.unlock(&project(), "default").await.unwrap(), None);
}

#[tokio::test]
async fn hybrid_get_lock_falls_through_to_legacy() {
    let s = setup(CompatibilityMode::Hybrid);
    s.legacy.try_lock(project_lock("default", "bob", 2)).await.unwrap();

    let lock = s.adapter.get_lock(&project(), "default").await.unwrap().unwrap();
    assert_eq!(lock.user.username, "bob");
}

#[tokio::test]
async fn open_circuit_goes_straight_to_legacy() {
    let s = setup(CompatibilityMode::Hybrid);
    s.backend.fail_all("connection refused");
    for _ in 0..3 {
        s.adapter.list().await.unwrap();
    }
    assert_eq!(s.adapter.stats().circuit_state, CircuitState::Open);

    let enhanced_before = s.adapter.stats().enhanced_ops;
    s.adapter.list().await.unwrap();
    let stats = s.adapter.stats();
    assert_eq!(stats.enhanced_ops, enhanced_before);
    assert_eq!(stats.fallback_ops, 4);
}

#[tokio::test]
async fn hybrid_traffic_is_counted_by_the_fallback_system() {
    let s = setup(CompatibilityMode::Hybrid);
    s.adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap();

    s.backend.fail_all("connection refused");
    s.adapter.try_lock(project_lock("staging", "bob", 2)).await.unwrap();
    s.adapter.get_lock(&project(), "staging").await.unwrap();

    let stats = s.adapter.fallback().stats();
    assert_eq!(stats.enhanced_attempts, 3);
    assert_eq!(stats.enhanced_failures, 2);
    assert_eq!(stats.fallback_attempts, 2);
    assert!(stats.last_fallback.is_some());
    assert_eq!(s.adapter.stats().fallback_ops, stats.fallback_attempts);

    let (ready, reason) = s.adapter.fallback().is_ready_for_migration().await;
    assert!(!ready, "{}", reason);
}

#[tokio::test]
async fn hybrid_without_fallback_surfaces_enhanced_errors() {
    let mut config = EngineConfig::for_testing().locking;
    config.compatibility_mode = CompatibilityMode::Hybrid;
    config.fallback.enabled = false;
    let backend = FakeBackend::new();
    let manager =
        LockManager::with_clock(Arc::new(backend.clone()), config.clone(), backend.clock().clone());
    let legacy = Arc::new(LegacyLockStore::in_memory());
    let adapter =
        CompatibilityAdapter::new(manager, legacy.clone(), AdapterConfig::from_locking(&config))
            .unwrap();

    backend.fail_all("connection refused");
    let err = adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap_err();
    assert!(matches!(err, LockError::Backend(_)), "got {:?}", err);
    assert!(legacy.list().await.unwrap().is_empty());
    assert_eq!(adapter.stats().fallback_ops, 0);
}

#[tokio::test]
async fn mode_can_be_switched_at_runtime() {
    let s = setup(CompatibilityMode::Hybrid);
    s.adapter.set_mode(CompatibilityMode::Strict);
    assert_eq!(s.adapter.mode(), CompatibilityMode::Strict);
    s.adapter.try_lock(project_lock("default", "alice", 1)).await.unwrap();
    assert!(s.adapter.manager().list().await.unwrap().is_empty());
}

// =============================================================================
// Migration
// =============================================================================

#[tokio::test]
async fn migration_copies_legacy_locks() {
    let s = setup(CompatibilityMode::Hybrid);
    s.legacy.try_lock(project_lock("default", "alice", 1)).await.unwrap();
    s.legacy.try_lock(project_lock("staging", "bob", 2)).await.unwrap();
    s.adapter
        .manager()
        .lock(&project(), "staging", &User::new("carol"))
        .await
        .unwrap();

    let state = s.adapter.start_migration().await.unwrap();
    assert_eq!(state.phase, MigrationPhase::Completed);
    assert_eq!(state.legacy_locks, 2);
    assert_eq!(state.migrated, 1);
    assert_eq!(state.failed.len(), 1);
    assert!(state.failed[0].contains("held by carol"), "{:?}", state.failed);

    let err = s.adapter.start_migration().await.unwrap_err();
    assert!(matches!(err, LockError::InvalidRequest(_)));
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn fallback_is_logged_with_operation() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(logs.clone())
        .with_ansi(false)
        .without_time()
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let s = setup(CompatibilityMode::Hybrid);
                s.backend.fail_all("connection refused");
                s.adapter.list().await.unwrap();
            })
    });

    let output = String::from_utf8_lossy(&logs.0.lock().unwrap()).to_string();
    assert!(output.contains("enhanced call failed, falling back to legacy"), "{}", output);
    assert!(output.contains("op=\"list\""), "{}", output);
    assert!(output.contains("connection refused"), "{}", output);
}
