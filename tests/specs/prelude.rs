//! Shared helpers for the behavioral specs

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub use warden_adapters::{FakeBackend, MemoryBackend};
pub use warden_core::{
    CompatibilityMode, EngineConfig, EnhancedLock, LegacyBackend, LockError, LockingConfig,
    Priority, Project, ProjectLock, PullRequest, User,
};
pub use warden_engine::{AdapterConfig, CompatibilityAdapter, LockManager, LockOptions};
pub use warden_storage::LegacyLockStore;

pub fn project() -> Project {
    Project::new("owner/repo", ".")
}

pub fn user(name: &str) -> User {
    User::new(name)
}

pub fn project_lock(workspace: &str, name: &str, pull: u64) -> ProjectLock {
    ProjectLock::new(
        project(),
        workspace,
        user(name),
        PullRequest::new(pull, name),
        chrono::Utc::now(),
    )
}

pub fn locking() -> LockingConfig {
    EngineConfig::for_testing().locking
}

/// Manager over the in-process backend
pub fn engine(config: LockingConfig) -> LockManager {
    let backend = MemoryBackend::new()
        .with_max_queue_size(config.queue.max_size)
        .with_max_ttl(config.max_timeout);
    LockManager::new(Arc::new(backend), config)
}

pub async fn wait_for_queue(manager: &LockManager, workspace: &str, size: usize) {
    let resource = project().resource(workspace);
    for _ in 0..400 {
        let status = manager.backend().get_queue_status(&resource).await.unwrap();
        if status.size >= size {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue for {} never reached {}", workspace, size);
}

pub fn spawn_lock(
    manager: &LockManager,
    workspace: &str,
    name: &str,
    priority: Priority,
) -> JoinHandle<Result<EnhancedLock, LockError>> {
    let manager = manager.clone();
    let workspace = workspace.to_string();
    let name = name.to_string();
    tokio::spawn(async move {
        manager
            .lock_with_priority(&project(), &workspace, &user(&name), priority)
            .await
    })
}

// =============================================================================
// Daemon harness
// =============================================================================

/// A scratch state directory with an optional config file
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn empty() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("warden.toml")
    }

    pub fn with_config(content: &str) -> Self {
        let ws = Self::empty();
        std::fs::write(ws.config_path(), content).unwrap();
        ws
    }

    pub fn wardend(&self) -> Wardend {
        let mut cmd = Command::cargo_bin("wardend").unwrap();
        cmd.env("WARDEN_STATE_DIR", self.dir.path())
            .env_remove("WARDEN_CONFIG")
            .env_remove("RUST_LOG")
            .timeout(Duration::from_secs(30));
        Wardend { cmd }
    }
}

pub struct Wardend {
    cmd: Command,
}

impl Wardend {
    pub fn args(mut self, args: &[&str]) -> Self {
        self.cmd.args(args);
        self
    }

    pub fn arg_path(mut self, path: &std::path::Path) -> Self {
        self.cmd.arg(path);
        self
    }

    pub fn passes(mut self) -> Run {
        let output = self.cmd.output().unwrap();
        let run = Run { output };
        assert!(run.output.status.success(), "expected success\n{}", run.describe());
        run
    }

    pub fn fails(mut self) -> Run {
        let output = self.cmd.output().unwrap();
        let run = Run { output };
        assert!(!run.output.status.success(), "expected failure\n{}", run.describe());
        run
    }
}

pub struct Run {
    output: std::process::Output,
}

impl Run {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).to_string()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).to_string()
    }

    fn describe(&self) -> String {
        format!("stdout:\n{}\nstderr:\n{}", self.stdout(), self.stderr())
    }

    pub fn code(self, expected: i32) -> Self {
        assert_eq!(self.output.status.code(), Some(expected), "{}", self.describe());
        self
    }

    pub fn stdout_eq(self, expected: &str) -> Self {
        similar_asserts::assert_eq!(self.stdout(), expected);
        self
    }

    pub fn stdout_has(self, needle: &str) -> Self {
        assert!(self.stdout().contains(needle), "missing {:?}\n{}", needle, self.describe());
        self
    }

    pub fn stderr_has(self, needle: &str) -> Self {
        assert!(self.stderr().contains(needle), "missing {:?}\n{}", needle, self.describe());
        self
    }
}
