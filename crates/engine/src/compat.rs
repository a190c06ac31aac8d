// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compatibility checker
//!
//! Exercises any `LegacyBackend` with the call sequences legacy callers rely
//! on and reports each sub-test separately, so a partial regression shows
//! up as the one check that failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use warden_core::{LegacyBackend, LockError, Project, ProjectLock, PullRequest, User};

const CHECK_USER: &str = "warden-check";
const CHECK_PULL: u64 = 123;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{op} failed: {source}")]
    Call {
        op: &'static str,
        #[source]
        source: LockError,
    },
    #[error("{0}")]
    Mismatch(String),
}

fn call(op: &'static str) -> impl FnOnce(LockError) -> CheckError {
    move |source| CheckError::Call { op, source }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub tests: Vec<CheckResult>,
}

impl CompatibilityReport {
    pub fn failed(&self) -> impl Iterator<Item = &CheckResult> {
        self.tests.iter().filter(|t| !t.success)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Check {
    BasicLockUnlock,
    ConcurrentAccess,
    UnlockByPull,
    ListConsistency,
}

impl Check {
    const ALL: [Check; 4] = [
        Check::BasicLockUnlock,
        Check::ConcurrentAccess,
        Check::UnlockByPull,
        Check::ListConsistency,
    ];

    fn name(self) -> &'static str {
        match self {
            Check::BasicLockUnlock => "BasicLockUnlock",
            Check::ConcurrentAccess => "ConcurrentAccess",
            Check::UnlockByPull => "UnlockByPull",
            Check::ListConsistency => "ListConsistency",
        }
    }
}

pub struct CompatibilityChecker {
    backend: Arc<dyn LegacyBackend>,
}

impl CompatibilityChecker {
    pub fn new(backend: Arc<dyn LegacyBackend>) -> Self {
        Self { backend }
    }

    /// Run every sub-test in order
    pub async fn run(&self) -> CompatibilityReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut tests = Vec::with_capacity(Check::ALL.len());

        for check in Check::ALL {
            let began = Instant::now();
            let result = self.run_check(check).await;
            let duration = began.elapsed();
            match &result {
                Ok(()) => tracing::info!(
                    check = check.name(),
                    elapsed_ms = duration.as_millis() as u64,
                    "compatibility check passed"
                ),
                Err(e) => tracing::warn!(
                    check = check.name(),
                    error = %e,
                    elapsed_ms = duration.as_millis() as u64,
                    "compatibility check failed"
                ),
            }
            tests.push(CheckResult {
                name: check.name().to_string(),
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
                duration,
            });
        }

        CompatibilityReport {
            success: tests.iter().all(|t| t.success),
            started_at,
            finished_at: Utc::now(),
            duration: start.elapsed(),
            tests,
        }
    }

    async fn run_check(&self, check: Check) -> Result<(), CheckError> {
        match check {
            Check::BasicLockUnlock => self.verify_backward_compatibility().await,
            Check::ConcurrentAccess => self.concurrent_access().await,
            Check::UnlockByPull => self.unlock_by_pull().await,
            Check::ListConsistency => self.list_consistency().await,
        }
    }

    /// Lock, find in list, read back, unlock, confirm gone
    pub async fn verify_backward_compatibility(&self) -> Result<(), CheckError> {
        let project = Project::new("test/compatibility-check", ".");
        let result = self.basic_cycle(&project).await;
        self.cleanup(&project, &["default"]).await;
        result
    }

    async fn basic_cycle(&self, project: &Project) -> Result<(), CheckError> {
        let b = &self.backend;
        let (acquired, _) = b
            .try_lock(check_lock(project, "default", CHECK_USER))
            .await
            .map_err(call("try_lock"))?;
        if !acquired {
            return Err(CheckError::Mismatch("try_lock did not acquire".to_string()));
        }

        let listed = b.list().await.map_err(call("list"))?;
        if !listed
            .iter()
            .any(|l| l.project.repo_full_name == project.repo_full_name && l.workspace == "default")
        {
            return Err(CheckError::Mismatch("list is missing the new lock".to_string()));
        }

        if b.get_lock(project, "default")
            .await
            .map_err(call("get_lock"))?
            .is_none()
        {
            return Err(CheckError::Mismatch("get_lock found nothing".to_string()));
        }

        if b.unlock(project, "default")
            .await
            .map_err(call("unlock"))?
            .is_none()
        {
            return Err(CheckError::Mismatch("unlock returned no lock".to_string()));
        }

        if b.get_lock(project, "default")
            .await
            .map_err(call("get_lock"))?
            .is_some()
        {
            return Err(CheckError::Mismatch("lock still present after unlock".to_string()));
        }
        Ok(())
    }

    async fn concurrent_access(&self) -> Result<(), CheckError> {
        let project = Project::new("test/concurrent-check", ".");
        let result = self.contend(&project).await;
        self.cleanup(&project, &["default"]).await;
        result
    }

    async fn contend(&self, project: &Project) -> Result<(), CheckError> {
        let b = &self.backend;
        let (first, _) = b
            .try_lock(check_lock(project, "default", "user1"))
            .await
            .map_err(call("try_lock"))?;
        if !first {
            return Err(CheckError::Mismatch("first lock not acquired".to_string()));
        }
        let (second, holder) = b
            .try_lock(check_lock(project, "default", "user2"))
            .await
            .map_err(call("try_lock"))?;
        if second {
            return Err(CheckError::Mismatch("second lock should not be acquired".to_string()));
        }
        if holder.user.username != "user1" {
            return Err(CheckError::Mismatch(format!(
                "expected holder user1, got {}",
                holder.user.username
            )));
        }
        Ok(())
    }

    async fn unlock_by_pull(&self) -> Result<(), CheckError> {
        const WORKSPACES: [&str; 3] = ["ws1", "ws2", "ws3"];
        let project = Project::new("test/unlock-by-pull-check", ".");
        let b = &self.backend;

        for ws in WORKSPACES {
            let (acquired, _) = b
                .try_lock(check_lock(&project, ws, CHECK_USER))
                .await
                .map_err(call("try_lock"))?;
            if !acquired {
                self.cleanup(&project, &WORKSPACES).await;
                return Err(CheckError::Mismatch(format!(
                    "failed to acquire lock for workspace {}",
                    ws
                )));
            }
        }

        let unlocked = b
            .unlock_by_pull(&project.repo_full_name, CHECK_PULL)
            .await
            .map_err(call("unlock_by_pull"));
        self.cleanup(&project, &WORKSPACES).await;
        let unlocked = unlocked?;
        if unlocked.len() != WORKSPACES.len() {
            return Err(CheckError::Mismatch(format!(
                "expected {} unlocked locks, got {}",
                WORKSPACES.len(),
                unlocked.len()
            )));
        }
        Ok(())
    }

    async fn list_consistency(&self) -> Result<(), CheckError> {
        let project = Project::new("test/list-consistency", ".");
        let result = self.list_cycle(&project).await;
        self.cleanup(&project, &["default"]).await;
        result
    }

    async fn list_cycle(&self, project: &Project) -> Result<(), CheckError> {
        let b = &self.backend;
        let initial = b.list().await.map_err(call("list"))?.len();

        let (acquired, _) = b
            .try_lock(check_lock(project, "default", CHECK_USER))
            .await
            .map_err(call("try_lock"))?;
        if !acquired {
            return Err(CheckError::Mismatch("failed to acquire test lock".to_string()));
        }

        let updated = b.list().await.map_err(call("list"))?.len();
        if updated != initial + 1 {
            return Err(CheckError::Mismatch(format!(
                "expected {} locks after adding one, got {}",
                initial + 1,
                updated
            )));
        }

        b.unlock(project, "default").await.map_err(call("unlock"))?;
        let finished = b.list().await.map_err(call("list"))?.len();
        if finished != initial {
            return Err(CheckError::Mismatch(format!(
                "expected {} locks after removal, got {}",
                initial, finished
            )));
        }
        Ok(())
    }

    /// Best-effort removal of anything a check left behind
    async fn cleanup(&self, project: &Project, workspaces: &[&str]) {
        for ws in workspaces {
            if let Err(e) = self.backend.unlock(project, ws).await {
                tracing::debug!(workspace = %ws, error = %e, "check cleanup failed");
            }
        }
    }
}

fn check_lock(project: &Project, workspace: &str, user: &str) -> ProjectLock {
    ProjectLock::new(
        project.clone(),
        workspace,
        User::new(user),
        PullRequest::new(CHECK_PULL, user),
        Utc::now(),
    )
}

#[cfg(test)]
#[path = "compat_tests.rs"]
mod tests;
