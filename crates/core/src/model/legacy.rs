// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Legacy single-node lock model and conversions

use super::lock::{EnhancedLock, LockState, Priority};
use super::resource::ResourceIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A project inside a repository
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub project_name: String,
    /// Owner and repo name, e.g. `runatlantis/atlantis`
    pub repo_full_name: String,
    /// Project root relative to the repo root; `.` for the root itself
    pub path: String,
}

impl Project {
    pub fn new(repo_full_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            project_name: String::new(),
            repo_full_name: repo_full_name.into(),
            path: path.into(),
        }
    }

    pub fn resource(&self, workspace: &str) -> ResourceIdentifier {
        ResourceIdentifier::project(&self.repo_full_name, &self.path, workspace)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequest {
    pub num: u64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub head_commit: String,
    #[serde(default)]
    pub url: String,
}

impl PullRequest {
    pub fn new(num: u64, author: impl Into<String>) -> Self {
        Self {
            num,
            author: author.into(),
            ..Self::default()
        }
    }
}

/// A lock as the legacy interface sees it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLock {
    pub project: Project,
    pub pull: PullRequest,
    pub user: User,
    pub workspace: String,
    /// When the lock was first created
    pub time: DateTime<Utc>,
}

impl ProjectLock {
    pub fn new(
        project: Project,
        workspace: impl Into<String>,
        user: User,
        pull: PullRequest,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            project,
            pull,
            user,
            workspace: workspace.into(),
            time,
        }
    }

    pub fn key(&self) -> String {
        legacy_key(&self.project, &self.workspace)
    }

    pub fn resource(&self) -> ResourceIdentifier {
        self.project.resource(&self.workspace)
    }
}

/// `repo/path/workspace`, the key legacy stores index locks by
pub fn legacy_key(project: &Project, workspace: &str) -> String {
    format!("{}/{}/{}", project.repo_full_name, project.path, workspace)
}

impl EnhancedLock {
    /// Legacy view of this lock, preferring the embedded original
    pub fn to_legacy(&self) -> ProjectLock {
        if let Some(original) = &self.original {
            return original.clone();
        }
        ProjectLock {
            project: Project::new(&self.resource.namespace, &self.resource.path),
            pull: PullRequest::default(),
            user: User::new(&self.owner),
            workspace: self.resource.workspace.clone(),
            time: self.acquired_at,
        }
    }

    /// Wrap a legacy lock as an acquired enhanced lock
    pub fn from_legacy(lock: &ProjectLock, lock_id: impl Into<String>) -> Self {
        Self {
            id: lock_id.into(),
            resource: lock.resource(),
            state: LockState::Acquired,
            priority: Priority::Normal,
            owner: lock.user.username.clone(),
            acquired_at: lock.time,
            expires_at: None,
            version: 1,
            metadata: BTreeMap::new(),
            request_id: None,
            original: Some(lock.clone()),
        }
    }
}

#[cfg(test)]
#[path = "legacy_tests.rs"]
mod tests;
