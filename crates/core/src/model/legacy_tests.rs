// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::LockRequest;
use std::time::Duration;

fn sample_lock() -> ProjectLock {
    ProjectLock::new(
        Project::new("owner/repo", "infra/prod"),
        "default",
        User::new("alice"),
        PullRequest::new(42, "alice"),
        Utc::now(),
    )
}

#[test]
fn legacy_key_joins_repo_path_workspace() {
    let lock = sample_lock();
    assert_eq!(lock.key(), "owner/repo/infra/prod/default");
    assert_eq!(legacy_key(&lock.project, "staging"), "owner/repo/infra/prod/staging");
}

#[test]
fn resource_from_project_matches_lock_resource() {
    let lock = sample_lock();
    assert_eq!(lock.resource(), lock.project.resource("default"));
    assert_eq!(lock.resource().key(), "owner/repo:infra/prod:default");
}

#[test]
fn from_legacy_preserves_original() {
    let lock = sample_lock();
    let enhanced = EnhancedLock::from_legacy(&lock, "abc");
    assert_eq!(enhanced.owner, "alice");
    assert_eq!(enhanced.pull_num(), Some(42));
    assert_eq!(enhanced.to_legacy(), lock);
}

#[test]
fn to_legacy_without_original_builds_from_fields() {
    let now = Utc::now();
    let request = LockRequest::new(
        "r-1",
        ResourceIdentifier::project("owner/repo", ".", "default"),
        "bob",
        now,
    )
    .with_timeout(Duration::from_secs(10));
    let enhanced = EnhancedLock::acquired(&request, "abc", now);
    let legacy = enhanced.to_legacy();
    assert_eq!(legacy.project.repo_full_name, "owner/repo");
    assert_eq!(legacy.project.path, ".");
    assert_eq!(legacy.user.username, "bob");
    assert_eq!(legacy.workspace, "default");
    assert_eq!(legacy.time, now);
    assert_eq!(legacy.pull.num, 0);
}
