// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::DateTime;
use warden_core::{Project, PullRequest, User};

fn lock(repo: &str, workspace: &str, pull: u64) -> ProjectLock {
    ProjectLock::new(
        Project::new(repo, "."),
        workspace,
        User::new("alice"),
        PullRequest::new(pull, "alice"),
        DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    )
}

#[test]
fn apply_put_and_delete() {
    let mut table = LockTable::default();
    assert_eq!(table.apply(&StoreOp::Put { lock: lock("o/r", "default", 1) }), None);
    assert!(table.get("o/r/./default").is_some());

    let removed = table.apply(&StoreOp::Delete {
        key: "o/r/./default".to_string(),
    });
    assert_eq!(removed.map(|l| l.pull.num), Some(1));
    assert!(table.is_empty());
}

#[test]
fn delete_of_missing_key_is_noop() {
    let mut table = LockTable::default();
    assert_eq!(
        table.apply(&StoreOp::Delete {
            key: "missing".to_string()
        }),
        None
    );
}

#[test]
fn keys_for_pull_match_repo_and_number() {
    let mut table = LockTable::default();
    table.apply(&StoreOp::Put { lock: lock("o/r", "default", 1) });
    table.apply(&StoreOp::Put { lock: lock("o/r", "staging", 1) });
    table.apply(&StoreOp::Put { lock: lock("o/r", "prod", 2) });
    table.apply(&StoreOp::Put { lock: lock("o/other", "default", 1) });

    assert_eq!(
        table.keys_for_pull("o/r", 1),
        vec!["o/r/./default".to_string(), "o/r/./staging".to_string()]
    );
}

#[test]
fn ops_serialize_with_type_tag() {
    let json = serde_json::to_string(&StoreOp::Delete {
        key: "o/r/./default".to_string(),
    })
    .unwrap();
    assert_eq!(json, r#"{"type":"delete","key":"o/r/./default"}"#);
}
