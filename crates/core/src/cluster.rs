// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster membership records and the store they live in

use crate::error::LockError;
use crate::events::LockEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Suspected,
    Failed,
    #[default]
    Joining,
    Leaving,
    Maintenance,
}

/// One engine process taking part in the cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: String,
    pub address: String,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub lock_count: usize,
    #[serde(default)]
    pub queue_count: usize,
    #[serde(default)]
    pub is_leader: bool,
    /// 0..=100, higher is a better leader candidate
    #[serde(default)]
    pub leader_priority: u8,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ClusterNode {
    pub fn new(id: impl Into<String>, address: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            status: NodeStatus::Joining,
            last_heartbeat: now,
            capabilities: vec!["locking".to_string(), "queueing".to_string()],
            lock_count: 0,
            queue_count: 0,
            is_leader: false,
            leader_priority: 100,
            version: env!("CARGO_PKG_VERSION").to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Whether the last heartbeat is older than `timeout`
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        (now - self.last_heartbeat)
            .to_std()
            .is_ok_and(|age| age > timeout)
    }
}

/// `clamp(health - lock_count, 0, 100)`; healthier, less loaded nodes rank higher
pub fn leader_priority(health: u8, lock_count: usize) -> u8 {
    let score = i64::from(health) - i64::try_from(lock_count).unwrap_or(i64::MAX);
    score.clamp(0, 100) as u8
}

/// Result of joining the membership set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// The node id was already a member
    Rejoined,
}

/// Result of one election attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElectionOutcome {
    Elected,
    AlreadyLeader,
    Follower { leader: String },
    /// Another node holds the election marker
    InProgress,
    /// Too few active members to elect
    NoQuorum { active: usize, required: usize },
    /// A higher-ranked active node should claim instead
    Deferred { candidate: String },
}

// =============================================================================
// Store
// =============================================================================

/// Shared membership and leadership state
///
/// Leader claims use set-if-not-exists semantics with a TTL.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Add the node to the membership set; fails with `ClusterConflict` when full
    async fn join(
        &self,
        node: &ClusterNode,
        ttl: Duration,
        max_size: usize,
    ) -> Result<JoinOutcome, LockError>;

    /// Rewrite the node record and refresh its TTL
    async fn heartbeat(&self, node: &ClusterNode, ttl: Duration) -> Result<(), LockError>;

    /// Remove the node from the membership set and delete its record
    async fn remove_node(&self, node_id: &str) -> Result<(), LockError>;

    /// Ids in the membership set, including ones whose record expired
    async fn member_ids(&self) -> Result<Vec<String>, LockError>;

    async fn get_node(&self, node_id: &str) -> Result<Option<ClusterNode>, LockError>;

    /// Claim the leader key if vacant
    async fn claim_leader(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Extend the leader key if `node_id` still holds it
    async fn renew_leader(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError>;

    async fn leader(&self) -> Result<Option<String>, LockError>;

    /// Delete the leader key if `node_id` holds it
    async fn clear_leader(&self, node_id: &str) -> Result<bool, LockError>;

    /// Set the election marker if vacant
    async fn begin_election(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError>;

    async fn end_election(&self, node_id: &str) -> Result<(), LockError>;

    async fn publish(&self, event: &LockEvent) -> Result<(), LockError>;
}
