// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster coordinator
//!
//! Keeps this process's membership record fresh, runs the optimistic leader
//! election, and evicts members whose heartbeats stopped. None of this gates
//! lock requests: failures are logged and retried on the next cycle.

use crate::maintenance::periodic;
use crate::manager::LockManager;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warden_core::{
    leader_priority, Clock, ClusterConfig, ClusterNode, ClusterStore, ElectionOutcome, EventBus,
    HealthLevel, IdGen, JoinOutcome, LockError, LockEvent, NodeStatus, SystemClock, UuidIdGen,
};

/// Load a node reports with its heartbeat
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeLoad {
    pub lock_count: usize,
    pub queue_count: usize,
    /// 0..=100
    pub health: u8,
}

impl Default for NodeLoad {
    fn default() -> Self {
        Self {
            lock_count: 0,
            queue_count: 0,
            health: 100,
        }
    }
}

impl NodeLoad {
    /// Sample this node's share of the work
    ///
    /// Counts come from the local manager; the backend's totals are shared by
    /// every node on the same store and would not tell nodes apart.
    pub async fn probe<M: Clock>(manager: &LockManager<M>) -> Self {
        let health = if manager.backend().health_check().await.healthy {
            100
        } else {
            0
        };
        Self {
            lock_count: manager.held_locally(),
            queue_count: manager.waiting_locally(),
            health,
        }
    }
}

/// Liveness of the membership as a whole
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub level: HealthLevel,
    pub active: usize,
    pub known: usize,
    pub leader: Option<String>,
}

pub struct ClusterCoordinator<C: Clock = SystemClock> {
    store: Arc<dyn ClusterStore>,
    config: ClusterConfig,
    clock: C,
    node: Mutex<ClusterNode>,
    leader: AtomicBool,
    events: EventBus,
}

impl ClusterCoordinator<SystemClock> {
    pub fn new(store: Arc<dyn ClusterStore>, config: ClusterConfig) -> Self {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<C: Clock> ClusterCoordinator<C> {
    /// Node id comes from config, or a generated `node-{uuid}`
    pub fn with_clock(store: Arc<dyn ClusterStore>, config: ClusterConfig, clock: C) -> Self {
        let id = config
            .node_id
            .clone()
            .unwrap_or_else(|| format!("node-{}", UuidIdGen.next()));
        let node = ClusterNode::new(id, config.address.clone(), clock.utc_now());
        Self {
            store,
            config,
            clock,
            node: Mutex::new(node),
            leader: AtomicBool::new(false),
            events: EventBus::new(),
        }
    }

    fn node_mut(&self) -> MutexGuard<'_, ClusterNode> {
        self.node.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn node_id(&self) -> String {
        self.node_mut().id.clone()
    }

    /// Snapshot of this node's record
    pub fn node(&self) -> ClusterNode {
        self.node_mut().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// Cluster events as this node sees them
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
        self.node_mut().is_leader = leader;
    }

    async fn announce(&self, event: LockEvent) {
        self.events.publish(event.clone());
        if let Err(e) = self.store.publish(&event).await {
            tracing::debug!(event = %event.name(), error = %e, "cluster publish failed");
        }
    }

    // -- membership --

    pub async fn join(&self) -> Result<JoinOutcome, LockError> {
        let node = {
            let mut node = self.node_mut();
            node.status = NodeStatus::Active;
            node.last_heartbeat = self.clock.utc_now();
            node.clone()
        };
        let outcome = self
            .store
            .join(&node, self.config.node_ttl(), self.config.max_cluster_size)
            .await?;
        tracing::info!(node_id = %node.id, address = %node.address, ?outcome, "joined cluster");
        self.announce(LockEvent::NodeJoined {
            node_id: node.id,
            timestamp: self.clock.utc_now(),
        })
        .await;
        Ok(outcome)
    }

    pub async fn leave(&self) -> Result<(), LockError> {
        let id = {
            let mut node = self.node_mut();
            node.status = NodeStatus::Leaving;
            node.id.clone()
        };
        if self.is_leader() {
            self.store.clear_leader(&id).await?;
            self.set_leader(false);
        }
        self.store.remove_node(&id).await?;
        tracing::info!(node_id = %id, "left cluster");
        self.announce(LockEvent::NodeLeft {
            node_id: id,
            timestamp: self.clock.utc_now(),
        })
        .await;
        Ok(())
    }

    /// Refresh the membership record and, when leading, the leader key
    pub async fn heartbeat(&self, load: NodeLoad) -> Result<(), LockError> {
        let node = {
            let mut node = self.node_mut();
            node.last_heartbeat = self.clock.utc_now();
            node.lock_count = load.lock_count;
            node.queue_count = load.queue_count;
            node.leader_priority = leader_priority(load.health, load.lock_count);
            if node.status != NodeStatus::Leaving {
                node.status = NodeStatus::Active;
            }
            node.clone()
        };
        self.store.heartbeat(&node, self.config.node_ttl()).await?;

        if self.is_leader()
            && !self
                .store
                .renew_leader(&node.id, self.config.leader_ttl())
                .await?
        {
            self.set_leader(false);
            tracing::warn!(node_id = %node.id, "leadership lost");
        }
        Ok(())
    }

    /// Members with a live, fresh record
    pub async fn active_nodes(&self) -> Result<Vec<ClusterNode>, LockError> {
        let now = self.clock.utc_now();
        let mut active = Vec::new();
        for id in self.store.member_ids().await? {
            if let Some(node) = self.store.get_node(&id).await? {
                if node.is_active() && !node.is_stale(now, self.config.node_timeout) {
                    active.push(node);
                }
            }
        }
        Ok(active)
    }

    // -- leadership --

    pub async fn elect(&self) -> Result<ElectionOutcome, LockError> {
        let id = self.node_id();
        match self.store.leader().await? {
            Some(leader) if leader == id => {
                self.set_leader(true);
                return Ok(ElectionOutcome::AlreadyLeader);
            }
            Some(leader) => {
                self.set_leader(false);
                return Ok(ElectionOutcome::Follower { leader });
            }
            None => {
                if self.is_leader() {
                    tracing::warn!(node_id = %id, "leader key lapsed");
                    self.set_leader(false);
                }
            }
        }

        let members = self.store.member_ids().await?;
        let active = self.active_nodes().await?;
        let required = self.config.consensus_threshold;
        if members.len() > 1 && active.len() < required {
            return Ok(ElectionOutcome::NoQuorum {
                active: active.len(),
                required,
            });
        }
        if let Some(best) = best_candidate(&active) {
            if best.id != id {
                return Ok(ElectionOutcome::Deferred {
                    candidate: best.id.clone(),
                });
            }
        }

        if !self
            .store
            .begin_election(&id, self.config.election_timeout)
            .await?
        {
            return Ok(ElectionOutcome::InProgress);
        }
        let claimed = self.store.claim_leader(&id, self.config.leader_ttl()).await;
        if let Err(e) = self.store.end_election(&id).await {
            tracing::debug!(error = %e, "failed to clear election marker");
        }

        if claimed? {
            self.set_leader(true);
            tracing::info!(node_id = %id, "elected leader");
            self.announce(LockEvent::LeaderElected {
                node_id: id,
                timestamp: self.clock.utc_now(),
            })
            .await;
            return Ok(ElectionOutcome::Elected);
        }
        Ok(match self.store.leader().await? {
            Some(leader) => ElectionOutcome::Follower { leader },
            None => ElectionOutcome::InProgress,
        })
    }

    /// Leadership for a leader-only task, electing first when there is none
    pub async fn require_leader(&self) -> Result<(), LockError> {
        match self.elect().await? {
            ElectionOutcome::Elected | ElectionOutcome::AlreadyLeader => Ok(()),
            ElectionOutcome::InProgress | ElectionOutcome::Deferred { .. } => {
                Err(LockError::ElectionInProgress)
            }
            ElectionOutcome::Follower { leader } => Err(LockError::ClusterConflict {
                resource: "leader".to_string(),
                reason: format!("led by {}", leader),
            }),
            ElectionOutcome::NoQuorum { active, required } => Err(LockError::ClusterConflict {
                resource: "leader".to_string(),
                reason: format!("{} of {} nodes active", active, required),
            }),
        }
    }

    // -- maintenance --

    /// Evict members past the heartbeat timeout, returning their ids
    ///
    /// The leader evicts anyone. Without a leader any node may evict, and a
    /// stale leader may be evicted by anyone so a new election can start.
    pub async fn maintain(&self) -> Result<Vec<String>, LockError> {
        let id = self.node_id();
        let now = self.clock.utc_now();
        let leader = self.store.leader().await?;
        let may_evict_any = leader.is_none() || leader.as_deref() == Some(id.as_str());

        let mut evicted = Vec::new();
        for member in self.store.member_ids().await? {
            if member == id {
                continue;
            }
            let stale = match self.store.get_node(&member).await? {
                Some(node) => {
                    node.status == NodeStatus::Failed
                        || node.is_stale(now, self.config.node_timeout)
                }
                None => true,
            };
            let was_leader = leader.as_deref() == Some(member.as_str());
            if !stale || !(may_evict_any || was_leader) {
                continue;
            }

            self.store.remove_node(&member).await?;
            if was_leader {
                self.store.clear_leader(&member).await?;
            }
            tracing::warn!(node_id = %member, was_leader, "evicted stale node");
            self.announce(LockEvent::NodeFailed {
                node_id: member.clone(),
                timestamp: now,
            })
            .await;
            evicted.push(member);
        }
        Ok(evicted)
    }

    pub async fn cluster_health(&self) -> Result<ClusterHealth, LockError> {
        let known = self.store.member_ids().await?.len();
        let active = self.active_nodes().await?.len();
        let ratio = if known == 0 {
            0.0
        } else {
            active as f64 / known as f64
        };
        Ok(ClusterHealth {
            level: HealthLevel::from_ratio(ratio),
            active,
            known,
            leader: self.store.leader().await?,
        })
    }

    /// One heartbeat, election and eviction pass
    pub async fn run_cycle(&self, load: NodeLoad) {
        if let Err(e) = self.heartbeat(load).await {
            tracing::warn!(error = %e, "heartbeat failed");
        }
        match self.elect().await {
            Ok(ElectionOutcome::NoQuorum { active, required }) => {
                tracing::debug!(active, required, "no quorum for election");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "election failed"),
        }
        if let Err(e) = self.maintain().await {
            tracing::warn!(error = %e, "cluster maintenance failed");
        }
    }

    /// Run `run_cycle` every heartbeat interval with load sampled from `manager`
    pub fn spawn<M: Clock>(
        self: &Arc<Self>,
        manager: LockManager<M>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let me = Arc::clone(self);
        periodic("cluster", self.config.heartbeat_interval, shutdown, move || {
            let me = Arc::clone(&me);
            let manager = manager.clone();
            async move {
                let load = NodeLoad::probe(&manager).await;
                me.run_cycle(load).await;
            }
        })
    }
}

/// Highest leader priority, lowest id on ties
fn best_candidate(nodes: &[ClusterNode]) -> Option<&ClusterNode> {
    nodes.iter().min_by(|a, b| {
        b.leader_priority
            .cmp(&a.leader_priority)
            .then_with(|| a.id.cmp(&b.id))
    })
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
