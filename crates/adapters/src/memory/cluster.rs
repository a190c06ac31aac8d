// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process cluster store

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use warden_core::{
    ClusterNode, ClusterStore, Clock, EventBus, JoinOutcome, LockError, LockEvent, SystemClock,
};

/// A value that stops existing at `expires`
#[derive(Clone)]
struct Leased<T> {
    value: T,
    expires: Instant,
}

impl<T> Leased<T> {
    fn new(value: T, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            expires: now + ttl,
        }
    }

    fn live(&self, now: Instant) -> bool {
        self.expires > now
    }
}

#[derive(Default)]
struct Membership {
    members: BTreeSet<String>,
    nodes: HashMap<String, Leased<ClusterNode>>,
    leader: Option<Leased<String>>,
    election: Option<Leased<String>>,
}

/// Membership, leader key and election marker held in process
///
/// Several coordinators sharing one store behave like nodes sharing a
/// remote store; tests use this to exercise elections.
#[derive(Clone)]
pub struct MemoryClusterStore<C: Clock = SystemClock> {
    clock: C,
    state: Arc<Mutex<Membership>>,
    events: EventBus,
}

impl MemoryClusterStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryClusterStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryClusterStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(Membership::default())),
            events: EventBus::new(),
        }
    }

    /// Bus that receives everything published through the store
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn state(&self) -> MutexGuard<'_, Membership> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<C: Clock> ClusterStore for MemoryClusterStore<C> {
    async fn join(
        &self,
        node: &ClusterNode,
        ttl: Duration,
        max_size: usize,
    ) -> Result<JoinOutcome, LockError> {
        let now = self.clock.now();
        let mut state = self.state();
        let outcome = if state.members.contains(&node.id) {
            JoinOutcome::Rejoined
        } else {
            if state.members.len() >= max_size {
                return Err(LockError::ClusterConflict {
                    resource: "cluster".to_string(),
                    reason: format!("cluster full ({} nodes)", max_size),
                });
            }
            state.members.insert(node.id.clone());
            JoinOutcome::Joined
        };
        state
            .nodes
            .insert(node.id.clone(), Leased::new(node.clone(), now, ttl));
        Ok(outcome)
    }

    async fn heartbeat(&self, node: &ClusterNode, ttl: Duration) -> Result<(), LockError> {
        let now = self.clock.now();
        let mut state = self.state();
        state.members.insert(node.id.clone());
        state
            .nodes
            .insert(node.id.clone(), Leased::new(node.clone(), now, ttl));
        Ok(())
    }

    async fn remove_node(&self, node_id: &str) -> Result<(), LockError> {
        let mut state = self.state();
        state.members.remove(node_id);
        state.nodes.remove(node_id);
        Ok(())
    }

    async fn member_ids(&self) -> Result<Vec<String>, LockError> {
        Ok(self.state().members.iter().cloned().collect())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<ClusterNode>, LockError> {
        let now = self.clock.now();
        Ok(self
            .state()
            .nodes
            .get(node_id)
            .filter(|n| n.live(now))
            .map(|n| n.value.clone()))
    }

    async fn claim_leader(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut state = self.state();
        if state.leader.as_ref().is_some_and(|l| l.live(now)) {
            return Ok(false);
        }
        state.leader = Some(Leased::new(node_id.to_string(), now, ttl));
        Ok(true)
    }

    async fn renew_leader(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut state = self.state();
        match state.leader.as_mut() {
            Some(leader) if leader.live(now) && leader.value == node_id => {
                leader.expires = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn leader(&self) -> Result<Option<String>, LockError> {
        let now = self.clock.now();
        Ok(self
            .state()
            .leader
            .as_ref()
            .filter(|l| l.live(now))
            .map(|l| l.value.clone()))
    }

    async fn clear_leader(&self, node_id: &str) -> Result<bool, LockError> {
        let mut state = self.state();
        if state.leader.as_ref().is_some_and(|l| l.value == node_id) {
            state.leader = None;
            return Ok(true);
        }
        Ok(false)
    }

    async fn begin_election(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut state = self.state();
        if state.election.as_ref().is_some_and(|e| e.live(now)) {
            return Ok(false);
        }
        state.election = Some(Leased::new(node_id.to_string(), now, ttl));
        Ok(true)
    }

    async fn end_election(&self, node_id: &str) -> Result<(), LockError> {
        let mut state = self.state();
        if state.election.as_ref().is_some_and(|e| e.value == node_id) {
            state.election = None;
        }
        Ok(())
    }

    async fn publish(&self, event: &LockEvent) -> Result<(), LockError> {
        self.events.publish(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::FakeClock;

    fn node(id: &str, clock: &FakeClock) -> ClusterNode {
        ClusterNode::new(id, "127.0.0.1:4141", clock.utc_now())
    }

    #[tokio::test]
    async fn join_rejects_when_full_and_rejoins_members() {
        let clock = FakeClock::new();
        let store = MemoryClusterStore::with_clock(clock.clone());
        let ttl = Duration::from_secs(60);

        assert_eq!(store.join(&node("a", &clock), ttl, 2).await.unwrap(), JoinOutcome::Joined);
        assert_eq!(store.join(&node("b", &clock), ttl, 2).await.unwrap(), JoinOutcome::Joined);
        assert_eq!(store.join(&node("a", &clock), ttl, 2).await.unwrap(), JoinOutcome::Rejoined);

        let err = store.join(&node("c", &clock), ttl, 2).await.unwrap_err();
        assert!(err.to_string().contains("cluster full"), "{}", err);
    }

    #[tokio::test]
    async fn node_record_expires_but_membership_remains() {
        let clock = FakeClock::new();
        let store = MemoryClusterStore::with_clock(clock.clone());
        store
            .join(&node("a", &clock), Duration::from_secs(10), 7)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(11));
        assert!(store.get_node("a").await.unwrap().is_none());
        assert_eq!(store.member_ids().await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn leader_claim_is_exclusive_until_ttl_lapses() {
        let clock = FakeClock::new();
        let store = MemoryClusterStore::with_clock(clock.clone());
        let ttl = Duration::from_secs(20);

        assert!(store.claim_leader("a", ttl).await.unwrap());
        assert!(!store.claim_leader("b", ttl).await.unwrap());
        assert!(store.renew_leader("a", ttl).await.unwrap());
        assert!(!store.renew_leader("b", ttl).await.unwrap());

        clock.advance(Duration::from_secs(21));
        assert_eq!(store.leader().await.unwrap(), None);
        assert!(store.claim_leader("b", ttl).await.unwrap());
        assert_eq!(store.leader().await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn clear_leader_only_for_holder() {
        let store = MemoryClusterStore::new();
        store.claim_leader("a", Duration::from_secs(20)).await.unwrap();
        assert!(!store.clear_leader("b").await.unwrap());
        assert!(store.clear_leader("a").await.unwrap());
        assert_eq!(store.leader().await.unwrap(), None);
    }

    #[tokio::test]
    async fn election_marker_blocks_second_candidate() {
        let store = MemoryClusterStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.begin_election("a", ttl).await.unwrap());
        assert!(!store.begin_election("b", ttl).await.unwrap());
        store.end_election("a").await.unwrap();
        assert!(store.begin_election("b", ttl).await.unwrap());
    }
}
