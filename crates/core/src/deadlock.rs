// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wait-for graph deadlock detection
//!
//! The graph is derived from two tables: pending requests and resource
//! holders. Owner X waits for owner Y when X has a pending request on a
//! resource Y holds. A cycle among owners is a deadlock; an owner queued
//! behind its own lock is a cycle of length one.

use crate::clock::Clock;
use crate::error::LockError;
use crate::model::Priority;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// How a victim is chosen from a detected cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Lowest priority, youngest on ties
    #[default]
    LowestPriority,
    Youngest,
    Oldest,
    Random,
}

/// A request waiting on a resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: String,
    pub owner: String,
    /// Resource key, `namespace:path:workspace`
    pub resource: String,
    pub priority: Priority,
    pub since: DateTime<Utc>,
}

/// A detected deadlock
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockRecord {
    pub id: String,
    /// Owners forming the cycle, in wait order
    pub cycle: Vec<String>,
    /// Pending requests that form the cycle's edges
    pub requests: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Request id cancelled to break the cycle
    pub victim: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockMetrics {
    pub detected: u64,
    pub resolved: u64,
    pub prevented: u64,
    pub waiting: usize,
    pub history: usize,
}

#[derive(Default)]
struct Graph {
    pending: HashMap<String, PendingRequest>,
    holders: HashMap<String, String>,
    history: VecDeque<DeadlockRecord>,
    detected: u64,
    resolved: u64,
    prevented: u64,
    next_id: u64,
}

impl Graph {
    /// Owners each owner waits for
    fn edges(&self) -> HashMap<&str, BTreeSet<&str>> {
        let mut edges: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for req in self.pending.values() {
            if let Some(holder) = self.holders.get(&req.resource) {
                edges
                    .entry(req.owner.as_str())
                    .or_default()
                    .insert(holder.as_str());
            }
        }
        edges
    }

    /// Path of owners from `from` to `to` following wait edges
    fn path<'a>(
        edges: &HashMap<&'a str, BTreeSet<&'a str>>,
        from: &'a str,
        to: &str,
    ) -> Option<Vec<String>> {
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::from([from]);
        let mut frontier = VecDeque::from([from]);
        while let Some(node) = frontier.pop_front() {
            if node == to {
                let mut path = vec![node.to_string()];
                let mut cur = node;
                while let Some(&prev) = parent.get(cur) {
                    path.push(prev.to_string());
                    cur = prev;
                }
                path.reverse();
                return Some(path);
            }
            for &next in edges.get(node).into_iter().flatten() {
                if seen.insert(next) {
                    parent.insert(next, node);
                    frontier.push_back(next);
                }
            }
        }
        None
    }

    /// Requests whose edges lie on `cycle`
    fn cycle_requests(&self, cycle: &[String]) -> Vec<&PendingRequest> {
        let mut out: Vec<&PendingRequest> = Vec::new();
        for (i, owner) in cycle.iter().enumerate() {
            let next = &cycle[(i + 1) % cycle.len()];
            out.extend(self.pending.values().filter(|req| {
                &req.owner == owner && self.holders.get(&req.resource) == Some(next)
            }));
        }
        out.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        out.dedup_by(|a, b| a.request_id == b.request_id);
        out
    }
}

/// Maintains the wait-for graph and the deadlock history
pub struct DeadlockDetector<C: Clock> {
    clock: C,
    policy: ResolutionPolicy,
    history_size: usize,
    graph: Mutex<Graph>,
}

impl<C: Clock> DeadlockDetector<C> {
    pub fn new(clock: C, policy: ResolutionPolicy, history_size: usize) -> Self {
        Self {
            clock,
            policy,
            history_size: history_size.max(1),
            graph: Mutex::new(Graph::default()),
        }
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    /// Record that `owner` holds `resource`
    pub fn set_holder(&self, resource: &str, owner: &str) {
        let mut graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        graph.holders.insert(resource.to_string(), owner.to_string());
    }

    /// Forget the holder of `resource`
    pub fn clear_holder(&self, resource: &str) {
        let mut graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        graph.holders.remove(resource);
    }

    pub fn holder(&self, resource: &str) -> Option<String> {
        let graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        graph.holders.get(resource).cloned()
    }

    pub fn add_waiting(&self, request: PendingRequest) {
        let mut graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        graph.pending.insert(request.request_id.clone(), request);
    }

    pub fn remove_waiting(&self, request_id: &str) -> Option<PendingRequest> {
        let mut graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        graph.pending.remove(request_id)
    }

    /// Cycle that would form if `owner` started waiting on `resource`
    pub fn would_deadlock(&self, owner: &str, resource: &str) -> Option<Vec<String>> {
        let graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        let holder = graph.holders.get(resource)?;
        if holder == owner {
            return Some(vec![owner.to_string()]);
        }
        let edges = graph.edges();
        let mut cycle = vec![owner.to_string()];
        cycle.extend(Graph::path(&edges, holder, owner)?);
        cycle.pop();
        Some(cycle)
    }

    /// Refuse admission of a wait that would close a cycle
    pub fn prevent_deadlock(&self, request: &PendingRequest) -> Result<(), LockError> {
        let Some(cycle) = self.would_deadlock(&request.owner, &request.resource) else {
            return Ok(());
        };
        let mut graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        graph.prevented += 1;
        tracing::warn!(
            request_id = %request.request_id,
            owner = %request.owner,
            cycle = ?cycle,
            "deadlock prevented"
        );
        Err(LockError::Deadlock {
            request_id: request.request_id.clone(),
            cycle,
        })
    }

    /// Sweep the whole graph for cycles and record each new one
    pub fn detect(&self) -> Vec<DeadlockRecord> {
        let now = self.clock.utc_now();
        let mut graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());

        let cycles = {
            let edges = graph.edges();
            let mut owners: Vec<&str> = edges.keys().copied().collect();
            owners.sort_unstable();
            let mut seen: HashSet<BTreeSet<String>> = HashSet::new();
            let mut cycles = Vec::new();
            for owner in owners {
                for &next in edges.get(owner).into_iter().flatten() {
                    let Some(path) = Graph::path(&edges, next, owner) else {
                        continue;
                    };
                    let mut cycle = vec![owner.to_string()];
                    cycle.extend(path);
                    cycle.pop();
                    let members: BTreeSet<String> = cycle.iter().cloned().collect();
                    if seen.insert(members) {
                        cycles.push(cycle);
                    }
                }
            }
            cycles
        };

        let mut records = Vec::new();
        for cycle in cycles {
            let requests = graph
                .cycle_requests(&cycle)
                .iter()
                .map(|r| r.request_id.clone())
                .collect();
            graph.next_id += 1;
            graph.detected += 1;
            let record = DeadlockRecord {
                id: format!("deadlock-{}", graph.next_id),
                cycle,
                requests,
                detected_at: now,
                resolved: false,
                resolved_at: None,
                victim: None,
            };
            tracing::warn!(id = %record.id, cycle = ?record.cycle, "deadlock detected");
            graph.history.push_back(record.clone());
            while graph.history.len() > self.history_size {
                graph.history.pop_front();
            }
            records.push(record);
        }
        records
    }

    /// Pick the request to cancel for a detected cycle
    pub fn choose_victim(&self, record: &DeadlockRecord) -> Option<PendingRequest> {
        let graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        let candidates: Vec<&PendingRequest> = record
            .requests
            .iter()
            .filter_map(|id| graph.pending.get(id))
            .collect();
        let chosen = match self.policy {
            ResolutionPolicy::LowestPriority => candidates
                .iter()
                .min_by(|a, b| a.priority.cmp(&b.priority).then(b.since.cmp(&a.since))),
            ResolutionPolicy::Youngest => candidates.iter().max_by_key(|r| r.since),
            ResolutionPolicy::Oldest => candidates.iter().min_by_key(|r| r.since),
            ResolutionPolicy::Random => candidates.choose(&mut rand::thread_rng()),
        };
        chosen.map(|r| (*r).clone())
    }

    /// Mark a recorded deadlock resolved by cancelling `victim`
    pub fn mark_resolved(&self, id: &str, victim: &str) {
        let now = self.clock.utc_now();
        let mut graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        graph.pending.remove(victim);
        graph.resolved += 1;
        if let Some(record) = graph.history.iter_mut().find(|r| r.id == id) {
            record.resolved = true;
            record.resolved_at = Some(now);
            record.victim = Some(victim.to_string());
        }
    }

    pub fn history(&self) -> Vec<DeadlockRecord> {
        let graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        graph.history.iter().cloned().collect()
    }

    pub fn metrics(&self) -> DeadlockMetrics {
        let graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        DeadlockMetrics {
            detected: graph.detected,
            resolved: graph.resolved,
            prevented: graph.prevented,
            waiting: graph.pending.len(),
            history: graph.history.len(),
        }
    }
}

#[cfg(test)]
#[path = "deadlock_tests.rs"]
mod tests;
