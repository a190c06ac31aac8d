// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key schema

use warden_core::{QueueEntry, ResourceIdentifier};

/// Builds every key and channel name under an optional prefix
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}lock:{ns}:{path}:{ws}`
    pub fn lock(&self, resource: &ResourceIdentifier) -> String {
        resource.lock_key(&self.prefix)
    }

    /// `{prefix}queue:{ns}:{path}:{ws}`
    pub fn queue(&self, resource: &ResourceIdentifier) -> String {
        resource.queue_key(&self.prefix)
    }

    /// Lock id to resource key suffix, kept alongside held and queued locks
    pub fn index(&self, lock_id: &str) -> String {
        format!("{}lockid:{}", self.prefix, lock_id)
    }

    pub fn index_prefix(&self) -> String {
        format!("{}lockid:", self.prefix)
    }

    pub fn lock_from_suffix(&self, suffix: &str) -> String {
        format!("{}lock:{}", self.prefix, suffix)
    }

    pub fn queue_from_suffix(&self, suffix: &str) -> String {
        format!("{}queue:{}", self.prefix, suffix)
    }

    /// `ns:path:ws` part of a lock or queue key
    pub fn suffix_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        rest.strip_prefix("lock:")
            .or_else(|| rest.strip_prefix("queue:"))
    }

    pub fn lock_pattern(&self) -> String {
        format!("{}lock:*", self.prefix)
    }

    pub fn queue_pattern(&self) -> String {
        format!("{}queue:*", self.prefix)
    }

    pub fn lock_channel(&self) -> String {
        format!("{}lock:events", self.prefix)
    }

    pub fn cluster_channel(&self) -> String {
        format!("{}cluster:events", self.prefix)
    }

    /// Pattern covering both event channels
    pub fn channel_pattern(&self) -> String {
        format!("{}*:events", self.prefix)
    }

    pub fn cluster_nodes(&self) -> String {
        format!("{}cluster:nodes", self.prefix)
    }

    pub fn cluster_node(&self, node_id: &str) -> String {
        format!("{}cluster:node:{}", self.prefix, node_id)
    }

    pub fn cluster_leader(&self) -> String {
        format!("{}cluster:leader", self.prefix)
    }

    pub fn cluster_election(&self) -> String {
        format!("{}cluster:election", self.prefix)
    }
}

/// Sorted-set score of a queue entry, formatted without exponent
pub fn score_arg(entry: &QueueEntry) -> String {
    entry.rank().to_string()
}
