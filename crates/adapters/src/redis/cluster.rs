// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster store on the same Redis server as the lock backend

use super::keys::Keys;
use super::scripts::Scripts;
use super::{millis, RedisStoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use warden_core::{ClusterNode, ClusterStore, JoinOutcome, LockError, LockEvent};

/// Membership set, node records, leader key and election marker in Redis
pub struct RedisClusterStore {
    conn: ConnectionManager,
    keys: Keys,
    scripts: Scripts,
    timeout: Duration,
}

impl RedisClusterStore {
    pub fn new(conn: ConnectionManager, keys: Keys, timeout: Duration) -> Self {
        Self {
            conn,
            keys,
            scripts: Scripts::new(),
            timeout,
        }
    }

    async fn run<T, F>(&self, fut: F) -> Result<T, LockError>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| RedisStoreError::from(e).into()),
            Err(_) => Err(RedisStoreError::Timeout(self.timeout).into()),
        }
    }

    /// `SET key value NX PX ttl`
    async fn set_if_vacant(&self, key: String, value: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX").arg("PX").arg(millis(ttl));
        let reply: Option<String> = self.run(async move { cmd.query_async(&mut conn).await }).await?;
        Ok(reply.is_some())
    }

    async fn leader_op(&self, node_id: &str, mode: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.leader.prepare_invoke();
        invocation
            .key(self.keys.cluster_leader())
            .arg(node_id)
            .arg(mode)
            .arg(millis(ttl));
        let changed: i64 = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl ClusterStore for RedisClusterStore {
    async fn join(
        &self,
        node: &ClusterNode,
        ttl: Duration,
        max_size: usize,
    ) -> Result<JoinOutcome, LockError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.join.prepare_invoke();
        invocation
            .key(self.keys.cluster_nodes())
            .key(self.keys.cluster_node(&node.id))
            .arg(&node.id)
            .arg(serde_json::to_string(node)?)
            .arg(millis(ttl))
            .arg(max_size);
        let outcome: String = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        match outcome.as_str() {
            "joined" => Ok(JoinOutcome::Joined),
            "rejoined" => Ok(JoinOutcome::Rejoined),
            _ => Err(LockError::ClusterConflict {
                resource: "cluster".to_string(),
                reason: format!("cluster full ({} nodes)", max_size),
            }),
        }
    }

    async fn heartbeat(&self, node: &ClusterNode, ttl: Duration) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(self.keys.cluster_nodes(), &node.id)
            .ignore()
            .pset_ex(self.keys.cluster_node(&node.id), serde_json::to_string(node)?, millis(ttl))
            .ignore();
        self.run(async move { pipe.query_async(&mut conn).await }).await
    }

    async fn remove_node(&self, node_id: &str) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(self.keys.cluster_nodes(), node_id)
            .ignore()
            .del(self.keys.cluster_node(node_id))
            .ignore();
        self.run(async move { pipe.query_async(&mut conn).await }).await
    }

    async fn member_ids(&self) -> Result<Vec<String>, LockError> {
        let mut conn = self.conn.clone();
        let key = self.keys.cluster_nodes();
        let mut ids: Vec<String> = self.run(async move { conn.smembers(key).await }).await?;
        ids.sort();
        Ok(ids)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<ClusterNode>, LockError> {
        let mut conn = self.conn.clone();
        let key = self.keys.cluster_node(node_id);
        let raw: Option<String> = self.run(async move { conn.get(key).await }).await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn claim_leader(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError> {
        self.set_if_vacant(self.keys.cluster_leader(), node_id, ttl).await
    }

    async fn renew_leader(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError> {
        self.leader_op(node_id, "renew", ttl).await
    }

    async fn leader(&self) -> Result<Option<String>, LockError> {
        let mut conn = self.conn.clone();
        let key = self.keys.cluster_leader();
        self.run(async move { conn.get(key).await }).await
    }

    async fn clear_leader(&self, node_id: &str) -> Result<bool, LockError> {
        self.leader_op(node_id, "clear", Duration::ZERO).await
    }

    async fn begin_election(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError> {
        self.set_if_vacant(self.keys.cluster_election(), node_id, ttl).await
    }

    async fn end_election(&self, node_id: &str) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.leader.prepare_invoke();
        // The leader script's clear mode is a compare-and-delete on any key
        invocation
            .key(self.keys.cluster_election())
            .arg(node_id)
            .arg("clear")
            .arg(0);
        let _: i64 = self
            .run(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn publish(&self, event: &LockEvent) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let channel = self.keys.cluster_channel();
        let payload = serde_json::to_string(event)?;
        let _: i64 = self
            .run(async move { conn.publish(channel, payload).await })
            .await?;
        Ok(())
    }
}
