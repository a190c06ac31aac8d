// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus for routing events to subscribers
//!
//! Every subscriber owns a bounded mailbox. Publishing never blocks: a full
//! mailbox drops the event and counts the drop, and closed mailboxes are
//! pruned on the next publish.

use super::event::LockEvent;
use super::subscription::{EventPattern, SubscriberId, Subscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Sender for event delivery
pub type EventSender = mpsc::Sender<LockEvent>;
/// Receiver for event delivery
pub type EventReceiver = mpsc::Receiver<LockEvent>;

/// Default mailbox capacity per subscriber
pub const DEFAULT_MAILBOX: usize = 256;

/// The event bus routes events to matching subscribers
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<SubscriberId, (Subscription, EventSender)>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to events matching the subscription's patterns
    pub fn subscribe(&self, subscription: Subscription) -> EventReceiver {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = subscription.id.clone();

        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.insert(id, (subscription, tx));

        rx
    }

    /// Subscribe with generated id to the given patterns; an empty list means all events
    pub fn subscribe_patterns(&self, patterns: &[&str]) -> EventReceiver {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let patterns = if patterns.is_empty() {
            vec![EventPattern::new("**")]
        } else {
            patterns.iter().map(|p| EventPattern::new(p)).collect()
        };
        self.subscribe(Subscription::new(format!("sub-{}", n), patterns, ""))
    }

    /// Unsubscribe from events
    pub fn unsubscribe(&self, id: &SubscriberId) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.remove(id);
    }

    /// Publish an event to all matching subscribers
    pub fn publish(&self, event: LockEvent) {
        let event_name = event.name();
        let mut closed = Vec::new();

        {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for (id, (subscription, tx)) in subs.iter() {
                if !subscription.matches(&event_name) {
                    continue;
                }
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(subscriber = %id.0, event = %event_name, "mailbox full, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id.clone()),
                }
            }
        }

        if !closed.is_empty() {
            let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            for id in closed {
                subs.remove(&id);
            }
        }
    }

    /// Get count of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Events dropped because a mailbox was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
