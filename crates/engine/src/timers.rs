// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-lock expiry timers
//!
//! Each held lock gets one timer task. Re-arming replaces the previous task
//! and cancelling aborts it. A timer that fires removes its own entry before
//! running its action, so the action may freely cancel or re-arm.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct LockTimers {
    armed: Arc<Mutex<HashMap<String, Armed>>>,
    generation: Arc<AtomicU64>,
}

impl LockTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn armed(&self) -> MutexGuard<'_, HashMap<String, Armed>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `on_fire` after `after` unless cancelled first
    pub fn arm<F>(&self, lock_id: &str, after: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let armed = Arc::clone(&self.armed);
        let id = lock_id.to_string();
        // Held until the entry is in place so an immediate fire finds it
        let mut table = self.armed();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            {
                let mut armed = armed.lock().unwrap_or_else(|e| e.into_inner());
                if armed.get(&id).is_some_and(|a| a.generation == generation) {
                    armed.remove(&id);
                }
            }
            on_fire.await;
        });

        let previous = table.insert(lock_id.to_string(), Armed { generation, handle });
        drop(table);
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Abort the timer for `lock_id`, returning whether one was armed
    pub fn cancel(&self, lock_id: &str) -> bool {
        match self.armed().remove(lock_id) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, lock_id: &str) -> bool {
        self.armed().contains_key(lock_id)
    }

    pub fn len(&self) -> usize {
        self.armed().len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed().is_empty()
    }

    /// Abort every timer, returning how many were armed
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Armed> = self.armed().drain().map(|(_, a)| a).collect();
        for armed in &drained {
            armed.handle.abort();
        }
        drained.len()
    }
}

#[cfg(test)]
#[path = "timers_tests.rs"]
mod tests;
