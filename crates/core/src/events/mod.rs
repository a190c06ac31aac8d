// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events system for loose coupling and observability
//!
//! This module provides:
//! - `LockEvent` - Lock, deadlock and cluster lifecycle events
//! - `EventBus` - Route events to bounded subscriber mailboxes
//! - `EventPattern` - Pattern matching for event subscriptions

mod bus;
mod event;
mod subscription;

pub use bus::{EventBus, EventReceiver, EventSender, DEFAULT_MAILBOX};
pub use event::{LockEvent, LockInfo};
pub use subscription::{EventPattern, SubscriberId, Subscription};
