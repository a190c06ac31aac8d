// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durable single-node lock store
//!
//! `LegacyLockStore` keeps legacy locks in a `LockTable`. When opened on a
//! path every change is first appended to a `Wal`, and the table is rebuilt
//! by replaying it.

pub mod state;
pub mod store;
pub mod wal;

pub use state::{LockTable, StoreOp};
pub use store::LegacyLockStore;
pub use wal::{Wal, WalError};
