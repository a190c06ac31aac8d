// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Warden daemon library
//!
//! Assembles the lock engine from configuration and owns its lifecycle.
//! The `wardend` binary is a thin shell over this crate.

mod args;
mod lifecycle;

pub use args::{Args, Mode, UsageError};
pub use lifecycle::{load_config, startup, Daemon, LifecycleError, Paths};
