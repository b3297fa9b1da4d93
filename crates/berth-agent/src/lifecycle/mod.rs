// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle module - drives the OS process behind a deployment.
//!
//! The slot engine only talks to [`LifecycleManager`]. The launcher
//! implementation shells out to the `bin/launcher` script shipped inside
//! every binary archive; the mock keeps state in memory for tests.

pub mod launcher;
pub mod mock;
mod traits;

pub use launcher::LauncherLifecycleManager;
pub use mock::MockLifecycleManager;
pub use traits::*;
