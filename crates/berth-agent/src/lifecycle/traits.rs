// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle manager trait definitions.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Deployment;
use crate::status::SlotLifecycleState;

/// Errors from lifecycle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// The lifecycle command ran but reported failure.
    #[error("{command} failed with exit code {exit_code:?}")]
    CommandFailed {
        /// Command that failed, e.g. `launcher stop`.
        command: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// The lifecycle command did not finish in time and was killed.
    #[error("{command} timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Command that timed out.
        command: String,
        /// Configured bound.
        timeout: Duration,
    },

    /// The node config file could not be written.
    #[error("Unable to write node config {}: {source}", path.display())]
    NodeConfig {
        /// Target file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Starts, stops and inspects the process behind a [`Deployment`].
///
/// Every call is bounded; implementations convert an overrun into an error
/// (or `Unknown` for [`status`](LifecycleManager::status)) rather than
/// blocking the slot lock indefinitely.
#[async_trait]
pub trait LifecycleManager: Send + Sync {
    /// Short identifier for logs.
    fn manager_type(&self) -> &'static str;

    /// Observed state. Failures are reported as `Unknown`.
    async fn status(&self, deployment: &Deployment) -> SlotLifecycleState;

    /// Start the deployment.
    async fn start(&self, deployment: &Deployment) -> Result<SlotLifecycleState>;

    /// Restart the deployment.
    async fn restart(&self, deployment: &Deployment) -> Result<SlotLifecycleState>;

    /// Stop the deployment gracefully.
    async fn stop(&self, deployment: &Deployment) -> Result<SlotLifecycleState>;

    /// Stop the deployment forcibly.
    async fn kill(&self, deployment: &Deployment) -> Result<SlotLifecycleState>;

    /// Write the node identity file the launched process reads.
    async fn update_node_config(&self, deployment: &Deployment) -> Result<()>;
}
