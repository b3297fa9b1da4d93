// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle manager backed by the deployment's own launcher script.
//!
//! Every binary archive ships `bin/launcher`, invoked as
//! `bin/launcher <command> --data <data dir>` with the data dir as both the
//! working directory and `HOME`. `status` follows the LSB init-script exit
//! codes: 0 running, 1-3 stopped, anything else unknown.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::*;
use crate::model::Deployment;
use crate::status::SlotLifecycleState;

/// Node config file, relative to the deployment directory.
pub const NODE_CONFIG_PATH: &str = "env/node.config";

/// Runs `bin/launcher` inside the deployment directory.
#[derive(Debug, Clone)]
pub struct LauncherLifecycleManager {
    environment: String,
    timeout: Duration,
    stop_timeout: Duration,
}

impl LauncherLifecycleManager {
    /// Create a launcher manager.
    ///
    /// `timeout` bounds `start` and `status`; `stop_timeout` bounds `stop`,
    /// `restart` and `kill`.
    pub fn new(environment: impl Into<String>, timeout: Duration, stop_timeout: Duration) -> Self {
        Self {
            environment: environment.into(),
            timeout,
            stop_timeout,
        }
    }

    /// Run one launcher command and return its exit code.
    async fn launch(
        &self,
        deployment: &Deployment,
        command: &str,
        timeout: Duration,
    ) -> Result<Option<i32>> {
        let launcher = deployment.deployment_dir.join("bin").join("launcher");
        let label = format!("launcher {command}");
        debug!(
            slot_id = %deployment.slot_id,
            launcher = %launcher.display(),
            command = command,
            "Running launcher"
        );

        // Output is discarded: a daemonized child would keep pipes open.
        let mut child = Command::new(&launcher)
            .arg(command)
            .arg("--data")
            .arg(&deployment.data_dir)
            .current_dir(&deployment.data_dir)
            .env("HOME", &deployment.data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Ok(status?.code()),
            Err(_) => {
                warn!(
                    slot_id = %deployment.slot_id,
                    command = command,
                    timeout_ms = timeout.as_millis() as u64,
                    "Launcher timed out, killing it"
                );
                let _ = child.kill().await;
                Err(LifecycleError::Timeout {
                    command: label,
                    timeout,
                })
            }
        }
    }

    /// Run a command that must exit 0.
    async fn launch_checked(
        &self,
        deployment: &Deployment,
        command: &str,
        timeout: Duration,
    ) -> Result<()> {
        match self.launch(deployment, command, timeout).await? {
            Some(0) => Ok(()),
            exit_code => Err(LifecycleError::CommandFailed {
                command: format!("launcher {command}"),
                exit_code,
            }),
        }
    }
}

/// Map a launcher `status` exit code to a lifecycle state.
pub fn state_from_exit_code(code: Option<i32>) -> SlotLifecycleState {
    match code {
        Some(0) => SlotLifecycleState::Running,
        Some(1..=3) => SlotLifecycleState::Stopped,
        _ => SlotLifecycleState::Unknown,
    }
}

fn node_config(environment: &str, deployment: &Deployment) -> String {
    format!(
        "node.environment={}\nnode.id={}\nnode.location={}\nnode.data-dir={}\n",
        environment,
        deployment.slot_id,
        deployment.location,
        deployment.data_dir.display()
    )
}

async fn write_node_config(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await
}

#[async_trait]
impl LifecycleManager for LauncherLifecycleManager {
    fn manager_type(&self) -> &'static str {
        "launcher"
    }

    async fn status(&self, deployment: &Deployment) -> SlotLifecycleState {
        match self.launch(deployment, "status", self.timeout).await {
            Ok(code) => state_from_exit_code(code),
            Err(e) => {
                warn!(slot_id = %deployment.slot_id, error = %e, "Launcher status failed");
                SlotLifecycleState::Unknown
            }
        }
    }

    async fn start(&self, deployment: &Deployment) -> Result<SlotLifecycleState> {
        self.update_node_config(deployment).await?;
        self.launch_checked(deployment, "start", self.timeout).await?;
        info!(slot_id = %deployment.slot_id, assignment = %deployment.assignment, "Started");
        Ok(SlotLifecycleState::Running)
    }

    async fn restart(&self, deployment: &Deployment) -> Result<SlotLifecycleState> {
        self.update_node_config(deployment).await?;
        self.launch_checked(deployment, "restart", self.stop_timeout)
            .await?;
        info!(slot_id = %deployment.slot_id, assignment = %deployment.assignment, "Restarted");
        Ok(SlotLifecycleState::Running)
    }

    async fn stop(&self, deployment: &Deployment) -> Result<SlotLifecycleState> {
        self.update_node_config(deployment).await?;
        self.launch_checked(deployment, "stop", self.stop_timeout)
            .await?;
        info!(slot_id = %deployment.slot_id, assignment = %deployment.assignment, "Stopped");
        Ok(SlotLifecycleState::Stopped)
    }

    async fn kill(&self, deployment: &Deployment) -> Result<SlotLifecycleState> {
        self.launch_checked(deployment, "kill", self.stop_timeout)
            .await?;
        info!(slot_id = %deployment.slot_id, assignment = %deployment.assignment, "Killed");
        Ok(SlotLifecycleState::Stopped)
    }

    async fn update_node_config(&self, deployment: &Deployment) -> Result<()> {
        let path = deployment.deployment_dir.join(NODE_CONFIG_PATH);
        let contents = node_config(&self.environment, deployment);

        if let Err(source) = write_node_config(&path, &contents).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(LifecycleError::NodeConfig { path, source });
        }
        Ok(())
    }
}
