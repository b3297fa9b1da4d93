// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock lifecycle manager for testing.
//!
//! Keeps each deployment's state in memory instead of running a launcher.
//! Deployments it has never seen report `Stopped`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::model::{Assignment, Deployment};
use crate::status::SlotLifecycleState;

/// One recorded call: operation name and the deployment's assignment.
pub type MockCall = (&'static str, Assignment);

/// Mock lifecycle manager for testing.
#[derive(Clone, Default)]
pub struct MockLifecycleManager {
    states: Arc<Mutex<HashMap<Deployment, SlotLifecycleState>>>,
    node_configs: Arc<Mutex<HashSet<Deployment>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    fail_stop: Arc<AtomicBool>,
    /// Delay applied to every mutating call, to hold a slot lock in tests
    pub delay: Duration,
}

impl MockLifecycleManager {
    /// Create a new mock lifecycle manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose graceful stop always fails.
    pub fn failing_stop() -> Self {
        let mock = Self::default();
        mock.fail_stop.store(true, Ordering::SeqCst);
        mock
    }

    /// Create a mock whose mutating calls take `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Make graceful stops fail (or succeed again).
    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Force the state reported for a deployment.
    pub async fn set_state(&self, deployment: &Deployment, state: SlotLifecycleState) {
        self.states.lock().await.insert(deployment.clone(), state);
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }

    /// Names of the calls made so far, in order.
    pub async fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().await.iter().map(|(op, _)| *op).collect()
    }

    /// Whether node config was written for this deployment.
    pub async fn node_config_written(&self, deployment: &Deployment) -> bool {
        self.node_configs.lock().await.contains(deployment)
    }

    async fn transition(
        &self,
        op: &'static str,
        deployment: &Deployment,
        state: SlotLifecycleState,
    ) -> Result<SlotLifecycleState> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls
            .lock()
            .await
            .push((op, deployment.assignment.clone()));
        self.states.lock().await.insert(deployment.clone(), state);
        Ok(state)
    }
}

#[async_trait]
impl LifecycleManager for MockLifecycleManager {
    fn manager_type(&self) -> &'static str {
        "mock"
    }

    async fn status(&self, deployment: &Deployment) -> SlotLifecycleState {
        self.states
            .lock()
            .await
            .get(deployment)
            .copied()
            .unwrap_or(SlotLifecycleState::Stopped)
    }

    async fn start(&self, deployment: &Deployment) -> Result<SlotLifecycleState> {
        self.transition("start", deployment, SlotLifecycleState::Running)
            .await
    }

    async fn restart(&self, deployment: &Deployment) -> Result<SlotLifecycleState> {
        self.transition("restart", deployment, SlotLifecycleState::Running)
            .await
    }

    async fn stop(&self, deployment: &Deployment) -> Result<SlotLifecycleState> {
        if self.fail_stop.load(Ordering::SeqCst) {
            self.calls
                .lock()
                .await
                .push(("stop", deployment.assignment.clone()));
            return Err(LifecycleError::CommandFailed {
                command: "mock stop".to_string(),
                exit_code: Some(1),
            });
        }
        self.transition("stop", deployment, SlotLifecycleState::Stopped)
            .await
    }

    async fn kill(&self, deployment: &Deployment) -> Result<SlotLifecycleState> {
        self.transition("kill", deployment, SlotLifecycleState::Stopped)
            .await
    }

    async fn update_node_config(&self, deployment: &Deployment) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(("update_node_config", deployment.assignment.clone()));
        self.node_configs.lock().await.insert(deployment.clone());
        Ok(())
    }
}
