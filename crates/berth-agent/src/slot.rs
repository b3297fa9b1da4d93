// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Slot state machine.
//!
//! A [`Slot`] composes one [`DeploymentManager`] with a shared
//! [`LifecycleManager`] behind a [`SlotLock`]. Every operation runs with the
//! lock held, so two operations on one slot never interleave.
//!
//! ```text
//!              assign / start / stop / restart / kill
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!   UNKNOWN ─┴─▶ STOPPED ◀──────▶ RUNNING ◀── RESTARTING
//!                   │
//!                   │ terminate (only when STOPPED or empty)
//!                   ▼
//!              TERMINATED   (absorbing: every other operation fails)
//! ```
//!
//! `status()` never fails: if the lock cannot be acquired in time it returns
//! the last cached snapshot. Mutations propagate the lock timeout, and an
//! expected version passed to [`Slot::apply`] is checked against a live
//! observation under the lock, never against the cached snapshot.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::deployment::DeploymentManager;
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleManager;
use crate::model::{Deployment, Installation};
use crate::slot_lock::{SlotLock, SlotLockGuard};
use crate::status::{SlotLifecycleState, SlotStatus};
use crate::version::{SLOT_VERSION_HEADER, check_version};

/// A mutating operation on a slot.
#[derive(Debug, Clone, Copy)]
pub enum SlotOperation<'a> {
    /// Replace the deployment
    Assign(&'a Installation),
    /// Start the deployment
    Start,
    /// Gracefully stop the deployment
    Stop,
    /// Restart the deployment
    Restart,
    /// Forcibly stop the deployment
    Kill,
    /// Remove the deployment and retire the slot
    Terminate,
}

impl SlotOperation<'_> {
    /// Name recorded as the lock holder.
    pub fn name(&self) -> &'static str {
        match self {
            SlotOperation::Assign(_) => "assign",
            SlotOperation::Start => "start",
            SlotOperation::Stop => "stop",
            SlotOperation::Restart => "restart",
            SlotOperation::Kill => "kill",
            SlotOperation::Terminate => "terminate",
        }
    }
}

/// State guarded by the slot lock.
struct SlotState {
    manager: Box<dyn DeploymentManager>,
    terminated: bool,
}

/// One addressable slot.
pub struct Slot {
    id: Uuid,
    location: String,
    internal_uri: String,
    external_uri: String,
    lifecycle: Arc<dyn LifecycleManager>,
    state: SlotLock<SlotState>,
    last_status: RwLock<SlotStatus>,
}

/// URI of a slot under an agent base URI.
pub fn slot_uri(base: &str, id: Uuid) -> String {
    format!("{}/v1/agent/slot/{}", base.trim_end_matches('/'), id)
}

impl Slot {
    /// Wrap a deployment manager. The initial status is observed from the
    /// lifecycle manager.
    pub async fn new(
        manager: Box<dyn DeploymentManager>,
        lifecycle: Arc<dyn LifecycleManager>,
        internal_base_uri: &str,
        external_base_uri: &str,
        max_lock_wait: Duration,
    ) -> Self {
        let id = manager.slot_id();
        let location = manager.location().to_string();
        let internal_uri = slot_uri(internal_base_uri, id);
        let external_uri = slot_uri(external_base_uri, id);

        let initial_state = match manager.deployment() {
            Some(deployment) => lifecycle.status(deployment).await,
            None => SlotLifecycleState::Unknown,
        };
        let initial = SlotStatus::new(
            id,
            internal_uri.clone(),
            external_uri.clone(),
            location.clone(),
            initial_state,
            manager.deployment().map(|d| d.assignment.clone()),
            manager.deployment().map(|d| d.deployment_dir.clone()),
            manager
                .deployment()
                .map(|d| d.resources.clone())
                .unwrap_or_default(),
        );

        Self {
            id,
            location,
            internal_uri,
            external_uri,
            lifecycle,
            state: SlotLock::new(
                id,
                max_lock_wait,
                SlotState {
                    manager,
                    terminated: false,
                },
            ),
            last_status: RwLock::new(initial),
        }
    }

    /// Slot id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Slot location.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Slot URI for callers on the same machine.
    pub fn internal_uri(&self) -> &str {
        &self.internal_uri
    }

    /// Slot URI for remote callers.
    pub fn external_uri(&self) -> &str {
        &self.external_uri
    }

    /// Most recent snapshot, without touching the lock.
    pub fn last_status(&self) -> SlotStatus {
        self.last_status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Active deployment.
    pub async fn deployment(&self) -> Result<Option<Deployment>> {
        let guard = self.state.lock("deployment").await?;
        Ok(guard.manager.deployment().cloned())
    }

    /// Current status. Returns the cached snapshot if the lock is contended.
    pub async fn status(&self) -> SlotStatus {
        let guard = match self.state.lock("status").await {
            Ok(guard) => guard,
            Err(e) => {
                debug!(slot_id = %self.id, error = %e, "Returning cached status");
                return self.last_status();
            }
        };
        self.refresh(&guard).await
    }

    /// Replace the deployment with `installation`, keeping it running if the
    /// previous one was running.
    pub async fn assign(&self, installation: &Installation) -> Result<SlotStatus> {
        self.apply(SlotOperation::Assign(installation), None).await
    }

    /// Start the deployment. No-op if it is already running.
    pub async fn start(&self) -> Result<SlotStatus> {
        self.apply(SlotOperation::Start, None).await
    }

    /// Stop the deployment. No-op if it is already stopped.
    pub async fn stop(&self) -> Result<SlotStatus> {
        self.apply(SlotOperation::Stop, None).await
    }

    /// Restart the deployment. Reports `Restarting` while in flight.
    pub async fn restart(&self) -> Result<SlotStatus> {
        self.apply(SlotOperation::Restart, None).await
    }

    /// Forcibly stop the deployment. No-op if it is already stopped.
    pub async fn kill(&self) -> Result<SlotStatus> {
        self.apply(SlotOperation::Kill, None).await
    }

    /// Remove the deployment and retire the slot.
    ///
    /// Refused (current status returned unchanged) unless the deployment is
    /// stopped or absent. Callers check the returned state.
    pub async fn terminate(&self) -> Result<SlotStatus> {
        self.apply(SlotOperation::Terminate, None).await
    }

    /// Run `operation` under the slot lock.
    ///
    /// When `expected_version` is given it is compared with a fresh
    /// observation taken after the lock is acquired, so a mutation that
    /// completed while this call waited for the lock causes a
    /// [`Error::VersionConflict`] and nothing is changed.
    pub async fn apply(
        &self,
        operation: SlotOperation<'_>,
        expected_version: Option<&str>,
    ) -> Result<SlotStatus> {
        if let SlotOperation::Assign(installation) = operation {
            installation.validate()?;
        }
        let mut guard = self.state.lock(operation.name()).await?;

        if let Some(expected) = expected_version {
            let current = self.refresh(&guard).await;
            check_version(SLOT_VERSION_HEADER, Some(expected), current.version())?;
        }

        match operation {
            SlotOperation::Assign(installation) => {
                self.assign_locked(&mut guard, installation).await
            }
            SlotOperation::Start => self.start_locked(&guard).await,
            SlotOperation::Stop => self.stop_locked(&guard).await,
            SlotOperation::Restart => self.restart_locked(&guard).await,
            SlotOperation::Kill => self.kill_locked(&guard).await,
            SlotOperation::Terminate => self.terminate_locked(&mut guard).await,
        }
    }

    async fn assign_locked(
        &self,
        guard: &mut SlotLockGuard<'_, SlotState>,
        installation: &Installation,
    ) -> Result<SlotStatus> {
        self.check_not_terminated(guard)?;

        let should_start = match guard.manager.deployment() {
            Some(old) => {
                let state = self.lifecycle.status(old).await;
                if state != SlotLifecycleState::Stopped {
                    self.stop_or_kill(old).await?;
                }
                state.is_active()
            }
            None => false,
        };

        info!(
            slot_id = %self.id,
            assignment = %installation.assignment,
            restart = should_start,
            "Assigning"
        );
        let deployment = match guard.manager.install(installation).await {
            Ok(deployment) => deployment,
            Err(e) => {
                warn!(slot_id = %self.id, error = %e, "Install failed");
                self.refresh(guard).await;
                return Err(e);
            }
        };
        self.lifecycle.update_node_config(&deployment).await?;

        let state = if should_start {
            self.lifecycle.start(&deployment).await?
        } else {
            SlotLifecycleState::Stopped
        };
        Ok(self.cache(Some(&deployment), state))
    }

    async fn start_locked(&self, guard: &SlotLockGuard<'_, SlotState>) -> Result<SlotStatus> {
        let deployment = self.active_deployment(guard)?;
        let state = match self.lifecycle.status(deployment).await {
            SlotLifecycleState::Running => SlotLifecycleState::Running,
            _ => self.lifecycle.start(deployment).await?,
        };
        Ok(self.cache(Some(deployment), state))
    }

    async fn stop_locked(&self, guard: &SlotLockGuard<'_, SlotState>) -> Result<SlotStatus> {
        let deployment = self.active_deployment(guard)?;
        let state = match self.lifecycle.status(deployment).await {
            SlotLifecycleState::Stopped => SlotLifecycleState::Stopped,
            _ => self.lifecycle.stop(deployment).await?,
        };
        Ok(self.cache(Some(deployment), state))
    }

    async fn restart_locked(&self, guard: &SlotLockGuard<'_, SlotState>) -> Result<SlotStatus> {
        let deployment = self.active_deployment(guard)?;
        self.cache(Some(deployment), SlotLifecycleState::Restarting);
        let state = match self.lifecycle.restart(deployment).await {
            Ok(state) => state,
            Err(e) => {
                self.refresh(guard).await;
                return Err(e.into());
            }
        };
        Ok(self.cache(Some(deployment), state))
    }

    async fn kill_locked(&self, guard: &SlotLockGuard<'_, SlotState>) -> Result<SlotStatus> {
        let deployment = self.active_deployment(guard)?;
        let state = match self.lifecycle.status(deployment).await {
            SlotLifecycleState::Stopped => SlotLifecycleState::Stopped,
            _ => self.lifecycle.kill(deployment).await?,
        };
        Ok(self.cache(Some(deployment), state))
    }

    async fn terminate_locked(
        &self,
        guard: &mut SlotLockGuard<'_, SlotState>,
    ) -> Result<SlotStatus> {
        if guard.terminated {
            return Ok(self.cache(None, SlotLifecycleState::Terminated));
        }

        if let Some(deployment) = guard.manager.deployment() {
            let state = self.lifecycle.status(deployment).await;
            if state != SlotLifecycleState::Stopped {
                info!(slot_id = %self.id, state = %state, "Refusing to terminate slot that is not stopped");
                return Ok(self.cache(Some(deployment), state));
            }
        }

        guard.manager.terminate().await?;
        guard.terminated = true;
        info!(slot_id = %self.id, location = %self.location, "Slot terminated");
        Ok(self.cache(None, SlotLifecycleState::Terminated))
    }

    // ==========================================================================
    // Helpers (all called with the lock held)
    // ==========================================================================

    fn check_not_terminated(&self, guard: &SlotLockGuard<'_, SlotState>) -> Result<()> {
        if guard.terminated {
            return Err(Error::IllegalState(format!(
                "slot {} has been terminated",
                self.id
            )));
        }
        Ok(())
    }

    fn active_deployment<'g>(
        &self,
        guard: &'g SlotLockGuard<'_, SlotState>,
    ) -> Result<&'g Deployment> {
        self.check_not_terminated(guard)?;
        guard.manager.deployment().ok_or_else(|| {
            Error::IllegalState(format!("slot {} has no active deployment", self.id))
        })
    }

    async fn stop_or_kill(&self, deployment: &Deployment) -> Result<()> {
        if let Err(e) = self.lifecycle.stop(deployment).await {
            warn!(
                slot_id = %self.id,
                error = %e,
                "Graceful stop failed, killing deployment"
            );
            self.lifecycle.kill(deployment).await?;
        }
        Ok(())
    }

    async fn refresh(&self, guard: &SlotLockGuard<'_, SlotState>) -> SlotStatus {
        if guard.terminated {
            return self.cache(None, SlotLifecycleState::Terminated);
        }
        match guard.manager.deployment() {
            Some(deployment) => {
                let state = self.lifecycle.status(deployment).await;
                self.cache(Some(deployment), state)
            }
            None => self.cache(None, SlotLifecycleState::Unknown),
        }
    }

    fn cache(&self, deployment: Option<&Deployment>, state: SlotLifecycleState) -> SlotStatus {
        let status = self.last_status().change_assignment(
            state,
            deployment.map(|d| d.assignment.clone()),
            deployment.map(|d| d.deployment_dir.clone()),
            deployment.map(|d| d.resources.clone()).unwrap_or_default(),
        );
        *self.last_status.write().unwrap_or_else(|e| e.into_inner()) = status.clone();
        status
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("lifecycle", &self.lifecycle.manager_type())
            .finish_non_exhaustive()
    }
}
