// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent - the registry of slots on this machine.
//!
//! At construction the agent reloads every slot persisted under the slots
//! directory and reads its static resource inventory. The registry is a
//! concurrent map; per-slot serialization is left to each [`Slot`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::deployment::{
    DeploymentManager, DeploymentManagerFactory, DirectoryDeploymentManagerFactory, read_id_marker,
};
use crate::error::{Error, Result};
use crate::lifecycle::{LauncherLifecycleManager, LifecycleManager};
use crate::model::Installation;
use crate::slot::{Slot, SlotOperation};
use crate::status::{AgentLifecycleState, AgentStatus, SlotLifecycleState, SlotStatus};

/// Agent id marker inside the slots directory.
pub const AGENT_ID_FILE: &str = "agent-id.txt";

/// Registry of slots hosted by this agent.
pub struct Agent {
    agent_id: Uuid,
    location: String,
    instance_id: Option<String>,
    internal_uri: String,
    external_uri: String,
    max_lock_wait: Duration,
    factory: Box<dyn DeploymentManagerFactory>,
    lifecycle: Arc<dyn LifecycleManager>,
    slots: DashMap<Uuid, Arc<Slot>>,
    resources: BTreeMap<String, u32>,
}

impl Agent {
    /// Agent backed by slot directories and the launcher lifecycle manager.
    pub async fn from_config(config: &AgentConfig) -> Result<Self> {
        let factory = DirectoryDeploymentManagerFactory::new(
            &config.slots_dir,
            &config.location,
            config.install_limits(),
        );
        let lifecycle = LauncherLifecycleManager::new(
            config.environment.clone(),
            config.launcher_timeout,
            config.launcher_stop_timeout,
        );
        Self::new(config, Box::new(factory), Arc::new(lifecycle)).await
    }

    /// Agent with explicit collaborators. Reloads persisted slots.
    pub async fn new(
        config: &AgentConfig,
        factory: Box<dyn DeploymentManagerFactory>,
        lifecycle: Arc<dyn LifecycleManager>,
    ) -> Result<Self> {
        if !config.location.starts_with('/') {
            return Err(Error::Validation(format!(
                "agent location must start with '/': {}",
                config.location
            )));
        }

        let agent_id = match config.agent_id {
            Some(id) => id,
            None => load_or_create_agent_id(&config.slots_dir).await?,
        };
        let resources = read_resources(&config.resources_file).await;

        let agent = Self {
            agent_id,
            location: config.location.clone(),
            instance_id: config.instance_id.clone(),
            internal_uri: config.internal_uri.trim_end_matches('/').to_string(),
            external_uri: config.external_uri.trim_end_matches('/').to_string(),
            max_lock_wait: config.max_lock_wait,
            factory,
            lifecycle,
            slots: DashMap::new(),
            resources,
        };

        for manager in agent.factory.load_slots().await? {
            let slot = agent.build_slot(manager).await;
            agent.slots.insert(slot.id(), slot);
        }

        info!(
            agent_id = %agent.agent_id,
            location = %agent.location,
            slots = agent.slots.len(),
            lifecycle = agent.lifecycle.manager_type(),
            "Agent ready"
        );
        Ok(agent)
    }

    async fn build_slot(&self, manager: Box<dyn DeploymentManager>) -> Arc<Slot> {
        Arc::new(
            Slot::new(
                manager,
                self.lifecycle.clone(),
                &self.internal_uri,
                &self.external_uri,
                self.max_lock_wait,
            )
            .await,
        )
    }

    /// Agent id.
    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    /// Agent location.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Agent base URI for callers on the same machine.
    pub fn internal_uri(&self) -> &str {
        &self.internal_uri
    }

    /// Agent base URI for remote callers.
    pub fn external_uri(&self) -> &str {
        &self.external_uri
    }

    /// Static resource inventory.
    pub fn resources(&self) -> &BTreeMap<String, u32> {
        &self.resources
    }

    /// Registered slot, if any.
    pub fn get_slot(&self, id: Uuid) -> Option<Arc<Slot>> {
        self.slots.get(&id).map(|entry| entry.value().clone())
    }

    /// Every registered slot, ordered by id.
    pub fn all_slots(&self) -> Vec<Arc<Slot>> {
        let mut slots: Vec<Arc<Slot>> = self.slots.iter().map(|e| e.value().clone()).collect();
        slots.sort_by_key(|slot| slot.id());
        slots
    }

    /// Install `installation` into a newly allocated slot.
    ///
    /// On failure the allocated slot directory is removed and nothing is
    /// registered. Dropping the returned future midway can leave an
    /// unregistered slot directory behind; callers that may be cancelled run
    /// it on its own task, as the HTTP layer does.
    pub async fn install(&self, installation: &Installation) -> Result<SlotStatus> {
        installation.validate()?;
        let mut manager = self.factory.create_deployment_manager(installation).await?;
        let slot_id = manager.slot_id();

        let installed = match manager.install(installation).await {
            Ok(deployment) => self
                .lifecycle
                .update_node_config(&deployment)
                .await
                .map_err(Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = installed {
            warn!(
                slot_id = %slot_id,
                location = %manager.location(),
                error = %e,
                "Install into new slot failed"
            );
            if let Err(cleanup) = manager.terminate().await {
                warn!(slot_id = %slot_id, error = %cleanup, "Failed to remove slot directory");
            }
            return Err(e);
        }

        let slot = self.build_slot(manager).await;
        let status = self.stamp(slot.status().await);
        self.slots.insert(slot_id, slot);
        info!(
            slot_id = %slot_id,
            location = %status.location(),
            state = %status.state(),
            "Slot installed"
        );
        Ok(status)
    }

    /// Terminate a slot. It is unregistered only once its status reports
    /// `Terminated`; a refused terminate leaves it in place.
    ///
    /// `expected_version` is checked under the slot lock, see [`Slot::apply`].
    pub async fn terminate_slot(
        &self,
        id: Uuid,
        expected_version: Option<&str>,
    ) -> Result<SlotStatus> {
        let slot = self.get_slot(id).ok_or(Error::SlotNotFound(id))?;
        let status = slot
            .apply(SlotOperation::Terminate, expected_version)
            .await?;
        let status = self.stamp(status);
        if status.state() == SlotLifecycleState::Terminated {
            self.slots.remove(&id);
            debug!(slot_id = %id, "Slot removed from registry");
        }
        Ok(status)
    }

    /// Status of one slot.
    pub async fn slot_status(&self, id: Uuid) -> Result<SlotStatus> {
        let slot = self.get_slot(id).ok_or(Error::SlotNotFound(id))?;
        Ok(self.stamp(slot.status().await))
    }

    /// Stamp a slot snapshot with this host's instance id.
    pub fn stamp(&self, status: SlotStatus) -> SlotStatus {
        status.change_instance_id(self.instance_id.clone())
    }

    /// Snapshot of the agent and all of its slots. Contended slots report
    /// their cached status.
    pub async fn agent_status(&self) -> AgentStatus {
        let mut statuses = Vec::with_capacity(self.slots.len());
        for slot in self.all_slots() {
            statuses.push(slot.status().await);
        }
        AgentStatus::new(
            self.agent_id,
            AgentLifecycleState::Online,
            self.instance_id.clone(),
            self.internal_uri.clone(),
            self.external_uri.clone(),
            self.location.clone(),
            statuses,
            self.resources.clone(),
        )
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("agent_id", &self.agent_id)
            .field("location", &self.location)
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

async fn load_or_create_agent_id(slots_dir: &Path) -> Result<Uuid> {
    fs::create_dir_all(slots_dir).await?;
    let marker = slots_dir.join(AGENT_ID_FILE);
    if let Some(id) = read_id_marker(&marker).await {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    if fs::metadata(&marker).await.is_ok() {
        warn!(marker = %marker.display(), new_id = %id, "Agent id marker is corrupt, replacing it");
        let _ = fs::remove_file(&marker).await;
    }
    if let Err(e) = fs::write(&marker, id.to_string()).await {
        warn!(marker = %marker.display(), error = %e, "Failed to persist agent id");
    }
    Ok(id)
}

/// Read a `key=int` properties file. Any read or parse failure yields an
/// empty inventory.
pub async fn read_resources(path: &Path) -> BTreeMap<String, u32> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Resource inventory unavailable, using empty inventory");
            return BTreeMap::new();
        }
    };
    match parse_resources(&raw) {
        Ok(resources) => resources,
        Err(line) => {
            warn!(path = %path.display(), line = %line, "Invalid resource entry, using empty inventory");
            BTreeMap::new()
        }
    }
}

/// Parse properties text; the error is the offending line.
fn parse_resources(raw: &str) -> std::result::Result<BTreeMap<String, u32>, String> {
    let mut resources = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .or_else(|| line.split_once(':'))
            .ok_or_else(|| line.to_string())?;
        let amount: u32 = value.trim().parse().map_err(|_| line.to_string())?;
        resources.insert(key.trim().to_string(), amount);
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resources() {
        let parsed = parse_resources("# inventory\ncpu=8\n\nmemory = 16384\n! legacy\ndisk: 100\n")
            .unwrap();
        assert_eq!(parsed.get("cpu"), Some(&8));
        assert_eq!(parsed.get("memory"), Some(&16384));
        assert_eq!(parsed.get("disk"), Some(&100));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_parse_resources_rejects_non_integer() {
        assert_eq!(
            parse_resources("cpu=8\nmemory=lots\n").unwrap_err(),
            "memory=lots"
        );
        assert!(parse_resources("cpu\n").is_err());
    }

    #[tokio::test]
    async fn test_read_resources_failure_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(read_resources(&dir.path().join("missing.properties")).await.is_empty());

        let bad = dir.path().join("bad.properties");
        std::fs::write(&bad, "cpu=-1\n").unwrap();
        assert!(read_resources(&bad).await.is_empty());
    }

    #[tokio::test]
    async fn test_agent_id_is_persisted() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = load_or_create_agent_id(dir.path()).await.unwrap();
        let second = load_or_create_agent_id(dir.path()).await.unwrap();
        assert_eq!(first, second);

        std::fs::write(dir.path().join(AGENT_ID_FILE), "garbage").unwrap();
        let third = load_or_create_agent_id(dir.path()).await.unwrap();
        assert_ne!(third, first);
        assert_eq!(load_or_create_agent_id(dir.path()).await.unwrap(), third);
    }
}
