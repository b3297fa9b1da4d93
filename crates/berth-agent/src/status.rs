// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status snapshots for slots and the agent.
//!
//! Snapshots are immutable. Every constructor and `change_*` method
//! recomputes the version fingerprint, so a snapshot's version always
//! matches its id, state and assignment.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Assignment;
use crate::version::{agent_version, slot_version};

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotLifecycleState {
    /// No deployment, or the state could not be determined
    Unknown,
    /// Installed but not running
    Stopped,
    /// Running
    Running,
    /// Reported while a restart is in flight; resolves to `Running`
    Restarting,
    /// Deployment removed; the slot accepts no further operations
    Terminated,
}

impl SlotLifecycleState {
    /// Upper-case name used on the wire and in fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotLifecycleState::Unknown => "UNKNOWN",
            SlotLifecycleState::Stopped => "STOPPED",
            SlotLifecycleState::Running => "RUNNING",
            SlotLifecycleState::Restarting => "RESTARTING",
            SlotLifecycleState::Terminated => "TERMINATED",
        }
    }

    /// Whether the deployment is up or coming up.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SlotLifecycleState::Running | SlotLifecycleState::Restarting
        )
    }
}

impl fmt::Display for SlotLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized lifecycle state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lifecycle state: {0}")]
pub struct UnknownStateError(pub String);

impl FromStr for SlotLifecycleState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" | "u" => Ok(SlotLifecycleState::Unknown),
            "stopped" | "s" => Ok(SlotLifecycleState::Stopped),
            "running" | "r" => Ok(SlotLifecycleState::Running),
            "restarting" => Ok(SlotLifecycleState::Restarting),
            "terminated" => Ok(SlotLifecycleState::Terminated),
            _ => Err(UnknownStateError(s.to_string())),
        }
    }
}

/// Snapshot of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    id: Uuid,
    internal_uri: String,
    external_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    location: String,
    state: SlotLifecycleState,
    #[serde(default)]
    assignment: Option<Assignment>,
    #[serde(default)]
    install_path: Option<PathBuf>,
    #[serde(default)]
    resources: BTreeMap<String, u32>,
    version: String,
}

impl SlotStatus {
    /// Build a snapshot and fingerprint it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        internal_uri: impl Into<String>,
        external_uri: impl Into<String>,
        location: impl Into<String>,
        state: SlotLifecycleState,
        assignment: Option<Assignment>,
        install_path: Option<PathBuf>,
        resources: BTreeMap<String, u32>,
    ) -> Self {
        Self {
            version: slot_version(id, state, assignment.as_ref()),
            id,
            internal_uri: internal_uri.into(),
            external_uri: external_uri.into(),
            instance_id: None,
            location: location.into(),
            state,
            assignment,
            install_path,
            resources,
        }
    }

    /// Copy with a different lifecycle state.
    pub fn change_state(&self, state: SlotLifecycleState) -> Self {
        let mut next = self.clone();
        next.state = state;
        next.version = slot_version(next.id, state, next.assignment.as_ref());
        next
    }

    /// Copy with a different assignment (or none).
    pub fn change_assignment(
        &self,
        state: SlotLifecycleState,
        assignment: Option<Assignment>,
        install_path: Option<PathBuf>,
        resources: BTreeMap<String, u32>,
    ) -> Self {
        let mut next = self.clone();
        next.state = state;
        next.version = slot_version(next.id, state, assignment.as_ref());
        next.assignment = assignment;
        next.install_path = install_path;
        next.resources = resources;
        next
    }

    /// Copy stamped with the host instance id. Does not affect the version.
    pub fn change_instance_id(&self, instance_id: Option<String>) -> Self {
        let mut next = self.clone();
        next.instance_id = instance_id;
        next
    }

    /// Slot id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Slot URI for callers on the same machine.
    pub fn internal_uri(&self) -> &str {
        &self.internal_uri
    }

    /// Slot URI for remote callers.
    pub fn external_uri(&self) -> &str {
        &self.external_uri
    }

    /// Host instance id, when known.
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// Slot location.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Lifecycle state.
    pub fn state(&self) -> SlotLifecycleState {
        self.state
    }

    /// Installed assignment.
    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    /// Deployment directory of the installed assignment.
    pub fn install_path(&self) -> Option<&PathBuf> {
        self.install_path.as_ref()
    }

    /// Granted resources.
    pub fn resources(&self) -> &BTreeMap<String, u32> {
        &self.resources
    }

    /// Version fingerprint.
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Lifecycle state of the agent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentLifecycleState {
    /// Serving requests
    Online,
    /// Not reachable
    Offline,
}

impl AgentLifecycleState {
    /// Upper-case name used on the wire and in fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentLifecycleState::Online => "ONLINE",
            AgentLifecycleState::Offline => "OFFLINE",
        }
    }
}

/// Snapshot of the agent and every registered slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    agent_id: Uuid,
    state: AgentLifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    internal_uri: String,
    external_uri: String,
    location: String,
    slots: Vec<SlotStatus>,
    resources: BTreeMap<String, u32>,
    version: String,
}

impl AgentStatus {
    /// Build a snapshot. Slots are ordered by id and stamped with the
    /// instance id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: Uuid,
        state: AgentLifecycleState,
        instance_id: Option<String>,
        internal_uri: impl Into<String>,
        external_uri: impl Into<String>,
        location: impl Into<String>,
        slots: impl IntoIterator<Item = SlotStatus>,
        resources: BTreeMap<String, u32>,
    ) -> Self {
        let mut slots: Vec<SlotStatus> = slots
            .into_iter()
            .map(|slot| slot.change_instance_id(instance_id.clone()))
            .collect();
        slots.sort_by_key(|slot| slot.id());

        Self {
            version: agent_version(agent_id, state, &slots, &resources),
            agent_id,
            state,
            instance_id,
            internal_uri: internal_uri.into(),
            external_uri: external_uri.into(),
            location: location.into(),
            slots,
            resources,
        }
    }

    /// Agent id.
    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    /// Agent state.
    pub fn state(&self) -> AgentLifecycleState {
        self.state
    }

    /// Host instance id, when known.
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// Agent URI for callers on the same machine.
    pub fn internal_uri(&self) -> &str {
        &self.internal_uri
    }

    /// Agent URI for remote callers.
    pub fn external_uri(&self) -> &str {
        &self.external_uri
    }

    /// Agent location.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Slot snapshots ordered by slot id.
    pub fn slots(&self) -> &[SlotStatus] {
        &self.slots
    }

    /// Snapshot of one slot, if registered.
    pub fn slot(&self, id: Uuid) -> Option<&SlotStatus> {
        self.slots.iter().find(|slot| slot.id() == id)
    }

    /// Static resource inventory.
    pub fn resources(&self) -> &BTreeMap<String, u32> {
        &self.resources
    }

    /// Version fingerprint.
    pub fn version(&self) -> &str {
        &self.version
    }
}
