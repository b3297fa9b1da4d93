// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment module - owns the on-disk installation of one slot.
//!
//! Slot directory layout:
//!
//! ```text
//! <slots dir>/<slot name>/deployment.json   manifest {id, assignment, resources}
//! <slots dir>/<slot name>/slot-id.txt       persisted slot id
//! <slots dir>/<slot name>/installation/     live deployment root
//! <slots dir>/<slot name>/data/             durable data, kept across reinstalls
//! ```

pub mod directory;
pub mod factory;
pub mod mock;

use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Deployment, Installation};

pub use directory::DirectoryDeploymentManager;
pub use factory::{DirectoryDeploymentManagerFactory, slot_base_name};
pub use mock::MockDeploymentManager;

/// Manifest file name.
pub const MANIFEST_FILE: &str = "deployment.json";
/// Slot id marker file name.
pub const SLOT_ID_FILE: &str = "slot-id.txt";
/// Live deployment directory name.
pub const INSTALLATION_DIR: &str = "installation";
/// Deployment directory name used by older agents.
pub const LEGACY_DEPLOYMENT_DIR: &str = "deployment";
/// Durable data directory name.
pub const DATA_DIR: &str = "data";
/// Prefix of temporary working directories inside a slot.
pub const TEMP_PREFIX: &str = "tmp-install";

/// Manages the single deployment of one slot.
///
/// Callers serialize access (the slot lock); implementations do not need
/// internal locking.
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    /// Slot id.
    fn slot_id(&self) -> Uuid;

    /// Slot location.
    fn location(&self) -> &str;

    /// Durable data directory.
    fn data_dir(&self) -> &Path;

    /// Active deployment, if any.
    fn deployment(&self) -> Option<&Deployment>;

    /// Stage, persist and activate a new deployment, replacing the current
    /// one. On failure before activation the current deployment is intact.
    async fn install(&mut self, installation: &Installation) -> Result<Deployment>;

    /// Delete the slot directory and forget the deployment. Irreversible.
    async fn terminate(&mut self) -> Result<()>;
}

/// Creates deployment managers for new slots and reloads existing ones.
#[async_trait]
pub trait DeploymentManagerFactory: Send + Sync {
    /// Managers for every slot persisted on disk.
    async fn load_slots(&self) -> Result<Vec<Box<dyn DeploymentManager>>>;

    /// Allocate a fresh slot directory for `installation`.
    async fn create_deployment_manager(
        &self,
        installation: &Installation,
    ) -> Result<Box<dyn DeploymentManager>>;
}

/// Read a persisted id marker. Returns `None` if missing or unparsable.
pub async fn read_id_marker(path: &Path) -> Option<Uuid> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    Uuid::parse_str(raw.trim()).ok()
}
