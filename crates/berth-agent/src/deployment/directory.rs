// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Directory-backed deployment manager.
//!
//! Install order:
//!
//! 1. download and extract the archive into a private `tmp-install*` dir
//! 2. unpack the config bundle over the archive root
//! 3. remove the old manifest and installation
//! 4. write the new manifest (temp file + rename)
//! 5. rename the prepared root to `installation/`
//!
//! Steps 1-2 touch nothing outside the temp dir, so any failure there leaves
//! the current deployment untouched. The temp dir is removed on every path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::*;
use crate::archive::{self, InstallLimits};
use crate::error::{Error, InstallError, Result};
use crate::model::{Deployment, DeploymentManifest, Installation};

/// Deployment manager storing one slot in one directory.
#[derive(Debug)]
pub struct DirectoryDeploymentManager {
    slot_id: Uuid,
    location: String,
    base_dir: PathBuf,
    data_dir: PathBuf,
    limits: InstallLimits,
    deployment: Option<Deployment>,
}

impl DirectoryDeploymentManager {
    /// Open (or initialize) the slot rooted at `base_dir`, recovering any
    /// persisted deployment.
    ///
    /// Fails with [`Error::InconsistentSlot`] if the manifest references a
    /// deployment directory that does not exist.
    pub async fn open(
        base_dir: impl Into<PathBuf>,
        location: impl Into<String>,
        limits: InstallLimits,
    ) -> Result<Self> {
        let base_dir = base_dir.into();
        let location = location.into();
        if !location.starts_with('/') {
            return Err(Error::Validation(format!(
                "location must start with '/': {location}"
            )));
        }

        fs::create_dir_all(&base_dir).await?;
        let data_dir = base_dir.join(DATA_DIR);
        fs::create_dir_all(&data_dir).await?;

        sweep_temp_dirs(&base_dir).await;
        let slot_id = load_or_create_slot_id(&base_dir).await;

        let mut manager = Self {
            slot_id,
            location,
            base_dir,
            data_dir,
            limits,
            deployment: None,
        };
        manager.deployment = manager.recover().await?;

        info!(
            slot_id = %manager.slot_id,
            location = %manager.location,
            assignment = ?manager.deployment.as_ref().map(|d| d.assignment.to_string()),
            "Deployment manager ready"
        );
        Ok(manager)
    }

    /// Slot directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.base_dir.join(MANIFEST_FILE)
    }

    fn installation_dir(&self) -> PathBuf {
        self.base_dir.join(INSTALLATION_DIR)
    }

    async fn recover(&self) -> Result<Option<Deployment>> {
        let manifest_path = self.manifest_path();
        let raw = match fs::read(&manifest_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.remove_orphaned_installation().await;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let manifest: DeploymentManifest = serde_json::from_slice(&raw).map_err(|e| {
            Error::InconsistentSlot(format!(
                "unreadable manifest {}: {e}",
                manifest_path.display()
            ))
        })?;

        let deployment_dir = self.find_deployment_dir().await.ok_or_else(|| {
            Error::InconsistentSlot(format!(
                "manifest {} references missing deployment directory {}",
                manifest_path.display(),
                self.installation_dir().display()
            ))
        })?;

        if manifest.id != self.slot_id {
            warn!(
                slot_id = %self.slot_id,
                manifest_id = %manifest.id,
                "Manifest id differs from slot id, using slot id"
            );
        }

        Ok(Some(Deployment {
            slot_id: self.slot_id,
            location: self.location.clone(),
            deployment_dir,
            data_dir: self.data_dir.clone(),
            assignment: manifest.assignment,
            resources: manifest.resources,
        }))
    }

    async fn find_deployment_dir(&self) -> Option<PathBuf> {
        for name in [INSTALLATION_DIR, LEGACY_DEPLOYMENT_DIR] {
            let dir = self.base_dir.join(name);
            if fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
                return Some(dir);
            }
        }
        None
    }

    /// An installation without a manifest is left over from an interrupted
    /// retire step; it is never live.
    async fn remove_orphaned_installation(&self) {
        let dir = self.installation_dir();
        if fs::metadata(&dir).await.is_ok() {
            warn!(slot_id = %self.slot_id, dir = %dir.display(), "Removing installation without manifest");
            if let Err(e) = fs::remove_dir_all(&dir).await {
                warn!(slot_id = %self.slot_id, error = %e, "Failed to remove orphaned installation");
            }
        }
    }

    /// Steps 1-2: everything that happens inside the temp dir.
    async fn stage(&self, installation: &Installation, work_dir: &Path) -> Result<PathBuf> {
        let binary = &installation.assignment.binary;
        let config = &installation.assignment.config;

        let archive_file = work_dir.join("binary.tar.gz");
        archive::download(
            &installation.binary_file,
            &archive_file,
            self.limits.download_timeout,
        )
        .await?;

        let extract_dir = work_dir.join("extract");
        fs::create_dir(&extract_dir).await?;
        archive::extract_tar_gz(&archive_file, &extract_dir, binary, self.limits.tar_timeout)
            .await?;
        let root = archive::archive_root(&extract_dir, binary).await?;

        let bundle_file = work_dir.join("config.zip");
        archive::download(
            &installation.config_file,
            &bundle_file,
            self.limits.download_timeout,
        )
        .await?;
        archive::unpack_config_bundle(&bundle_file, &root, config).await?;

        debug!(slot_id = %self.slot_id, root = %root.display(), "Staged deployment");
        Ok(root)
    }

    /// Step 3: remove the current deployment. The in-memory reference is
    /// cleared once the manifest is gone.
    async fn retire(&mut self) -> Result<()> {
        let Some(old) = self.deployment.as_ref() else {
            return Ok(());
        };
        let old_dir = old.deployment_dir.clone();

        match fs::remove_file(self.manifest_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.deployment = None;

        match fs::remove_dir_all(&old_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(slot_id = %self.slot_id, dir = %old_dir.display(), "Removed previous deployment");
        Ok(())
    }

    /// Steps 4-5.
    async fn activate(&self, installation: &Installation, root: &Path) -> Result<Deployment> {
        let deployment = Deployment {
            slot_id: self.slot_id,
            location: self.location.clone(),
            deployment_dir: self.installation_dir(),
            data_dir: self.data_dir.clone(),
            assignment: installation.assignment.clone(),
            resources: installation.resources.clone(),
        };

        let manifest_path = self.manifest_path();
        write_manifest(&manifest_path, &DeploymentManifest::from(&deployment))
            .await
            .map_err(|source| InstallError::Persist {
                path: manifest_path.clone(),
                source,
            })?;

        if let Err(source) = fs::rename(root, &deployment.deployment_dir).await {
            // Keep manifest and directory consistent: no manifest without
            // its installation.
            let _ = fs::remove_file(&manifest_path).await;
            return Err(InstallError::Activate {
                path: deployment.deployment_dir.clone(),
                source,
            }
            .into());
        }
        Ok(deployment)
    }
}

#[async_trait]
impl DeploymentManager for DirectoryDeploymentManager {
    fn slot_id(&self) -> Uuid {
        self.slot_id
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn deployment(&self) -> Option<&Deployment> {
        self.deployment.as_ref()
    }

    async fn install(&mut self, installation: &Installation) -> Result<Deployment> {
        installation.validate()?;
        info!(
            slot_id = %self.slot_id,
            assignment = %installation.assignment,
            "Installing"
        );

        let work_dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(&self.base_dir)?;

        let result = match self.stage(installation, work_dir.path()).await {
            Ok(root) => match self.retire().await {
                Ok(()) => self.activate(installation, &root).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let work_path = work_dir.path().to_path_buf();
        if let Err(e) = work_dir.close() {
            warn!(
                slot_id = %self.slot_id,
                dir = %work_path.display(),
                error = %e,
                "Failed to remove temporary install directory"
            );
        }

        let deployment = result?;
        self.deployment = Some(deployment.clone());
        info!(
            slot_id = %self.slot_id,
            assignment = %deployment.assignment,
            dir = %deployment.deployment_dir.display(),
            "Installed"
        );
        Ok(deployment)
    }

    async fn terminate(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.base_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.deployment = None;
        info!(slot_id = %self.slot_id, dir = %self.base_dir.display(), "Terminated slot");
        Ok(())
    }
}

/// Write the manifest next to its final path, then rename over it.
async fn write_manifest(path: &Path, manifest: &DeploymentManifest) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(manifest).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn load_or_create_slot_id(base_dir: &Path) -> Uuid {
    let marker = base_dir.join(SLOT_ID_FILE);
    if let Some(id) = read_id_marker(&marker).await {
        return id;
    }

    let id = Uuid::new_v4();
    if fs::metadata(&marker).await.is_ok() {
        warn!(marker = %marker.display(), new_id = %id, "Slot id marker is corrupt, replacing it");
        if let Err(e) = fs::remove_file(&marker).await {
            warn!(marker = %marker.display(), error = %e, "Failed to delete corrupt slot id marker");
        }
    }
    if let Err(e) = fs::write(&marker, id.to_string()).await {
        warn!(marker = %marker.display(), error = %e, "Failed to persist slot id");
    }
    id
}

/// Remove working directories left behind by an interrupted install.
async fn sweep_temp_dirs(base_dir: &Path) {
    let Ok(mut entries) = fs::read_dir(base_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let path = entry.path();
        debug!(dir = %path.display(), "Removing stale install directory");
        if let Err(e) = fs::remove_dir_all(&path).await {
            warn!(dir = %path.display(), error = %e, "Failed to remove stale install directory");
        }
    }
}
