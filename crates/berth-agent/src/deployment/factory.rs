// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Slot directory allocation and discovery.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::*;
use crate::archive::InstallLimits;
use crate::error::{Error, Result};
use crate::model::Installation;

/// Upper bound on `<base>`, `<base>1`, ... probes for a free slot name.
pub const MAX_SLOT_NAME_ATTEMPTS: usize = 10_000;

/// Directory name prefix derived from a configuration coordinate.
///
/// A leading `@` is dropped, Maven-style coordinates reduce to their
/// artifact (`a:v` → `a`, `g:a:v` → `a`), and every character outside
/// `[A-Za-z0-9_.-]` becomes `_`.
pub fn slot_base_name(config: &str) -> String {
    let config = config.trim().trim_start_matches('@');
    let parts: Vec<&str> = config.split(':').collect();
    let artifact = match parts.as_slice() {
        [artifact, _] => *artifact,
        [_, artifact, _, ..] => *artifact,
        _ => config,
    };

    let name: String = artifact
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // "." and ".." are not usable directory names.
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "slot".to_string()
    } else {
        name
    }
}

/// Factory for [`DirectoryDeploymentManager`]s under one slots directory.
pub struct DirectoryDeploymentManagerFactory {
    slots_dir: PathBuf,
    location: String,
    limits: InstallLimits,
    allocation: Mutex<()>,
}

impl DirectoryDeploymentManagerFactory {
    /// Create a factory. `location` is the agent location; each slot gets
    /// `<location>/<slot dir name>`.
    pub fn new(slots_dir: impl Into<PathBuf>, location: &str, limits: InstallLimits) -> Self {
        Self {
            slots_dir: slots_dir.into(),
            location: location.trim_end_matches('/').to_string(),
            limits,
            allocation: Mutex::new(()),
        }
    }

    /// Slots root directory.
    pub fn slots_dir(&self) -> &Path {
        &self.slots_dir
    }

    fn slot_location(&self, name: &str) -> String {
        format!("{}/{}", self.location, name)
    }

    /// Create the first free `<base>`, `<base>1`, ... directory.
    async fn allocate(&self, base: &str) -> Result<(String, PathBuf)> {
        let _guard = self.allocation.lock().await;
        fs::create_dir_all(&self.slots_dir).await?;

        for attempt in 0..MAX_SLOT_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                base.to_string()
            } else {
                format!("{base}{attempt}")
            };
            let path = self.slots_dir.join(&name);
            match fs::create_dir(&path).await {
                Ok(()) => {
                    debug!(slot_dir = %path.display(), "Allocated slot directory");
                    return Ok((name, path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::IllegalState(format!(
            "no free slot directory for '{base}' after {MAX_SLOT_NAME_ATTEMPTS} attempts"
        )))
    }
}

#[async_trait]
impl DeploymentManagerFactory for DirectoryDeploymentManagerFactory {
    async fn load_slots(&self) -> Result<Vec<Box<dyn DeploymentManager>>> {
        let mut entries = match fs::read_dir(&self.slots_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if read_id_marker(&entry.path().join(SLOT_ID_FILE)).await.is_none() {
                debug!(slot_dir = %entry.path().display(), "Skipping directory without slot id");
                continue;
            }
            names.push(name);
        }
        names.sort();

        let mut managers: Vec<Box<dyn DeploymentManager>> = Vec::with_capacity(names.len());
        for name in names {
            let manager = DirectoryDeploymentManager::open(
                self.slots_dir.join(&name),
                self.slot_location(&name),
                self.limits,
            )
            .await?;
            managers.push(Box::new(manager));
        }
        info!(count = managers.len(), slots_dir = %self.slots_dir.display(), "Loaded slots");
        Ok(managers)
    }

    async fn create_deployment_manager(
        &self,
        installation: &Installation,
    ) -> Result<Box<dyn DeploymentManager>> {
        installation.validate()?;
        let base = slot_base_name(&installation.assignment.config);
        let (name, path) = self.allocate(&base).await?;

        match DirectoryDeploymentManager::open(&path, self.slot_location(&name), self.limits).await
        {
            Ok(manager) => Ok(Box::new(manager)),
            Err(e) => {
                let _ = fs::remove_dir_all(&path).await;
                Err(e)
            }
        }
    }
}
