// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock deployment manager for testing.
//!
//! Records installs in memory without touching the filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use super::DeploymentManager;
use crate::error::{Error, InstallError, Result};
use crate::model::{Deployment, Installation};

/// Mock deployment manager for testing.
#[derive(Debug)]
pub struct MockDeploymentManager {
    slot_id: Uuid,
    location: String,
    base_dir: PathBuf,
    data_dir: PathBuf,
    deployment: Option<Deployment>,
    fail_install: Arc<AtomicBool>,
    installs: Arc<AtomicUsize>,
    terminated: Arc<AtomicBool>,
}

impl MockDeploymentManager {
    /// Create an empty mock slot at `location`.
    pub fn new(location: impl Into<String>) -> Self {
        let slot_id = Uuid::new_v4();
        let base_dir = PathBuf::from("/mock/slots").join(slot_id.to_string());
        Self {
            slot_id,
            location: location.into(),
            data_dir: base_dir.join("data"),
            base_dir,
            deployment: None,
            fail_install: Arc::new(AtomicBool::new(false)),
            installs: Arc::new(AtomicUsize::new(0)),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle toggling install failure after the mock is boxed.
    pub fn fail_install_handle(&self) -> Arc<AtomicBool> {
        self.fail_install.clone()
    }

    /// Handle counting successful installs.
    pub fn installs_handle(&self) -> Arc<AtomicUsize> {
        self.installs.clone()
    }

    /// Handle reporting whether `terminate` ran.
    pub fn terminated_handle(&self) -> Arc<AtomicBool> {
        self.terminated.clone()
    }
}

#[async_trait]
impl DeploymentManager for MockDeploymentManager {
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
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(Error::Install(InstallError::MalformedArchive {
                coordinate: installation.assignment.binary.clone(),
                entries: 0,
            }));
        }

        let deployment = Deployment {
            slot_id: self.slot_id,
            location: self.location.clone(),
            deployment_dir: self.base_dir.join("installation"),
            data_dir: self.data_dir.clone(),
            assignment: installation.assignment.clone(),
            resources: installation.resources.clone(),
        };
        self.deployment = Some(deployment.clone());
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(deployment)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.deployment = None;
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}
