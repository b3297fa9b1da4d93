// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Value types describing what a slot should run and what it has installed.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Desired software for a slot: a binary coordinate plus a configuration
/// coordinate. Two assignments are equal when both coordinates are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    /// Binary coordinate, e.g. `food.fruit:apple:1.0`
    pub binary: String,
    /// Configuration coordinate, e.g. `@prod:apple:1.0`
    pub config: String,
}

impl Assignment {
    /// Create an assignment from its two coordinates.
    pub fn new(binary: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            config: config.into(),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.binary, self.config)
    }
}

/// Request to install an [`Assignment`]: the coordinates, where to fetch
/// them from, and the resources the deployment is granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    /// What is being installed
    pub assignment: Assignment,
    /// Location of the `.tar.gz` binary archive
    pub binary_file: Url,
    /// Location of the zip configuration bundle
    pub config_file: Url,
    /// Resources granted to the deployment
    #[serde(default)]
    pub resources: BTreeMap<String, u32>,
}

impl Installation {
    /// Reject installations that can never succeed.
    pub fn validate(&self) -> Result<()> {
        if self.assignment.binary.trim().is_empty() {
            return Err(Error::Validation("binary coordinate is empty".to_string()));
        }
        if self.assignment.config.trim().is_empty() {
            return Err(Error::Validation("config coordinate is empty".to_string()));
        }
        for uri in [&self.binary_file, &self.config_file] {
            if !matches!(uri.scheme(), "file" | "http" | "https") {
                return Err(Error::Validation(format!(
                    "unsupported location scheme: {uri}"
                )));
            }
        }
        Ok(())
    }
}

/// An installed assignment. A new install produces a new value; existing
/// values are never modified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Deployment {
    /// Owning slot
    pub slot_id: Uuid,
    /// Stable location string, `<agent location>/<slot dir name>`
    pub location: String,
    /// Live installation root
    pub deployment_dir: PathBuf,
    /// Durable data directory kept across reinstalls
    pub data_dir: PathBuf,
    /// What is installed
    pub assignment: Assignment,
    /// Granted resources
    pub resources: BTreeMap<String, u32>,
}

/// Persisted form of a deployment, stored as `deployment.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    /// Owning slot id
    pub id: Uuid,
    /// What is installed
    pub assignment: Assignment,
    /// Granted resources
    #[serde(default)]
    pub resources: BTreeMap<String, u32>,
}

impl From<&Deployment> for DeploymentManifest {
    fn from(deployment: &Deployment) -> Self {
        Self {
            id: deployment.slot_id,
            assignment: deployment.assignment.clone(),
            resources: deployment.resources.clone(),
        }
    }
}
