// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for berth-agent integration tests.
//!
//! Provides artifact fixtures (binary archives and config bundles on disk)
//! and a TestContext wiring an agent over a temporary slots directory.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use url::Url;

use berth_agent::agent::Agent;
use berth_agent::archive::InstallLimits;
use berth_agent::config::AgentConfig;
use berth_agent::deployment::DirectoryDeploymentManagerFactory;
use berth_agent::lifecycle::MockLifecycleManager;
use berth_agent::model::{Assignment, Installation};

/// Write a `.tar.gz` whose entries are `(path, contents)` pairs.
pub fn write_tar_gz(path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Write a zip bundle whose entries are `(path, contents)` pairs.
pub fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Directory of artifacts served over `file://`.
pub struct Artifacts {
    pub dir: PathBuf,
}

impl Artifacts {
    pub fn new(root: &Path) -> Self {
        let dir = root.join("artifacts");
        std::fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    /// A well-formed installation of `name` at `version`. The archive
    /// unpacks to `<name>-<version>/` holding `VERSION` and `bin/launcher`;
    /// the bundle adds `etc/app.properties`.
    pub fn installation(&self, name: &str, version: &str) -> Installation {
        let archive = self.dir.join(format!("{name}-{version}.tar.gz"));
        let root = format!("{name}-{version}");
        let version_file = format!("{root}/VERSION");
        let launcher = format!("{root}/bin/launcher");
        let properties_file = format!("{root}/etc/app.properties");
        write_tar_gz(
            &archive,
            &[
                (version_file.as_str(), version),
                (launcher.as_str(), "#!/bin/sh\nexit 0\n"),
                (properties_file.as_str(), "port=0\n"),
            ],
        );

        let bundle = self.dir.join(format!("{name}-{version}-config.zip"));
        let properties = format!("name={name}\nversion={version}\n");
        write_zip(&bundle, &[("etc/app.properties", &properties)]);

        installation_from(name, version, &archive, &bundle)
    }

    /// An installation whose archive has two top-level entries.
    pub fn malformed_installation(&self, name: &str, version: &str) -> Installation {
        let archive = self.dir.join(format!("{name}-{version}-bad.tar.gz"));
        write_tar_gz(&archive, &[("one/a.txt", "a"), ("two/b.txt", "b")]);
        let bundle = self.dir.join(format!("{name}-{version}-bad-config.zip"));
        write_zip(&bundle, &[("etc/app.properties", "x=1\n")]);
        installation_from(name, version, &archive, &bundle)
    }

    /// An installation whose archive does not exist.
    pub fn missing_installation(&self, name: &str, version: &str) -> Installation {
        installation_from(
            name,
            version,
            &self.dir.join("absent.tar.gz"),
            &self.dir.join("absent.zip"),
        )
    }
}

fn installation_from(name: &str, version: &str, archive: &Path, bundle: &Path) -> Installation {
    Installation {
        assignment: Assignment::new(
            format!("food.fruit:{name}:{version}"),
            format!("@prod:{name}:{version}"),
        ),
        binary_file: Url::from_file_path(archive).unwrap(),
        config_file: Url::from_file_path(bundle).unwrap(),
        resources: BTreeMap::from([("memory".to_string(), 512)]),
    }
}

/// Agent over a temporary slots directory and a mock lifecycle manager.
pub struct TestContext {
    pub config: AgentConfig,
    pub lifecycle: MockLifecycleManager,
    pub artifacts: Artifacts,
    temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_lifecycle(MockLifecycleManager::new())
    }

    pub fn with_lifecycle(lifecycle: MockLifecycleManager) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = AgentConfig::new(temp_dir.path().join("slots"));
        config.location = "/test/host".to_string();
        config.internal_uri = "http://127.0.0.1:7775".to_string();
        config.external_uri = "http://agent.example.com".to_string();
        config.resources_file = temp_dir.path().join("resources.properties");
        config.max_lock_wait = Duration::from_millis(200);
        let artifacts = Artifacts::new(temp_dir.path());
        Self {
            config,
            lifecycle,
            artifacts,
            temp_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn slots_dir(&self) -> &Path {
        &self.config.slots_dir
    }

    pub fn factory(&self) -> DirectoryDeploymentManagerFactory {
        DirectoryDeploymentManagerFactory::new(
            &self.config.slots_dir,
            &self.config.location,
            InstallLimits::default(),
        )
    }

    /// Build an agent, reloading whatever the slots directory holds.
    pub async fn agent(&self) -> Agent {
        Agent::new(
            &self.config,
            Box::new(self.factory()),
            Arc::new(self.lifecycle.clone()),
        )
        .await
        .unwrap()
    }
}
