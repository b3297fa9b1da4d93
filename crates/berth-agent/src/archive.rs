// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fetching and unpacking deployment artifacts.
//!
//! Binary archives are `.tar.gz` files with exactly one top-level directory.
//! Configuration bundles are zip files unpacked over that directory. Every
//! step is bounded by a timeout; an extractor that overruns is killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::error::InstallError;

/// Time bounds for the install pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallLimits {
    /// Bound on each download
    pub download_timeout: Duration,
    /// Bound on archive extraction
    pub tar_timeout: Duration,
}

impl Default for InstallLimits {
    fn default() -> Self {
        Self {
            download_timeout: Duration::from_secs(300),
            tar_timeout: Duration::from_secs(60),
        }
    }
}

/// Copy the resource at `uri` to `dest`. Supports `file`, `http` and `https`.
pub async fn download(uri: &Url, dest: &Path, timeout: Duration) -> Result<(), InstallError> {
    debug!(uri = %uri, dest = %dest.display(), "Downloading");

    match tokio::time::timeout(timeout, fetch(uri, dest)).await {
        Ok(result) => result,
        Err(_) => Err(InstallError::DownloadTimeout {
            uri: uri.to_string(),
            timeout,
        }),
    }
}

async fn fetch(uri: &Url, dest: &Path) -> Result<(), InstallError> {
    let failed = |reason: String| InstallError::Download {
        uri: uri.to_string(),
        reason,
    };

    match uri.scheme() {
        "file" => {
            let source = uri
                .to_file_path()
                .map_err(|_| failed("not a local file path".to_string()))?;
            fs::copy(&source, dest)
                .await
                .map_err(|e| failed(e.to_string()))?;
        }
        "http" | "https" => {
            let mut response = reqwest::get(uri.clone())
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| failed(e.to_string()))?;
            let mut file = fs::File::create(dest)
                .await
                .map_err(|e| failed(e.to_string()))?;
            // Written chunk by chunk; the archive is never held in memory.
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| failed(e.to_string()))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
            }
            file.flush().await.map_err(|e| failed(e.to_string()))?;
        }
        other => return Err(failed(format!("unsupported scheme '{other}'"))),
    }
    Ok(())
}

/// Extract a `.tar.gz` archive into `dest` with the system `tar`.
pub async fn extract_tar_gz(
    archive: &Path,
    dest: &Path,
    coordinate: &str,
    timeout: Duration,
) -> Result<(), InstallError> {
    debug!(archive = %archive.display(), dest = %dest.display(), "Extracting archive");

    let child = Command::new("tar")
        .arg("-zxf")
        .arg(archive)
        .arg("-C")
        .arg(dest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| InstallError::Extract {
            coordinate: coordinate.to_string(),
            reason: format!("failed to spawn tar: {e}"),
        })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| InstallError::ExtractTimeout {
            coordinate: coordinate.to_string(),
            timeout,
        })?
        .map_err(|e| InstallError::Extract {
            coordinate: coordinate.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(InstallError::Extract {
            coordinate: coordinate.to_string(),
            reason: format!(
                "tar exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

/// The single top-level directory of an extracted archive.
pub async fn archive_root(dir: &Path, coordinate: &str) -> Result<PathBuf, InstallError> {
    let malformed = |entries| InstallError::MalformedArchive {
        coordinate: coordinate.to_string(),
        entries,
    };
    let unreadable = |e: std::io::Error| InstallError::Extract {
        coordinate: coordinate.to_string(),
        reason: e.to_string(),
    };

    let mut entries = fs::read_dir(dir).await.map_err(unreadable)?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        found.push(entry.path());
    }

    if let [root] = found.as_slice() {
        let is_dir = fs::metadata(root).await.map(|m| m.is_dir()).unwrap_or(false);
        if is_dir {
            return Ok(root.clone());
        }
    }
    Err(malformed(found.len()))
}

/// Unpack a zip configuration bundle over `dest`, replacing existing files.
pub async fn unpack_config_bundle(
    bundle: &Path,
    dest: &Path,
    coordinate: &str,
) -> Result<(), InstallError> {
    debug!(bundle = %bundle.display(), dest = %dest.display(), "Unpacking config bundle");

    let bundle = bundle.to_path_buf();
    let dest = dest.to_path_buf();
    let failed = |reason: String| InstallError::ConfigBundle {
        coordinate: coordinate.to_string(),
        reason,
    };

    tokio::task::spawn_blocking(move || -> Result<(), String> {
        let file = std::fs::File::open(&bundle).map_err(|e| e.to_string())?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
        archive.extract(&dest).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| failed(format!("unpack task failed: {e}")))?
    .map_err(failed)
}
