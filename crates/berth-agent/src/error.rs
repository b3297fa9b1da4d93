// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for berth-agent.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Agent errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Request validation failed. Nothing was changed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The slot lock could not be acquired within the configured wait.
    #[error(
        "Could not obtain lock for slot {slot_id} within {}ms (held by {holder})",
        waited.as_millis()
    )]
    LockTimeout {
        /// Slot whose lock was contended.
        slot_id: Uuid,
        /// How long the caller waited.
        waited: Duration,
        /// Description of the current holder, for diagnostics only.
        holder: String,
    },

    /// Installing a deployment failed. The previous deployment is intact
    /// unless the failure happened after it was retired.
    #[error("Install failed: {0}")]
    Install(#[from] InstallError),

    /// Operation is not valid for the slot's current state.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Optimistic concurrency check failed.
    #[error("Version conflict on {header}: expected {expected}, actual {actual}")]
    VersionConflict {
        /// Header (or field) carrying the version.
        header: &'static str,
        /// Version supplied by the caller.
        expected: String,
        /// Current version.
        actual: String,
    },

    /// Slot is not registered with this agent.
    #[error("Slot not found: {0}")]
    SlotNotFound(Uuid),

    /// Persisted slot state contradicts itself; the slot cannot be loaded.
    #[error("Inconsistent slot state: {0}")]
    InconsistentSlot(String),

    /// Lifecycle manager call failed.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] crate::lifecycle::LifecycleError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the caller may retry the same request unchanged (after
    /// refetching status for version conflicts).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::VersionConflict { .. })
    }
}

/// Failures while staging a new deployment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstallError {
    /// Fetching an archive or bundle failed.
    #[error("Unable to download {uri}: {reason}")]
    Download {
        /// Source location.
        uri: String,
        /// Transport error.
        reason: String,
    },

    /// Fetching an archive or bundle did not finish in time.
    #[error("Download of {uri} timed out after {}s", timeout.as_secs())]
    DownloadTimeout {
        /// Source location.
        uri: String,
        /// Configured bound.
        timeout: Duration,
    },

    /// Archive extraction failed.
    #[error("Unable to extract archive {coordinate}: {reason}")]
    Extract {
        /// Binary coordinate.
        coordinate: String,
        /// Failure detail (tar stderr or spawn error).
        reason: String,
    },

    /// Archive extraction did not finish in time; the extractor was killed.
    #[error("Extraction of {coordinate} timed out after {}s", timeout.as_secs())]
    ExtractTimeout {
        /// Binary coordinate.
        coordinate: String,
        /// Configured bound.
        timeout: Duration,
    },

    /// Archive does not contain exactly one top-level directory.
    #[error("Invalid archive {coordinate}: expected a single root directory, found {entries} entries")]
    MalformedArchive {
        /// Binary coordinate.
        coordinate: String,
        /// Number of top-level entries found.
        entries: usize,
    },

    /// Configuration bundle could not be unpacked.
    #[error("Unable to unpack config bundle {coordinate}: {reason}")]
    ConfigBundle {
        /// Configuration coordinate.
        coordinate: String,
        /// Failure detail.
        reason: String,
    },

    /// Manifest could not be written.
    #[error("Unable to save deployment manifest {}: {source}", path.display())]
    Persist {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Prepared root could not be moved into place.
    #[error("Unable to move deployment to {}: {source}", path.display())]
    Activate {
        /// Final deployment directory.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Result type using agent Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_message_names_holder() {
        let err = Error::LockTimeout {
            slot_id: Uuid::nil(),
            waited: Duration::from_millis(1500),
            holder: "assign since 2025-01-01T00:00:00Z".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1500ms"));
        assert!(msg.contains("held by assign"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_version_conflict_names_both_versions() {
        let err = Error::VersionConflict {
            header: "x-berth-slot-version",
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected abc"));
        assert!(msg.contains("actual def"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_install_errors_are_not_retryable() {
        let err: Error = InstallError::MalformedArchive {
            coordinate: "food.fruit:apple:1.0".to_string(),
            entries: 2,
        }
        .into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("found 2 entries"));
    }

    #[test]
    fn test_illegal_state_is_not_retryable() {
        let err = Error::IllegalState("Slot has been terminated".to_string());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("terminated"));
    }
}
