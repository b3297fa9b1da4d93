// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for berth-agent.
//!
//! [`Config::from_env`] reads the process environment once at startup. The
//! resulting [`AgentConfig`] is passed explicitly into the agent, slots and
//! deployment managers; nothing reads the environment after that.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;
use uuid::Uuid;

use crate::archive::InstallLimits;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Settings handed to the agent
    pub agent: AgentConfig,
}

/// Settings for the agent, its slots and their deployment managers.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Fixed agent identity. When unset the agent persists one in the slots dir.
    pub agent_id: Option<Uuid>,
    /// Agent location, e.g. `/berth/host-1`
    pub location: String,
    /// Host instance id stamped into status snapshots
    pub instance_id: Option<String>,
    /// Base URI other components on the machine use to reach the agent
    pub internal_uri: String,
    /// Base URI remote callers use to reach the agent
    pub external_uri: String,
    /// Root directory holding one subdirectory per slot
    pub slots_dir: PathBuf,
    /// `key=int` properties file listing the static resource inventory
    pub resources_file: PathBuf,
    /// Environment name written into each deployment's node config
    pub environment: String,
    /// Bounded wait for a slot lock
    pub max_lock_wait: Duration,
    /// Bound on archive extraction
    pub tar_timeout: Duration,
    /// Bound on each archive or bundle download
    pub download_timeout: Duration,
    /// Bound on launcher `start` and `status`
    pub launcher_timeout: Duration,
    /// Bound on launcher `stop`, `restart` and `kill`
    pub launcher_stop_timeout: Duration,
}

impl AgentConfig {
    /// Settings rooted at `slots_dir` with every other value at its default.
    pub fn new(slots_dir: impl Into<PathBuf>) -> Self {
        let uri = default_internal_uri(DEFAULT_HTTP_PORT);
        Self {
            agent_id: None,
            location: default_location(),
            instance_id: None,
            internal_uri: uri.clone(),
            external_uri: uri,
            slots_dir: slots_dir.into(),
            resources_file: PathBuf::from(DEFAULT_RESOURCES_FILE),
            environment: "development".to_string(),
            max_lock_wait: Duration::from_millis(1000),
            tar_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(300),
            launcher_timeout: Duration::from_secs(1),
            launcher_stop_timeout: Duration::from_secs(15),
        }
    }

    /// Download and extraction bounds for the deployment installer.
    pub fn install_limits(&self) -> InstallLimits {
        InstallLimits {
            download_timeout: self.download_timeout,
            tar_timeout: self.tar_timeout,
        }
    }
}

const DEFAULT_HTTP_PORT: u16 = 7775;
const DEFAULT_RESOURCES_FILE: &str = "etc/resources.properties";

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = std::env::var("BERTH_HTTP_PORT")
            .unwrap_or_else(|_| DEFAULT_HTTP_PORT.to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("BERTH_HTTP_PORT", "expected a port number"))?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let agent_id = match std::env::var("BERTH_AGENT_ID") {
            Ok(raw) => Some(
                Uuid::parse_str(raw.trim())
                    .map_err(|_| ConfigError::Invalid("BERTH_AGENT_ID", "expected a UUID"))?,
            ),
            Err(_) => None,
        };

        let location = std::env::var("BERTH_LOCATION").unwrap_or_else(|_| default_location());
        if !location.starts_with('/') {
            return Err(ConfigError::Invalid(
                "BERTH_LOCATION",
                "location must start with '/'",
            ));
        }

        let instance_id = std::env::var("BERTH_INSTANCE_ID")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let internal_uri = match std::env::var("BERTH_INTERNAL_URI") {
            Ok(raw) => parse_base_uri("BERTH_INTERNAL_URI", &raw)?,
            Err(_) => default_internal_uri(port),
        };
        let external_uri = match std::env::var("BERTH_EXTERNAL_URI") {
            Ok(raw) => parse_base_uri("BERTH_EXTERNAL_URI", &raw)?,
            Err(_) => internal_uri.clone(),
        };

        let slots_dir =
            PathBuf::from(std::env::var("BERTH_SLOTS_DIR").unwrap_or_else(|_| "slots".to_string()));
        let resources_file = PathBuf::from(
            std::env::var("BERTH_RESOURCES_FILE")
                .unwrap_or_else(|_| DEFAULT_RESOURCES_FILE.to_string()),
        );
        let environment =
            std::env::var("BERTH_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let max_lock_wait = Duration::from_millis(parse_positive("BERTH_MAX_LOCK_WAIT_MS", 1000)?);

        Ok(Self {
            http_addr,
            agent: AgentConfig {
                agent_id,
                location,
                instance_id,
                internal_uri,
                external_uri,
                slots_dir,
                resources_file,
                environment,
                max_lock_wait,
                tar_timeout: Duration::from_secs(parse_positive("BERTH_TAR_TIMEOUT_SECS", 60)?),
                download_timeout: Duration::from_secs(parse_positive(
                    "BERTH_DOWNLOAD_TIMEOUT_SECS",
                    300,
                )?),
                launcher_timeout: Duration::from_secs(parse_positive(
                    "BERTH_LAUNCHER_TIMEOUT_SECS",
                    1,
                )?),
                launcher_stop_timeout: Duration::from_secs(parse_positive(
                    "BERTH_LAUNCHER_STOP_TIMEOUT_SECS",
                    15,
                )?),
            },
        })
    }
}

/// Reads a wait or timeout; zero is rejected.
fn parse_positive(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    let value = match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(var, "expected a positive integer"))?,
        Err(_) => default,
    };
    if value == 0 {
        return Err(ConfigError::Invalid(var, "must be greater than zero"));
    }
    Ok(value)
}

fn default_location() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "local".to_string());
    format!("/berth/{host}")
}

fn default_internal_uri(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Validates an absolute base URI and strips any trailing slash.
fn parse_base_uri(var: &'static str, raw: &str) -> Result<String, ConfigError> {
    let uri = Url::parse(raw.trim()).map_err(|_| ConfigError::Invalid(var, "expected a URI"))?;
    if uri.cannot_be_a_base() {
        return Err(ConfigError::Invalid(var, "expected a base URI"));
    }
    Ok(uri.as_str().trim_end_matches('/').to_string())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    /// An environment variable holds an unusable value.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "BERTH_HTTP_PORT",
        "BERTH_AGENT_ID",
        "BERTH_LOCATION",
        "BERTH_INSTANCE_ID",
        "BERTH_INTERNAL_URI",
        "BERTH_EXTERNAL_URI",
        "BERTH_SLOTS_DIR",
        "BERTH_RESOURCES_FILE",
        "BERTH_ENVIRONMENT",
        "BERTH_MAX_LOCK_WAIT_MS",
        "BERTH_TAR_TIMEOUT_SECS",
        "BERTH_DOWNLOAD_TIMEOUT_SECS",
        "BERTH_LAUNCHER_TIMEOUT_SECS",
        "BERTH_LAUNCHER_STOP_TIMEOUT_SECS",
    ];

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Clears every BERTH_* variable, restoring them on drop.
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for var in VARS {
                guard.remove(var);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _env = EnvGuard::clean();

        let config = Config::from_env().unwrap();
        assert_eq!(config.http_addr.port(), 7775);
        assert!(config.agent.agent_id.is_none());
        assert!(config.agent.location.starts_with("/berth/"));
        assert_eq!(config.agent.internal_uri, "http://127.0.0.1:7775");
        assert_eq!(config.agent.external_uri, config.agent.internal_uri);
        assert_eq!(config.agent.slots_dir, PathBuf::from("slots"));
        assert_eq!(config.agent.environment, "development");
        assert_eq!(config.agent.max_lock_wait, Duration::from_secs(1));
        assert_eq!(config.agent.tar_timeout, Duration::from_secs(60));
        assert_eq!(config.agent.launcher_stop_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut env = EnvGuard::clean();
        let id = Uuid::new_v4();
        env.set("BERTH_HTTP_PORT", "9000");
        env.set("BERTH_AGENT_ID", &id.to_string());
        env.set("BERTH_LOCATION", "/rack/7");
        env.set("BERTH_INSTANCE_ID", "i-0abc");
        env.set("BERTH_EXTERNAL_URI", "https://agent.example.com");
        env.set("BERTH_SLOTS_DIR", "/var/lib/berth/slots");
        env.set("BERTH_MAX_LOCK_WAIT_MS", "250");

        let config = Config::from_env().unwrap();
        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.agent.agent_id, Some(id));
        assert_eq!(config.agent.location, "/rack/7");
        assert_eq!(config.agent.instance_id.as_deref(), Some("i-0abc"));
        assert_eq!(config.agent.internal_uri, "http://127.0.0.1:9000");
        assert_eq!(config.agent.external_uri, "https://agent.example.com");
        assert_eq!(config.agent.max_lock_wait, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_relative_location() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut env = EnvGuard::clean();
        env.set("BERTH_LOCATION", "rack/7");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("BERTH_LOCATION", _)));
    }

    #[test]
    fn test_rejects_zero_lock_wait() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut env = EnvGuard::clean();
        env.set("BERTH_MAX_LOCK_WAIT_MS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("BERTH_MAX_LOCK_WAIT_MS", _)));
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        for var in [
            "BERTH_TAR_TIMEOUT_SECS",
            "BERTH_DOWNLOAD_TIMEOUT_SECS",
            "BERTH_LAUNCHER_TIMEOUT_SECS",
            "BERTH_LAUNCHER_STOP_TIMEOUT_SECS",
        ] {
            let mut env = EnvGuard::clean();
            env.set(var, "0");
            match Config::from_env() {
                Err(ConfigError::Invalid(name, _)) => assert_eq!(name, var),
                other => panic!("{var}=0 accepted: {other:?}"),
            }
        }
    }

    #[test]
    fn test_timeout_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut env = EnvGuard::clean();
        env.set("BERTH_TAR_TIMEOUT_SECS", "5");
        env.set("BERTH_LAUNCHER_STOP_TIMEOUT_SECS", "30");

        let config = Config::from_env().unwrap();
        assert_eq!(config.agent.tar_timeout, Duration::from_secs(5));
        assert_eq!(config.agent.launcher_stop_timeout, Duration::from_secs(30));
        assert_eq!(config.agent.download_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_bad_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut env = EnvGuard::clean();
        env.set("BERTH_HTTP_PORT", "seventy");

        assert!(Config::from_env().is_err());
    }

    #[test]
    fn test_agent_config_new_uses_defaults() {
        let config = AgentConfig::new("/tmp/slots");
        assert_eq!(config.slots_dir, PathBuf::from("/tmp/slots"));
        assert_eq!(config.max_lock_wait, Duration::from_millis(1000));
        let limits = config.install_limits();
        assert_eq!(limits.tar_timeout, Duration::from_secs(60));
        assert_eq!(limits.download_timeout, Duration::from_secs(300));
    }
}
