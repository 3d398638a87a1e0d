//! Daemon configuration.
//!
//! Defaults first, then environment overrides. Overrides are read through a
//! lookup function so tests can supply a map instead of touching the
//! process environment.

use std::path::PathBuf;
use std::time::Duration;

use lockbox_registry::ClientConfig;
use url::Url;

use crate::error::{DaemonError, Result};

/// Default registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.lockbox.dev";

/// Registry protocol version this daemon speaks.
pub const REGISTRY_PROTOCOL_VERSION: &str = "0.1.0";

/// Name of the root directory under `$HOME`.
pub const DEFAULT_ROOT_DIR: &str = ".lockbox";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_ROOT: &str = "LOCKBOX_ROOT";
pub const ENV_REGISTRY_URL: &str = "LOCKBOX_REGISTRY_URL";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "LOCKBOX_REQUEST_TIMEOUT_SECS";

/// Main daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Data directory. Creating it and checking its permissions is left to
    /// the process bootstrap.
    pub root: PathBuf,
    pub registry_url: Url,
    /// Sent in the registry protocol version header.
    pub registry_version: String,
    /// Sent in the user agent.
    pub client_version: String,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    /// Client-side timeout of each registry request.
    pub request_timeout: Duration,
}

impl Config {
    /// Defaults rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let registry_url = Url::parse(DEFAULT_REGISTRY_URL)
            .map_err(|e| DaemonError::InvalidConfig(format!("default registry url: {}", e)))?;
        Ok(Self {
            socket_path: root.join("daemon.socket"),
            pid_path: root.join("daemon.pid"),
            root,
            registry_url,
            registry_version: REGISTRY_PROTOCOL_VERSION.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults and the overrides `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = match lookup(ENV_ROOT).filter(|v| !v.is_empty()) {
            Some(root) => PathBuf::from(root),
            None => {
                let home = lookup("HOME")
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| DaemonError::InvalidConfig("HOME is not set".into()))?;
                PathBuf::from(home).join(DEFAULT_ROOT_DIR)
            }
        };
        let mut config = Self::with_root(root)?;

        if let Some(url) = lookup(ENV_REGISTRY_URL) {
            config.registry_url = Url::parse(&url).map_err(|e| {
                DaemonError::InvalidConfig(format!("{}={:?}: {}", ENV_REGISTRY_URL, url, e))
            })?;
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            let secs: u64 = secs.parse().map_err(|_| {
                DaemonError::InvalidConfig(format!(
                    "{} must be a whole number of seconds, got {:?}",
                    ENV_REQUEST_TIMEOUT_SECS, secs
                ))
            })?;
            if secs == 0 {
                return Err(DaemonError::InvalidConfig(format!(
                    "{} must be positive",
                    ENV_REQUEST_TIMEOUT_SECS
                )));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Read-only settings handed to the registry client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.registry_url.clone(),
            api_version: self.registry_version.clone(),
            client_version: self.client_version.clone(),
            timeout: self.request_timeout,
        }
    }
}
