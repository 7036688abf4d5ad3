use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{BridgeError, Result};

/// Default host the bridge binds to. Loopback only; the bridge is a local
/// control channel, not a network service.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port the bridge binds to.
pub const DEFAULT_PORT: u16 = 9999;

/// Configuration for a bridge instance.
///
/// Controls the bind address and the timing knobs of the accept loop, the
/// host executor, and the port arbiter. All durations are in milliseconds in
/// the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Host to bind the listener to.
    pub host: String,
    /// Port to bind the listener to.
    pub port: u16,
    /// Whether this instance runs without a user-visible host window.
    /// A headless instance advertises itself as reclaimable to a newer
    /// instance arbitrating for the same port.
    pub headless: bool,
    /// How long the accept loop sleeps between polls of the run flag.
    pub accept_poll_ms: u64,
    /// Per-connection read timeout while framing a request.
    pub read_timeout_ms: u64,
    /// How long the dispatcher waits for a mutating handler to complete on
    /// the host executor.
    pub executor_timeout_ms: u64,
    /// Timeout for the arbiter's status probe of a port occupant.
    pub probe_timeout_ms: u64,
    /// Grace period after asking an occupant to stop, before rebinding.
    pub reclaim_grace_ms: u64,
    /// Process-name substrings the arbiter accepts as "our application
    /// family" when deciding whether a port holder may be force-killed.
    pub family_markers: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            headless: false,
            accept_poll_ms: 1_000,
            read_timeout_ms: 5_000,
            executor_timeout_ms: 5_000,
            probe_timeout_ms: 2_000,
            reclaim_grace_ms: 1_000,
            family_markers: vec!["graphbridge".to_string()],
        }
    }
}

impl BridgeConfig {
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_millis(self.reclaim_grace_ms)
    }

    /// Returns the `host:port` address string the listener binds to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads the configuration from disk.
///
/// If the file does not exist, returns the default configuration.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }

    let contents = fs::read_to_string(path).map_err(|e| BridgeError::Config {
        message: format!("failed to read config file '{}': {}", path.display(), e),
    })?;

    let config: BridgeConfig = serde_json::from_str(&contents).map_err(|e| BridgeError::Config {
        message: format!("failed to parse config file '{}': {}", path.display(), e),
    })?;

    Ok(config)
}

/// Saves the configuration to disk using an atomic write.
///
/// Writes to a temporary file first and then renames it to the final
/// location, so a partial write never corrupts the configuration.
pub fn save_config(path: &Path, config: &BridgeConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| BridgeError::Config {
                message: format!("failed to create config directory '{}': {}", parent.display(), e),
            })?;
        }
    }

    let tmp_path = path.with_extension("tmp");

    let json = serde_json::to_string_pretty(config).map_err(|e| BridgeError::Config {
        message: format!("failed to serialize config: {}", e),
    })?;

    fs::write(&tmp_path, &json).map_err(|e| BridgeError::Config {
        message: format!(
            "failed to write temporary config file '{}': {}",
            tmp_path.display(),
            e
        ),
    })?;

    fs::rename(&tmp_path, path).map_err(|e| BridgeError::Config {
        message: format!(
            "failed to rename temporary config file '{}' to '{}': {}",
            tmp_path.display(),
            path.display(),
            e
        ),
    })?;

    Ok(())
}
