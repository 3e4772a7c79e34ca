//! Configuration for a sync device.
//!
//! Configuration is built in code with the `with_*` setters or loaded from
//! a TOML file (default: `pairsync.toml`). Every key is optional.
//!
//! ```toml
//! [device]
//! name = "Laptop"
//!
//! [sync]
//! two_way = false
//! hash_contents = true
//! mirror_deletions = false
//! conflict_strategy = "keep_newest"
//!
//! [receive]
//! dir = "~/Pairsync"
//! auto_accept = true
//!
//! [transport]
//! send_timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sync_types::Resolution;

/// Root configuration for a sync device.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Device identity.
    pub device: DeviceConfig,
    /// Sync behavior.
    pub sync: SyncOptions,
    /// Incoming session handling.
    pub receive: ReceiveConfig,
    /// Transport tuning.
    pub transport: TransportConfig,
}

/// Device identity.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Human-readable device name, sent with sync requests.
    #[serde(default = "default_device_name")]
    pub name: String,
}

/// Sync behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SyncOptions {
    /// Start two-way sessions by default (default: false).
    #[serde(default)]
    pub two_way: bool,
    /// Compare files by content hash (default: true).
    #[serde(default = "default_hash_contents")]
    pub hash_contents: bool,
    /// After a one-way session, delete files the source no longer has
    /// (default: false).
    #[serde(default)]
    pub mirror_deletions: bool,
    /// Strategy applied to conflicts as they are detected
    /// (default: keep_newest; `unresolved` waits for the user).
    #[serde(default = "default_conflict_strategy")]
    pub conflict_strategy: Resolution,
}

/// Incoming session handling.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReceiveConfig {
    /// Folder incoming sessions write into (default: ./pairsync-inbox).
    #[serde(default = "default_receive_dir")]
    pub dir: PathBuf,
    /// Accept incoming sessions without asking (default: true).
    #[serde(default = "default_auto_accept")]
    pub auto_accept: bool,
}

/// Transport tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound on a single file send, in seconds (default: 30).
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

// Default value functions
fn default_device_name() -> String {
    "pairsync device".to_string()
}

fn default_hash_contents() -> bool {
    true
}

fn default_conflict_strategy() -> Resolution {
    Resolution::KeepNewest
}

fn default_receive_dir() -> PathBuf {
    PathBuf::from("pairsync-inbox")
}

fn default_auto_accept() -> bool {
    true
}

fn default_send_timeout_secs() -> u64 {
    30
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            two_way: false,
            hash_contents: default_hash_contents(),
            mirror_deletions: false,
            conflict_strategy: default_conflict_strategy(),
        }
    }
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            dir: default_receive_dir(),
            auto_accept: default_auto_accept(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            sync: SyncOptions::default(),
            receive: ReceiveConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the device name.
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device.name = name.to_string();
        self
    }

    /// Set the folder incoming sessions write into.
    pub fn with_receive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.receive.dir = dir.into();
        self
    }

    /// Default to two-way sessions.
    pub fn with_two_way(mut self, two_way: bool) -> Self {
        self.sync.two_way = two_way;
        self
    }

    /// Enable or disable content hashing.
    pub fn with_hash_contents(mut self, hash: bool) -> Self {
        self.sync.hash_contents = hash;
        self
    }

    /// Enable or disable mirroring deletions on one-way sessions.
    pub fn with_mirror_deletions(mut self, mirror: bool) -> Self {
        self.sync.mirror_deletions = mirror;
        self
    }

    /// Accept incoming sessions automatically, or hold them for a decision.
    pub fn with_auto_accept(mut self, auto: bool) -> Self {
        self.receive.auto_accept = auto;
        self
    }

    /// Set the conflict strategy.
    pub fn with_conflict_strategy(mut self, strategy: Resolution) -> Self {
        self.sync.conflict_strategy = strategy;
        self
    }

    /// Set the file send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.transport.send_timeout_secs = timeout.as_secs();
        self
    }

    /// File send timeout as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.send_timeout_secs)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
