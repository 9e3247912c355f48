//! TOML-based configuration persistence for a LocalSignal node.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\LocalSignal\config.toml`
//! - Linux:    `~/.config/localsignal/config.toml`
//! - macOS:    `~/Library/Application Support/LocalSignal/config.toml`
//!
//! Example:
//!
//! ```toml
//! [node]
//! log_level = "debug"
//!
//! [service]
//! service_id = "com.example.localsignal.test"
//! strategy = "cluster"
//! local_name = "kitchen-tablet"
//!
//! [network]
//! discovery_port = 24810
//! broadcast_address = "192.168.1.255"
//! ```
//!
//! # Serde default values
//!
//! Every section and field has a default, so a missing file, a missing
//! section or a missing key all fall back to working values.  Devices only
//! interoperate when `service_id` and `strategy` match.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use localsignal_core::ServiceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::transport::lan::LanConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An address setting is not a valid IP address.
    #[error("invalid {field} '{value}': {source}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// A timing setting would stall or break discovery.
    #[error("invalid [network] timing: {0}")]
    InvalidTiming(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub network: NetworkSettings,
}

/// General node behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Sockets and timings of the LAN transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    /// IP address to bind all sockets to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Destination of presence announcements.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// UDP port for announcements and discovery.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// TCP port for connection requests; 0 means ephemeral.
    #[serde(default)]
    pub control_port: u16,
    #[serde(default = "default_announce_interval_ms")]
    pub announce_interval_ms: u64,
    /// Silence after which a discovered device counts as lost.
    #[serde(default = "default_lost_after_ms")]
    pub lost_after_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_discovery_port() -> u16 {
    24810
}
fn default_announce_interval_ms() -> u64 {
    1000
}
fn default_lost_after_ms() -> u64 {
    5000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            broadcast_address: default_broadcast_address(),
            discovery_port: default_discovery_port(),
            control_port: 0,
            announce_interval_ms: default_announce_interval_ms(),
            lost_after_ms: default_lost_after_ms(),
        }
    }
}

impl NetworkSettings {
    /// Builds the LAN transport settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if an address does not parse,
    /// and [`ConfigError::InvalidTiming`] if `announce_interval_ms` is zero or
    /// `lost_after_ms` is shorter than it.
    pub fn to_lan_config(&self) -> Result<LanConfig, ConfigError> {
        if self.announce_interval_ms == 0 {
            return Err(ConfigError::InvalidTiming(
                "announce_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.lost_after_ms < self.announce_interval_ms {
            return Err(ConfigError::InvalidTiming(format!(
                "lost_after_ms ({}) is shorter than announce_interval_ms ({})",
                self.lost_after_ms, self.announce_interval_ms
            )));
        }

        Ok(LanConfig {
            bind_address: parse_ip("bind_address", &self.bind_address)?,
            broadcast_address: parse_ip("broadcast_address", &self.broadcast_address)?,
            discovery_port: self.discovery_port,
            control_port: self.control_port,
            announce_interval: Duration::from_millis(self.announce_interval_ms),
            lost_after: Duration::from_millis(self.lost_after_ms),
            ..LanConfig::default()
        })
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidAddress {
            field,
            value: value.to_string(),
            source,
        })
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(&config_file_path()?, config)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LocalSignal"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("localsignal"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LocalSignal")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
