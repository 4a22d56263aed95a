//! TOML-based configuration persistence for the `beacon` tool.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Beacon\config.toml`
//! - Linux:    `~/.config/beacon/config.toml`
//! - macOS:    `~/Library/Application Support/Beacon/config.toml`
//!
//! Example:
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [discovery]
//! timeout_secs = 5
//! interfaces = ["192.168.1.20"]
//!
//! [ssdp]
//! search_target = "upnp:rootdevice"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a missing file, a
//! missing section, and a missing key all behave the same way: the built-in
//! default is used.  Older config files keep working when fields are added.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use beacon_core::{DEFAULT_RESPONSE_SIZE, DEFAULT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::interfaces::{InterfaceSource, StaticInterfaces, SystemInterfaces};
use crate::infrastructure::network::session::SessionOptions;
use crate::infrastructure::network::socket_pool::SocketOptions;

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
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub ssdp: SsdpConfig,
    #[serde(default)]
    pub ws_discovery: WsDiscoveryConfig,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Engine tunables shared by every protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Listening window in seconds, counted from the first transmission.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Largest datagram kept in full; longer ones are truncated.
    #[serde(default = "default_response_size")]
    pub response_size: usize,
    /// Retransmissions after the first send.
    #[serde(default = "default_resend_count")]
    pub resend_count: usize,
    /// Lower bound of the randomised retransmission delay.
    #[serde(default = "default_min_resend_delay_ms")]
    pub min_resend_delay_ms: u64,
    /// Receive poll interval.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,
    /// Explicit local addresses to send from.  Empty means "every usable
    /// interface".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Ipv4Addr>,
}

/// SSDP search settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SsdpConfig {
    /// `ST` header sent when none is given on the command line.
    #[serde(default = "default_search_target")]
    pub search_target: String,
}

/// WS-Discovery probe settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WsDiscoveryConfig {
    /// Qualified type names to probe for.  Empty probes for every type.
    #[serde(default)]
    pub types: Vec<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_response_size() -> usize {
    DEFAULT_RESPONSE_SIZE
}
fn default_resend_count() -> usize {
    2
}
fn default_min_resend_delay_ms() -> u64 {
    200
}
fn default_read_timeout_ms() -> u64 {
    250
}
fn default_channel_capacity() -> usize {
    256
}
fn default_max_pending() -> usize {
    1024
}
fn default_multicast_ttl() -> u32 {
    4
}
fn default_search_target() -> String {
    beacon_core::protocol::ssdp::SEARCH_ALL.to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            response_size: default_response_size(),
            resend_count: default_resend_count(),
            min_resend_delay_ms: default_min_resend_delay_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            channel_capacity: default_channel_capacity(),
            max_pending: default_max_pending(),
            multicast_ttl: default_multicast_ttl(),
            interfaces: Vec::new(),
        }
    }
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            search_target: default_search_target(),
        }
    }
}

impl DiscoveryConfig {
    /// The listening window as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Converts the file settings into engine options.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            socket: SocketOptions {
                read_timeout: Duration::from_millis(self.read_timeout_ms.max(1)),
                multicast_ttl: self.multicast_ttl,
                ..SocketOptions::default()
            },
            resend_count: self.resend_count,
            min_resend_delay: Duration::from_millis(self.min_resend_delay_ms),
            channel_capacity: self.channel_capacity,
            max_pending: self.max_pending,
        }
    }

    /// The interface source selected by `interfaces`.
    pub fn interface_source(&self) -> ConfiguredInterfaces {
        if self.interfaces.is_empty() {
            ConfiguredInterfaces::System(SystemInterfaces)
        } else {
            ConfiguredInterfaces::Static(StaticInterfaces(self.interfaces.clone()))
        }
    }
}

/// Either the host's interfaces or an explicit list from the config file.
#[derive(Debug, Clone)]
pub enum ConfiguredInterfaces {
    System(SystemInterfaces),
    Static(StaticInterfaces),
}

impl InterfaceSource for ConfiguredInterfaces {
    fn local_addresses(&self) -> Vec<Ipv4Addr> {
        match self {
            Self::System(source) => source.local_addresses(),
            Self::Static(source) => source.local_addresses(),
        }
    }
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

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning defaults if the
/// file does not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning defaults if the file is absent.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from(path: PathBuf) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// See [`save_config`].
pub fn save_config_to(config: &AppConfig, path: PathBuf) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io { path, source })
}

/// Resolves the platform config directory, including the `beacon` leaf.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Beacon"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("beacon"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Beacon")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
