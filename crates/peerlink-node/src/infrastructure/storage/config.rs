//! TOML-based configuration for a PeerLink node.
//!
//! Reads and writes `AppConfig` to an explicit path or to the
//! platform-appropriate config file:
//! - Windows:  `%APPDATA%\PeerLink\config.toml`
//! - Linux:    `~/.config/peerlink/config.toml` (or `$XDG_CONFIG_HOME`)
//! - macOS:    `~/Library/Application Support/PeerLink/config.toml`
//!
//! # Example file
//!
//! ```toml
//! [node]
//! id = "NODE1"
//! peer_id = "NODE2"
//!
//! [network]
//! data_port = 45100
//! peer_address = "192.168.1.20:45101"
//!
//! [timing]
//! liveness_timeout_secs = 0   # never drop a silent peer
//! ```
//!
//! Every field has a default, so any subset (including an empty file) is
//! valid.  Durations are stored as plain integers with their unit in the key
//! name; for the two optional timeouts `0` means "none".
//!
//! # From file to settings
//!
//! `AppConfig` is the on-disk shape.  [`AppConfig::into_settings`] turns it
//! into a validated [`LinkSettings`], which is what the engines consume.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use peerlink_core::domain::settings::{
    DEFAULT_DATA_PORT, DEFAULT_DISCOVERY_BASE_PORT, DEFAULT_DISCOVERY_WINDOW,
};
use peerlink_core::{IdentityError, LinkSettings, NodeIdentity, SettingsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

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

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid node identity: {0}")]
    Identity(#[from] IdentityError),

    /// An address field does not parse.
    #[error("invalid {field} {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Who this node is and who it looks for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: String,
    #[serde(default = "default_peer_id")]
    pub peer_id: String,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address every socket binds to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Destination of `DISCOVER` broadcasts.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    #[serde(default = "default_discovery_base_port")]
    pub discovery_base_port: u16,
    /// Number of consecutive discovery ports starting at the base.
    #[serde(default = "default_discovery_window")]
    pub discovery_window: u16,
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    /// `ip:port` of the peer's data socket.  Used when discovery is disabled
    /// or times out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_address: Option<String>,
}

/// Protocol timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
    /// `0` waits for the peer forever.
    #[serde(default)]
    pub discovery_timeout_secs: u64,
    #[serde(default = "default_handshake_interval_ms")]
    pub handshake_interval_ms: u64,
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// `0` never drops a silent peer.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
    /// Return to discovery after a session ends.
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default)]
    pub echo_keepalive: bool,
    /// How often buffered data records are written to the sink.
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_node_id() -> String {
    "NODE1".to_string()
}
fn default_peer_id() -> String {
    "NODE2".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_discovery_base_port() -> u16 {
    DEFAULT_DISCOVERY_BASE_PORT
}
fn default_discovery_window() -> u16 {
    DEFAULT_DISCOVERY_WINDOW
}
fn default_data_port() -> u16 {
    DEFAULT_DATA_PORT
}
fn default_discovery_interval_ms() -> u64 {
    2_000
}
fn default_handshake_interval_ms() -> u64 {
    500
}
fn default_handshake_attempts() -> u32 {
    10
}
fn default_heartbeat_interval_ms() -> u64 {
    5_000
}
fn default_liveness_timeout_secs() -> u64 {
    15
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_persist_interval_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            peer_id: default_peer_id(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            broadcast_address: default_broadcast_address(),
            discovery_base_port: default_discovery_base_port(),
            discovery_window: default_discovery_window(),
            data_port: default_data_port(),
            peer_address: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: default_discovery_interval_ms(),
            discovery_timeout_secs: 0,
            handshake_interval_ms: default_handshake_interval_ms(),
            handshake_attempts: default_handshake_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_enabled: default_true(),
            reconnect: default_true(),
            echo_keepalive: false,
            persist_interval_ms: default_persist_interval_ms(),
        }
    }
}

// ── Conversion ────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Builds validated [`LinkSettings`] from this configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Identity`] for a malformed node or peer id.
    /// - [`ConfigError::InvalidAddress`] for an unparsable address.
    /// - [`ConfigError::Settings`] when the values are inconsistent.
    pub fn into_settings(&self) -> Result<LinkSettings, ConfigError> {
        let mut settings = LinkSettings::new(
            NodeIdentity::new(self.node.id.as_str())?,
            NodeIdentity::new(self.node.peer_id.as_str())?,
        );

        let net = &self.network;
        settings.bind_address = parse_ip("bind_address", &net.bind_address)?;
        settings.broadcast_address = parse_ip("broadcast_address", &net.broadcast_address)?;
        settings.discovery_base_port = net.discovery_base_port;
        settings.discovery_window = net.discovery_window;
        settings.data_port = net.data_port;
        settings.manual_peer = net
            .peer_address
            .as_deref()
            .map(|value| {
                value.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidAddress {
                    field: "peer_address",
                    value: value.to_string(),
                })
            })
            .transpose()?;

        let timing = &self.timing;
        settings.discovery_interval = Duration::from_millis(timing.discovery_interval_ms);
        settings.discovery_timeout = nonzero_secs(timing.discovery_timeout_secs);
        settings.handshake_interval = Duration::from_millis(timing.handshake_interval_ms);
        settings.handshake_attempts = timing.handshake_attempts;
        settings.heartbeat_interval = Duration::from_millis(timing.heartbeat_interval_ms);
        settings.liveness_timeout = nonzero_secs(timing.liveness_timeout_secs);
        settings.poll_interval = Duration::from_millis(timing.poll_interval_ms);

        settings.discovery_enabled = self.session.discovery_enabled;
        settings.reconnect = self.session.reconnect;
        settings.echo_keepalive = self.session.echo_keepalive;

        settings.validate()?;
        Ok(settings)
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `AppConfig` from `path` (or the platform default), returning
/// `AppConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` as pretty TOML, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io { path, source })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("PeerLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("peerlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("PeerLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
