//! Validated link settings.
//!
//! [`LinkSettings`] gathers every identity, port and timing value the engines
//! need.  It is built from configuration and CLI flags in `peerlink-node`
//! and checked once with [`LinkSettings::validate`]; engines assume a
//! validated value and never re-check.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use crate::domain::handshake::DEFAULT_HANDSHAKE_ATTEMPTS;
use crate::domain::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::domain::identity::NodeIdentity;

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_DISCOVERY_BASE_PORT: u16 = 45000;
pub const DEFAULT_DISCOVERY_WINDOW: u16 = 10;
pub const DEFAULT_DATA_PORT: u16 = 45100;
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_HANDSHAKE_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration mistakes detected before any socket is opened.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SettingsError {
    #[error("local and peer identity are both {0:?}; they must differ")]
    SameIdentity(String),

    #[error("the discovery window must contain at least one port")]
    EmptyWindow,

    #[error("discovery window {base}..{base}+{window} runs past port 65535")]
    WindowOverflow { base: u16, window: u16 },

    #[error("{0} must not be zero")]
    ZeroPort(&'static str),

    #[error("data port {0} lies inside the discovery window")]
    DataPortInDiscoveryWindow(u16),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("handshake attempts must be at least 1")]
    ZeroAttempts,

    #[error("liveness timeout {timeout:?} must exceed the heartbeat interval {heartbeat:?}")]
    LivenessTimeoutTooShort {
        timeout: Duration,
        heartbeat: Duration,
    },

    #[error("discovery is disabled but no manual peer address was given")]
    ManualPeerRequired,
}

/// Everything a node needs to find, confirm and talk to its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub local_id: NodeIdentity,
    pub peer_id: NodeIdentity,
    /// Address every socket binds to.
    pub bind_address: IpAddr,
    /// Destination address of DISCOVER broadcasts.
    pub broadcast_address: IpAddr,
    pub discovery_base_port: u16,
    pub discovery_window: u16,
    /// Port this node receives handshake and session traffic on.
    pub data_port: u16,
    pub discovery_interval: Duration,
    /// Wall-clock bound on one discovery phase.  `None` waits forever.
    pub discovery_timeout: Option<Duration>,
    /// Skip discovery and go straight to the manual peer.
    pub discovery_enabled: bool,
    /// `ip:data_port` of the peer, used when discovery is off or times out.
    pub manual_peer: Option<SocketAddr>,
    pub handshake_interval: Duration,
    pub handshake_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Silence after which a connected peer is dropped.  `None` disables.
    pub liveness_timeout: Option<Duration>,
    /// Answer every inbound KEEPALIVE with one of our own.
    pub echo_keepalive: bool,
    /// Sleep between polls of a non-blocking socket.
    pub poll_interval: Duration,
    /// Return to discovery after a session ends.
    pub reconnect: bool,
}

impl LinkSettings {
    /// Settings with every default for the given pair of identities.
    pub fn new(local_id: NodeIdentity, peer_id: NodeIdentity) -> Self {
        Self {
            local_id,
            peer_id,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_base_port: DEFAULT_DISCOVERY_BASE_PORT,
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            data_port: DEFAULT_DATA_PORT,
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            discovery_timeout: None,
            discovery_enabled: true,
            manual_peer: None,
            handshake_interval: DEFAULT_HANDSHAKE_INTERVAL,
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            liveness_timeout: Some(DEFAULT_LIVENESS_TIMEOUT),
            echo_keepalive: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect: true,
        }
    }

    /// Checks every cross-field rule.
    ///
    /// # Errors
    ///
    /// Returns the first [`SettingsError`] found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.local_id == self.peer_id {
            return Err(SettingsError::SameIdentity(self.local_id.to_string()));
        }

        if self.discovery_base_port == 0 {
            return Err(SettingsError::ZeroPort("discovery base port"));
        }
        if self.discovery_window == 0 {
            return Err(SettingsError::EmptyWindow);
        }
        if self.discovery_last_port().is_none() {
            return Err(SettingsError::WindowOverflow {
                base: self.discovery_base_port,
                window: self.discovery_window,
            });
        }
        if self.data_port == 0 {
            return Err(SettingsError::ZeroPort("data port"));
        }
        if self.discovery_ports().any(|p| p == self.data_port) {
            return Err(SettingsError::DataPortInDiscoveryWindow(self.data_port));
        }
        if let Some(peer) = self.manual_peer {
            if peer.port() == 0 {
                return Err(SettingsError::ZeroPort("manual peer port"));
            }
        }

        for (name, value) in [
            ("discovery interval", self.discovery_interval),
            ("handshake interval", self.handshake_interval),
            ("heartbeat interval", self.heartbeat_interval),
            ("poll interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(SettingsError::ZeroDuration(name));
            }
        }
        if self.discovery_timeout.is_some_and(|t| t.is_zero()) {
            return Err(SettingsError::ZeroDuration("discovery timeout"));
        }
        if self.handshake_attempts == 0 {
            return Err(SettingsError::ZeroAttempts);
        }
        if let Some(timeout) = self.liveness_timeout {
            if timeout <= self.heartbeat_interval {
                return Err(SettingsError::LivenessTimeoutTooShort {
                    timeout,
                    heartbeat: self.heartbeat_interval,
                });
            }
        }
        if !self.discovery_enabled && self.manual_peer.is_none() {
            return Err(SettingsError::ManualPeerRequired);
        }
        Ok(())
    }

    /// Every port in the discovery window, lowest first.
    pub fn discovery_ports(&self) -> impl Iterator<Item = u16> {
        let base = self.discovery_base_port;
        (0..self.discovery_window).map_while(move |offset| base.checked_add(offset))
    }

    /// Broadcast destinations for one DISCOVER tick.
    pub fn broadcast_targets(&self) -> Vec<SocketAddr> {
        self.discovery_ports()
            .map(|port| SocketAddr::new(self.broadcast_address, port))
            .collect()
    }

    fn discovery_last_port(&self) -> Option<u16> {
        self.discovery_base_port
            .checked_add(self.discovery_window.checked_sub(1)?)
    }
}
