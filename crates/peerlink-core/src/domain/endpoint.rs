//! The resolved address of the counterpart node.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Address and ports of the discovered peer.
///
/// Learned during discovery and owned by one session for its lifetime.  On
/// reconnect a fresh endpoint replaces the old one; fields are never patched
/// individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub address: IpAddr,
    /// Port the peer receives handshake and session traffic on.
    pub data_port: u16,
    /// Port of the peer's discovery receiver, if it has one.
    pub discovery_port: Option<u16>,
}

impl PeerEndpoint {
    pub fn new(address: IpAddr, data_port: u16, discovery_port: Option<u16>) -> Self {
        Self {
            address,
            data_port,
            discovery_port,
        }
    }

    /// Builds an endpoint from a manually supplied `ip:data_port`.
    pub fn from_data_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port(), None)
    }

    /// Where handshake and session datagrams for this peer are sent.
    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.data_port)
    }

    /// Where discovery replies for this peer are sent, if it listens for them.
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery_port
            .map(|port| SocketAddr::new(self.address, port))
    }
}

impl std::fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.discovery_port {
            Some(disc) => write!(f, "{} (data {}, discovery {disc})", self.address, self.data_port),
            None => write!(f, "{} (data {})", self.address, self.data_port),
        }
    }
}
