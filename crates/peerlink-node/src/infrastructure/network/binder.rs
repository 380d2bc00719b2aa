//! Transport port binding.
//!
//! # The discovery window
//!
//! Several nodes may run on one host, and each needs its own discovery
//! receiver.  Instead of one fixed port, nodes share a small window of
//! consecutive ports (default `45000..=45009`).  Each node binds the first
//! free port in the window, and every `DISCOVER` broadcast is sent to all
//! ports in the window so it reaches whichever port the peer got.
//!
//! If every port in the window is taken the node still works in
//! *broadcast-only mode*: it announces itself (advertising no discovery
//! port) and listens for acknowledgements on its send socket.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for socket binding.
#[derive(Debug, Error)]
pub enum BindError {
    /// The UDP socket could not be bound.
    #[error("failed to bind {role} socket on {addr}: {source}")]
    BindFailed {
        role: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A socket option could not be applied.
    #[error("failed to configure {role} socket: {source}")]
    Configure {
        role: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Sockets used while discovering the peer.
#[derive(Debug)]
pub struct DiscoverySockets {
    /// Receiver bound inside the window; `None` in broadcast-only mode.
    pub receiver: Option<UdpSocket>,
    /// Port of `receiver`, advertised in every `DISCOVER`.
    pub receiver_port: Option<u16>,
    /// Broadcast-enabled socket on an ephemeral port.
    pub sender: UdpSocket,
}

impl DiscoverySockets {
    /// Binds the receiver (if a window port is free) and the sender.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] only if the sender cannot be created; a fully
    /// occupied window is not an error.
    pub fn bind(bind_ip: IpAddr, base_port: u16, window: u16) -> Result<Self, BindError> {
        let (receiver, receiver_port) = match bind_in_window(bind_ip, base_port, window) {
            Some((socket, port)) => (Some(socket), Some(port)),
            None => (None, None),
        };
        let sender = bind_broadcast_sender(bind_ip)?;
        Ok(Self {
            receiver,
            receiver_port,
            sender,
        })
    }

    pub fn is_broadcast_only(&self) -> bool {
        self.receiver.is_none()
    }

    /// The sockets to poll for inbound discovery traffic.
    pub fn inbound(&self) -> impl Iterator<Item = &UdpSocket> {
        self.receiver.iter().chain(std::iter::once(&self.sender))
    }

    /// Drops every datagram queued on the inbound sockets.  Returns how many
    /// were dropped.
    ///
    /// Nothing reads these sockets while a session is up, so announcements
    /// pile up in the kernel buffer; they are stale by the time the next
    /// discovery cycle starts.
    pub fn discard_pending(&self, buf: &mut [u8]) -> usize {
        let mut dropped = 0;
        for socket in self.inbound() {
            loop {
                match recv_nonblocking(socket, buf) {
                    Ok(Some(_)) => dropped += 1,
                    Ok(None) => break,
                    Err(e) => {
                        debug!("discovery discard stopped early: {e}");
                        break;
                    }
                }
            }
        }
        dropped
    }
}

/// Binds the first free port in `base..base + window`.
///
/// Returns `None` (and logs a warning) when no port in the window is free,
/// which puts discovery into broadcast-only mode.
pub fn bind_in_window(ip: IpAddr, base: u16, window: u16) -> Option<(UdpSocket, u16)> {
    for offset in 0..window {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::new(ip, port);
        match UdpSocket::bind(addr) {
            Ok(socket) => match configure(&socket, true) {
                Ok(()) => {
                    info!("discovery receiver bound on UDP {addr}");
                    return Some((socket, port));
                }
                Err(e) => debug!("port {port} bound but could not be configured: {e}"),
            },
            Err(e) => debug!("discovery port {port} unavailable: {e}"),
        }
    }
    warn!(
        "no free port in {base}..{}; running discovery in broadcast-only mode",
        u32::from(base) + u32::from(window)
    );
    None
}

/// Binds a broadcast-enabled, non-blocking socket on an ephemeral port.
///
/// # Errors
///
/// Returns [`BindError`] if the socket cannot be bound or configured.
pub fn bind_broadcast_sender(ip: IpAddr) -> Result<UdpSocket, BindError> {
    let addr = SocketAddr::new(ip, 0);
    let socket = UdpSocket::bind(addr).map_err(|source| BindError::BindFailed {
        role: "broadcast",
        addr,
        source,
    })?;
    configure(&socket, true).map_err(|source| BindError::Configure {
        role: "broadcast",
        source,
    })?;
    Ok(socket)
}

/// Binds the non-blocking data socket used for handshake and session traffic.
///
/// # Errors
///
/// Returns [`BindError`] if the port is taken or the socket cannot be
/// configured.
pub fn bind_data_socket(ip: IpAddr, port: u16) -> Result<UdpSocket, BindError> {
    let addr = SocketAddr::new(ip, port);
    let socket = UdpSocket::bind(addr).map_err(|source| BindError::BindFailed {
        role: "data",
        addr,
        source,
    })?;
    configure(&socket, false).map_err(|source| BindError::Configure {
        role: "data",
        source,
    })?;
    info!("data socket bound on UDP {addr}");
    Ok(socket)
}

/// Receives one datagram if one is waiting.
///
/// Returns `Ok(None)` when nothing is queued.  `ConnectionReset` (reported on
/// some platforms after an ICMP port-unreachable) is also treated as "nothing
/// queued", since it carries no datagram.
pub fn recv_nonblocking(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> io::Result<Option<(usize, SocketAddr)>> {
    match socket.recv_from(buf) {
        Ok(pair) => Ok(Some(pair)),
        Err(e) if is_timeout_error(&e) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
        Err(e) => Err(e),
    }
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub fn is_timeout_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn configure(socket: &UdpSocket, broadcast: bool) -> io::Result<()> {
    if broadcast {
        socket.set_broadcast(true)?;
    }
    socket.set_nonblocking(true)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
