//! PeerNode: owns the node lifecycle loop.
//!
//! One connection cycle is:
//!
//! ```text
//! Idle/Disconnected ─► Discovering ─► Handshaking ─► Connected ─► Disconnecting ─► Disconnected
//!                          │               │
//!                          └───────────────┴──────── abort ─────────────────────► Disconnected
//! ```
//!
//! After a cycle ends the node starts the next one when `reconnect` is on and
//! the reason is retryable.  A peer `SHUTDOWN` command stops the node
//! instead.
//!
//! All sockets are bound once in [`PeerNode::spawn`], before the first
//! discovery broadcast, so a bind failure is reported to the caller
//! immediately and a faster peer's early `HANDSHAKE` waits in the data
//! socket's buffer.  They are released when the node thread exits.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use peerlink_core::protocol::messages::{StatusReply, MAX_DATAGRAM_SIZE};
use peerlink_core::{
    DisconnectReason, DiscoveryTracker, LinkSettings, MessageType, PeerEndpoint, PeerMessage,
    SessionHandle, SessionLifecycle, SessionState, SettingsError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::binder::{bind_data_socket, BindError, DiscoverySockets};
use super::discovery::{run_discovery, DiscoveryOutcome};
use super::events::{EventSink, LinkCounters, LinkStats, NodeEvent};
use super::handshake::{run_handshake, HandshakeIo, HandshakeOutcome};
use super::session::{Session, SessionContext, SessionError, SessionHandlers, SessionWorkers};
use crate::application::consume_data::DataConsumer;
use crate::application::handle_commands::CommandHandler;

/// Error type for node construction and control.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("failed to spawn node thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("node thread panicked")]
    Panicked,
}

/// Builder for one node.  Call [`PeerNode::spawn`] to start it.
pub struct PeerNode {
    settings: LinkSettings,
    handlers: SessionHandlers,
    events: EventSink,
}

impl PeerNode {
    /// Validates `settings` and returns a node with no collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Settings`] if the settings are inconsistent.
    pub fn new(settings: LinkSettings) -> Result<Self, NodeError> {
        settings.validate()?;
        Ok(Self {
            settings,
            handlers: SessionHandlers::default(),
            events: EventSink::disabled(),
        })
    }

    /// Registers the callback for inbound `DATA` frames.
    pub fn on_data(self, consumer: impl DataConsumer + 'static) -> Self {
        self.with_consumer(Arc::new(consumer))
    }

    pub fn with_consumer(mut self, consumer: Arc<dyn DataConsumer>) -> Self {
        self.handlers.consumer = Some(consumer);
        self
    }

    /// Registers the handler that answers inbound `COMMAND` frames.
    pub fn on_command(self, handler: impl CommandHandler + 'static) -> Self {
        self.with_command_handler(Arc::new(handler))
    }

    pub fn with_command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.commands = Some(handler);
        self
    }

    /// Registers a listener for the peer's `STATUS` replies.
    pub fn on_status(mut self, listener: impl Fn(&StatusReply) + Send + Sync + 'static) -> Self {
        self.handlers.status = Some(Arc::new(listener));
        self
    }

    /// Publishes [`NodeEvent`]s on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<NodeEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Binds every socket and starts the `peerlink-node` thread.
    ///
    /// # Errors
    ///
    /// - [`NodeError::Bind`] if the data port or the broadcast sender cannot
    ///   be bound.  A full discovery window is not an error.
    /// - [`NodeError::Spawn`] if the thread cannot be started.
    pub fn spawn(self) -> Result<NodeHandle, NodeError> {
        let settings = self.settings;
        let discovery = if settings.discovery_enabled {
            Some(DiscoverySockets::bind(
                settings.bind_address,
                settings.discovery_base_port,
                settings.discovery_window,
            )?)
        } else {
            None
        };
        let data_socket = Arc::new(bind_data_socket(settings.bind_address, settings.data_port)?);
        let data_addr = data_socket
            .local_addr()
            .map_err(|source| BindError::Configure {
                role: "data",
                source,
            })?;

        let lifecycle = SessionHandle::new();
        let running = Arc::new(AtomicBool::new(true));
        let session = Arc::new(Mutex::new(None));
        let counters = Arc::new(LinkCounters::default());

        let runtime = NodeRuntime {
            settings,
            handlers: self.handlers,
            events: self.events,
            lifecycle: lifecycle.clone(),
            counters: Arc::clone(&counters),
            running: Arc::clone(&running),
            session: Arc::clone(&session),
            data_socket,
            discovery,
        };
        let thread = std::thread::Builder::new()
            .name("peerlink-node".to_string())
            .spawn(move || runtime.run())
            .map_err(NodeError::Spawn)?;

        info!("node listening for session traffic on {data_addr}");
        Ok(NodeHandle {
            lifecycle,
            running,
            session,
            counters,
            data_addr,
            thread,
        })
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Control surface of a running node.
pub struct NodeHandle {
    lifecycle: SessionHandle,
    running: Arc<AtomicBool>,
    session: Arc<Mutex<Option<Session>>>,
    counters: Arc<LinkCounters>,
    data_addr: SocketAddr,
    thread: JoinHandle<()>,
}

impl NodeHandle {
    pub fn current_state(&self) -> SessionState {
        self.lifecycle.current_state()
    }

    /// Full lifecycle copy, including the peer and the last disconnect reason.
    pub fn snapshot(&self) -> SessionLifecycle {
        self.lifecycle.snapshot()
    }

    /// The live session, if the node is connected.
    pub fn session(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    /// Sends a frame on the live session.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] when there is no connected session,
    /// otherwise whatever [`Session::send`] reports.
    pub fn send(&self, message_type: MessageType, fields: &[&str]) -> Result<(), SessionError> {
        match self.session() {
            Some(session) => session.send(message_type, fields),
            None => Err(SessionError::NotConnected(self.current_state())),
        }
    }

    /// Sends a typed message on the live session.
    ///
    /// # Errors
    ///
    /// Same as [`NodeHandle::send`].
    pub fn send_message(&self, message: &PeerMessage) -> Result<(), SessionError> {
        match self.session() {
            Some(session) => session.send_message(message),
            None => Err(SessionError::NotConnected(self.current_state())),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    /// Address the data socket is bound to.
    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.thread.is_finished()
    }

    /// Asks the node to stop.  A connected session says goodbye to the peer
    /// first.  Returns immediately; use [`NodeHandle::join`] to wait.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Waits for the node thread, which in turn has joined every session
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Panicked`] if the node thread panicked.
    pub fn join(self) -> Result<(), NodeError> {
        self.thread.join().map_err(|_| NodeError::Panicked)
    }
}

// ── Lifecycle loop ────────────────────────────────────────────────────────────

struct NodeRuntime {
    settings: LinkSettings,
    handlers: SessionHandlers,
    events: EventSink,
    lifecycle: SessionHandle,
    counters: Arc<LinkCounters>,
    running: Arc<AtomicBool>,
    session: Arc<Mutex<Option<Session>>>,
    data_socket: Arc<UdpSocket>,
    discovery: Option<DiscoverySockets>,
}

impl NodeRuntime {
    fn run(self) {
        info!(
            "node {} looking for {}",
            self.settings.local_id, self.settings.peer_id
        );

        while self.running.load(Ordering::Relaxed) {
            let reason = self.run_cycle();

            if reason == DisconnectReason::PeerShutdown {
                info!("peer asked this node to shut down");
                self.running.store(false, Ordering::Relaxed);
            } else if !reason.is_retryable() {
                break;
            } else if !self.settings.reconnect {
                info!("reconnect disabled; node stopping after: {reason}");
                break;
            } else if self.running.load(Ordering::Relaxed) {
                info!("connection cycle ended ({reason}); rediscovering");
            }
        }

        info!("node {} stopped", self.settings.local_id);
    }

    /// Runs discovery, handshake and session once.  Returns why it ended.
    fn run_cycle(&self) -> DisconnectReason {
        if let Err(e) = self.events.transition(&self.lifecycle, |lc| lc.begin_discovery()) {
            error!("cannot start discovery: {e}");
            return DisconnectReason::Cancelled;
        }

        let mut tracker = DiscoveryTracker::new(
            self.settings.local_id.clone(),
            self.settings.peer_id.clone(),
        );
        tracker.start();

        let peer = match self.resolve_peer(&mut tracker) {
            Ok(peer) => peer,
            Err(reason) => return self.abort(reason),
        };
        if let Err(e) = self.events.transition(&self.lifecycle, |lc| lc.peer_found(peer)) {
            error!("cannot record peer: {e}");
            return self.abort(DisconnectReason::Transport(e.to_string()));
        }
        self.events.emit(NodeEvent::PeerFound(peer));

        let io = HandshakeIo {
            data_socket: &self.data_socket,
            discovery: self.discovery.as_ref(),
            counters: &self.counters,
        };
        let handshake = match run_handshake(&self.settings, &io, &peer, &mut tracker, &self.running)
        {
            Ok(HandshakeOutcome::Complete(state)) => state,
            Ok(HandshakeOutcome::Failed { attempts }) => {
                self.events.emit(NodeEvent::HandshakeFailed { attempts });
                return self.abort(DisconnectReason::HandshakeFailed { attempts });
            }
            Ok(HandshakeOutcome::Cancelled) => return self.abort(DisconnectReason::Cancelled),
            Err(e) => return self.abort(DisconnectReason::Transport(e.to_string())),
        };

        let session_id = match self
            .events
            .transition(&self.lifecycle, |lc| lc.handshake_succeeded(&handshake))
        {
            Ok(id) => id,
            Err(e) => {
                error!("cannot enter connected state: {e}");
                return self.abort(DisconnectReason::Transport(e.to_string()));
            }
        };
        info!("connected to {} at {peer} (session {session_id})", self.settings.peer_id);
        self.events.emit(NodeEvent::Connected { session_id, peer });

        match Session::start(SessionContext {
            settings: self.settings.clone(),
            session_id,
            peer,
            socket: Arc::clone(&self.data_socket),
            lifecycle: self.lifecycle.clone(),
            handlers: self.handlers.clone(),
            counters: Arc::clone(&self.counters),
            events: self.events.clone(),
            running: Arc::clone(&self.running),
        }) {
            Ok((session, workers)) => self.supervise(session, workers),
            Err(e) => {
                error!("failed to start session: {e}");
                self.last_disconnect()
            }
        }
    }

    fn resolve_peer(&self, tracker: &mut DiscoveryTracker) -> Result<PeerEndpoint, DisconnectReason> {
        let Some(sockets) = &self.discovery else {
            return self.manual_peer().ok_or_else(|| {
                DisconnectReason::Transport("no peer address configured".to_string())
            });
        };

        match run_discovery(&self.settings, sockets, tracker, &self.counters, &self.running) {
            Ok(DiscoveryOutcome::Found(peer)) => Ok(peer),
            Ok(DiscoveryOutcome::Cancelled) => Err(DisconnectReason::Cancelled),
            Ok(DiscoveryOutcome::TimedOut) => match self.manual_peer() {
                Some(peer) => {
                    info!("discovery timed out; falling back to {}", peer.data_addr());
                    self.events.emit(NodeEvent::DiscoveryTimedOut {
                        manual_fallback: true,
                    });
                    Ok(peer)
                }
                None => {
                    warn!(
                        "could not find {}; retry, or pass --peer-address <ip:port> to connect directly",
                        self.settings.peer_id
                    );
                    self.events.emit(NodeEvent::DiscoveryTimedOut {
                        manual_fallback: false,
                    });
                    Err(DisconnectReason::DiscoveryTimedOut)
                }
            },
            Err(e) => Err(DisconnectReason::Transport(e.to_string())),
        }
    }

    fn manual_peer(&self) -> Option<PeerEndpoint> {
        self.settings.manual_peer.map(PeerEndpoint::from_data_addr)
    }

    /// Publishes `session` until it ends, closing it if the node is stopped.
    ///
    /// Discovery traffic that arrives meanwhile is dropped, so the next
    /// cycle starts from announcements sent after this session ended.
    fn supervise(&self, session: Session, workers: SessionWorkers) -> DisconnectReason {
        *lock(&self.session) = Some(session.clone());
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while session.is_active() {
            if !self.running.load(Ordering::Relaxed) {
                session.close();
                break;
            }
            self.discard_discovery_backlog(&mut buf);
            std::thread::sleep(self.settings.poll_interval);
        }

        workers.join();
        *lock(&self.session) = None;
        self.discard_discovery_backlog(&mut buf);
        debug!("session {} threads joined", session.session_id());
        self.last_disconnect()
    }

    fn discard_discovery_backlog(&self, buf: &mut [u8]) {
        if let Some(sockets) = &self.discovery {
            let dropped = sockets.discard_pending(buf);
            if dropped > 0 {
                debug!("dropped {dropped} discovery datagram(s) received while connected");
            }
        }
    }

    fn abort(&self, reason: DisconnectReason) -> DisconnectReason {
        if let Err(e) = self
            .events
            .transition(&self.lifecycle, |lc| lc.abort(reason.clone()))
        {
            warn!("abort after {reason} was rejected: {e}");
        }
        reason
    }

    fn last_disconnect(&self) -> DisconnectReason {
        self.lifecycle
            .snapshot()
            .last_disconnect()
            .cloned()
            .unwrap_or(DisconnectReason::LocalShutdown)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
