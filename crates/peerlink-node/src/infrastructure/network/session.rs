//! The connected session: one receive thread and one heartbeat thread.
//!
//! # Receive thread (`peerlink-session-rx`)
//!
//! Drains the data socket every poll interval and dispatches each frame by
//! type:
//!
//! | Frame        | Action                                                     |
//! |--------------|------------------------------------------------------------|
//! | `COMMAND`    | run the [`CommandHandler`], send its `STATUS` reply        |
//! | `DATA`       | hand to the [`DataConsumer`]                               |
//! | `KEEPALIVE`  | reset the silence clock, optionally echo                   |
//! | `STATUS`     | forward to the status listener, emit an event              |
//! | `DISCONNECT` | end the session (`PeerDisconnected`)                       |
//! | `HANDSHAKE`  | reply `READY` (the peer missed our earlier one)            |
//!
//! Frames from any address other than the peer's are counted as foreign and
//! dropped.  Malformed frames are counted and dropped; the session stays up.
//!
//! # Heartbeat thread (`peerlink-heartbeat`)
//!
//! Sends `KEEPALIVE` every heartbeat interval regardless of other traffic,
//! and ends the session with `LivenessTimeout` once the peer has been silent
//! for longer than the liveness timeout.  Only the peer's `KEEPALIVE` frames
//! count as proof of life.
//!
//! # Teardown
//!
//! Whichever path ends the session first (peer `SHUTDOWN`, peer
//! `DISCONNECT`, liveness timeout or [`Session::close`]) wins the
//! `Connected → Disconnecting` transition; the others see it fail and do
//! nothing.  The winner clears the session's `active` flag, says goodbye to
//! the peer when the shutdown started here, flushes the data consumer and
//! completes the transition to `Disconnected`.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use peerlink_core::protocol::codec::encode_fields;
use peerlink_core::protocol::messages::{commands, CommandMessage, StatusReply, MAX_DATAGRAM_SIZE};
use peerlink_core::{
    decode_message, encode_message, DisconnectReason, HeartbeatTimer, LinkSettings, MessageType,
    NodeIdentity, PeerEndpoint, PeerMessage, ProtocolError, SessionHandle, SessionId,
    SessionState,
};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Span};

use super::binder::recv_nonblocking;
use super::events::{EventSink, LinkCounters, LinkStats, NodeEvent};
use crate::application::consume_data::{current_timestamp_ms, DataConsumer};
use crate::application::handle_commands::{unknown_command, CommandHandler};

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] ProtocolError),

    #[error("failed to send frame to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Frames can only be sent while the session is `Connected`.
    #[error("session is {0}, not connected")]
    NotConnected(SessionState),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Callback invoked for every `STATUS` frame the peer sends.
pub type StatusListener = Arc<dyn Fn(&StatusReply) + Send + Sync>;

/// The application collaborators a session dispatches to.
///
/// Every field is optional: without a consumer `DATA` frames are counted and
/// dropped, and without a command handler every command is answered with
/// `UNKNOWN_COMMAND`.
#[derive(Clone, Default)]
pub struct SessionHandlers {
    pub consumer: Option<Arc<dyn DataConsumer>>,
    pub commands: Option<Arc<dyn CommandHandler>>,
    pub status: Option<StatusListener>,
}

/// Everything a session needs from the connection that produced it.
pub struct SessionContext {
    pub settings: LinkSettings,
    pub session_id: SessionId,
    pub peer: PeerEndpoint,
    pub socket: Arc<UdpSocket>,
    /// Must already be `Connected`.
    pub lifecycle: SessionHandle,
    pub handlers: SessionHandlers,
    pub counters: Arc<LinkCounters>,
    pub events: EventSink,
    /// The node-wide cancellation flag.
    pub running: Arc<AtomicBool>,
}

struct SessionShared {
    id: SessionId,
    local_id: NodeIdentity,
    peer_id: NodeIdentity,
    peer: PeerEndpoint,
    socket: Arc<UdpSocket>,
    lifecycle: SessionHandle,
    active: AtomicBool,
    heartbeat: Mutex<HeartbeatTimer>,
    liveness_timeout: Option<Duration>,
    echo_keepalive: bool,
    poll_interval: Duration,
    handlers: SessionHandlers,
    counters: Arc<LinkCounters>,
    events: EventSink,
    running: Arc<AtomicBool>,
    span: Span,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

/// Join handles of the two session threads.
pub struct SessionWorkers {
    receiver: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl SessionWorkers {
    /// Waits for both threads.  They exit within one poll interval of the
    /// session becoming inactive.
    pub fn join(self) {
        for (name, handle) in [("receive", self.receiver), ("heartbeat", self.heartbeat)] {
            if handle.join().is_err() {
                warn!("session {name} thread panicked");
            }
        }
    }
}

impl Session {
    /// Starts the receive and heartbeat threads for an already-connected
    /// lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] if a thread cannot be started; the
    /// session is then torn down as a transport failure.
    pub fn start(ctx: SessionContext) -> Result<(Session, SessionWorkers), SessionError> {
        let span = info_span!("session", id = %ctx.session_id, peer = %ctx.peer);
        let shared = Arc::new(SessionShared {
            id: ctx.session_id,
            local_id: ctx.settings.local_id.clone(),
            peer_id: ctx.settings.peer_id.clone(),
            peer: ctx.peer,
            socket: ctx.socket,
            lifecycle: ctx.lifecycle,
            active: AtomicBool::new(true),
            heartbeat: Mutex::new(HeartbeatTimer::new(
                ctx.settings.heartbeat_interval,
                Instant::now(),
            )),
            liveness_timeout: ctx.settings.liveness_timeout,
            echo_keepalive: ctx.settings.echo_keepalive,
            poll_interval: ctx.settings.poll_interval,
            handlers: ctx.handlers,
            counters: ctx.counters,
            events: ctx.events,
            running: ctx.running,
            span,
        });
        let session = Session { shared };

        let receiver = session.spawn_worker("peerlink-session-rx", SessionShared::receive_loop)?;
        let heartbeat = match session.spawn_worker("peerlink-heartbeat", SessionShared::heartbeat_loop)
        {
            Ok(handle) => handle,
            Err(e) => {
                if receiver.join().is_err() {
                    warn!("session receive thread panicked");
                }
                return Err(e);
            }
        };

        session.shared.span.in_scope(|| info!("session started"));
        Ok((session, SessionWorkers { receiver, heartbeat }))
    }

    fn spawn_worker(
        &self,
        name: &'static str,
        body: fn(&SessionShared),
    ) -> Result<JoinHandle<()>, SessionError> {
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _entered = shared.span.enter();
                body(&shared);
            });
        match spawned {
            Ok(handle) => Ok(handle),
            Err(source) => {
                self.disconnect(DisconnectReason::Transport(source.to_string()));
                Err(SessionError::Spawn { name, source })
            }
        }
    }

    /// Encodes `message_type` with `fields` and sends it to the peer.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] outside the `Connected` state.
    /// - [`SessionError::Encode`] if the fields do not form a valid frame.
    /// - [`SessionError::Io`] if the socket rejects the datagram.
    pub fn send(&self, message_type: MessageType, fields: &[&str]) -> Result<(), SessionError> {
        self.require_connected()?;
        let frame = encode_fields(message_type, fields)?;
        self.shared.send_frame(&frame)
    }

    /// Sends a typed message to the peer.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send`].
    pub fn send_message(&self, message: &PeerMessage) -> Result<(), SessionError> {
        self.require_connected()?;
        let frame = encode_message(message)?;
        self.shared.send_frame(&frame)
    }

    pub fn session_id(&self) -> SessionId {
        self.shared.id
    }

    pub fn peer(&self) -> PeerEndpoint {
        self.shared.peer
    }

    pub fn current_state(&self) -> SessionState {
        self.shared.lifecycle.current_state()
    }

    /// `false` once teardown has started.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> LinkStats {
        self.shared.counters.snapshot()
    }

    /// Ends the session locally.  Returns `false` if it was already ending.
    pub fn close(&self) -> bool {
        self.disconnect(DisconnectReason::LocalShutdown)
    }

    fn disconnect(&self, reason: DisconnectReason) -> bool {
        let _entered = self.shared.span.enter();
        self.shared.disconnect(reason)
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        match self.current_state() {
            SessionState::Connected => Ok(()),
            other => Err(SessionError::NotConnected(other)),
        }
    }
}

impl SessionShared {
    fn keep_running(&self) -> bool {
        self.active.load(Ordering::Relaxed) && self.running.load(Ordering::Relaxed)
    }

    fn send_frame(&self, frame: &[u8]) -> Result<(), SessionError> {
        let addr = self.peer.data_addr();
        self.socket
            .send_to(frame, addr)
            .map(|_| ())
            .map_err(|source| SessionError::Io { addr, source })
    }

    fn send_or_warn(&self, message: &PeerMessage) {
        let result = encode_message(message)
            .map_err(SessionError::from)
            .and_then(|frame| self.send_frame(&frame));
        if let Err(e) = result {
            warn!("failed to send {}: {e}", message.message_type());
        }
    }

    fn timer(&self) -> MutexGuard<'_, HeartbeatTimer> {
        self.heartbeat.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Receive ───────────────────────────────────────────────────────────────

    fn receive_loop(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while self.keep_running() {
            loop {
                match recv_nonblocking(&self.socket, &mut buf) {
                    Ok(Some((len, src))) => self.dispatch(&buf[..len], src),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("session recv error: {e}");
                        break;
                    }
                }
                if !self.keep_running() {
                    break;
                }
            }
            std::thread::sleep(self.poll_interval);
        }
        debug!("receive thread exiting");
    }

    fn dispatch(&self, datagram: &[u8], src: SocketAddr) {
        if src.ip() != self.peer.address {
            LinkCounters::bump(&self.counters.foreign_frames);
            debug!("dropping datagram from foreign address {src}");
            return;
        }
        LinkCounters::bump(&self.counters.frames_received);

        let message = match decode_message(datagram) {
            Ok(message) => message,
            Err(e) => {
                LinkCounters::bump(&self.counters.malformed_frames);
                warn!("discarding malformed datagram from {src}: {e}");
                return;
            }
        };

        match message {
            PeerMessage::Command(command) => self.handle_command(command),
            PeerMessage::Data(data) => {
                LinkCounters::bump(&self.counters.data_frames);
                match &self.handlers.consumer {
                    Some(consumer) => {
                        consumer.append(current_timestamp_ms(), &data.payload_type, &data.value)
                    }
                    None => debug!("no data consumer; dropping {} record", data.payload_type),
                }
            }
            PeerMessage::KeepAlive { sender_id } if sender_id == self.peer_id => {
                self.on_keepalive();
            }
            PeerMessage::Status(reply) => {
                LinkCounters::bump(&self.counters.status_received);
                info!("peer status: {reply}");
                if let Some(listener) = &self.handlers.status {
                    listener(&reply);
                }
                self.events.emit(NodeEvent::StatusReceived(reply));
            }
            PeerMessage::Disconnect { sender_id } if sender_id == self.peer_id => {
                info!("peer said goodbye");
                self.disconnect(DisconnectReason::PeerDisconnected);
            }
            PeerMessage::Handshake { sender_id } if sender_id == self.peer_id => {
                debug!("late HANDSHAKE; answering READY");
                self.send_or_warn(&PeerMessage::Ready {
                    sender_id: self.local_id.clone(),
                });
            }
            other => {
                debug!("ignoring {} while connected", other.message_type());
            }
        }
    }

    fn handle_command(&self, command: CommandMessage) {
        LinkCounters::bump(&self.counters.commands_handled);
        debug!("command {} args={:?}", command.name, command.args);

        let reply = match &self.handlers.commands {
            Some(handler) => handler.handle(&command.name, command.args.as_deref()),
            None => unknown_command(),
        };
        self.send_or_warn(&PeerMessage::Status(reply));

        if command.name == commands::SHUTDOWN {
            info!("peer requested shutdown");
            self.disconnect(DisconnectReason::PeerShutdown);
        }
    }

    fn on_keepalive(&self) {
        LinkCounters::bump(&self.counters.keepalives_received);
        let now = Instant::now();
        let echo = {
            let mut timer = self.timer();
            timer.record_received(now);
            // Echo only when our own last KEEPALIVE is at least half an
            // interval old, so two echoing nodes settle instead of looping.
            let echo = self.echo_keepalive && timer.until_next_send(now) <= timer.interval() / 2;
            if echo {
                timer.record_sent(now);
            }
            echo
        };
        if echo {
            self.send_keepalive();
        }
    }

    // ── Heartbeat ─────────────────────────────────────────────────────────────

    fn heartbeat_loop(&self) {
        while self.keep_running() {
            let now = Instant::now();
            let (send_due, expired, silence) = {
                let mut timer = self.timer();
                let send_due = timer.is_send_due(now);
                if send_due {
                    timer.record_sent(now);
                }
                (
                    send_due,
                    timer.is_expired(now, self.liveness_timeout),
                    timer.silence(now),
                )
            };

            if expired {
                warn!("no KEEPALIVE from peer for {silence:?}; dropping session");
                self.disconnect(DisconnectReason::LivenessTimeout);
                break;
            }
            if send_due {
                self.send_keepalive();
            }
            std::thread::sleep(self.poll_interval);
        }
        debug!("heartbeat thread exiting");
    }

    fn send_keepalive(&self) {
        LinkCounters::bump(&self.counters.keepalives_sent);
        self.send_or_warn(&PeerMessage::KeepAlive {
            sender_id: self.local_id.clone(),
        });
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    fn disconnect(&self, reason: DisconnectReason) -> bool {
        let began = self
            .events
            .transition(&self.lifecycle, |lc| lc.begin_disconnect(reason.clone()));
        if began.is_err() {
            debug!("session already ending; ignoring {reason}");
            return false;
        }
        self.active.store(false, Ordering::Relaxed);

        if matches!(
            reason,
            DisconnectReason::LocalShutdown | DisconnectReason::LivenessTimeout
        ) {
            self.send_or_warn(&PeerMessage::Disconnect {
                sender_id: self.local_id.clone(),
            });
        }

        if let Some(consumer) = &self.handlers.consumer {
            if let Err(e) = consumer.flush() {
                warn!("failed to flush data consumer: {e}");
            }
        }

        if let Err(e) = self.events.transition(&self.lifecycle, |lc| lc.finish_disconnect()) {
            warn!("could not complete disconnect: {e}");
        }
        info!("session ended: {reason}");
        self.events.emit(NodeEvent::Disconnected { reason });
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::consume_data::ConsumerError;
    use mockall::mock;
    use peerlink_core::HandshakeState;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::sync::mpsc;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    mock! {
        pub Consumer {}
        impl DataConsumer for Consumer {
            fn append(&self, timestamp_ms: u64, payload_type: &str, value: &str);
            fn flush(&self) -> Result<(), ConsumerError>;
        }
    }

    struct Harness {
        session: Session,
        workers: SessionWorkers,
        peer: UdpSocket,
        events: mpsc::Receiver<NodeEvent>,
    }

    fn settings() -> LinkSettings {
        let mut s = LinkSettings::new(
            NodeIdentity::new("SESS_A").unwrap(),
            NodeIdentity::new("SESS_B").unwrap(),
        );
        s.heartbeat_interval = Duration::from_millis(50);
        s.liveness_timeout = None;
        s.poll_interval = Duration::from_millis(2);
        s
    }

    fn connected_lifecycle(peer: PeerEndpoint) -> (SessionHandle, SessionId) {
        let lifecycle = SessionHandle::new();
        let mut hs = HandshakeState::new(1);
        hs.on_handshake();
        hs.on_ready();
        let id = lifecycle
            .apply(|lc| {
                lc.begin_discovery()?;
                lc.peer_found(peer)?;
                lc.handshake_succeeded(&hs)
            })
            .unwrap();
        (lifecycle, id)
    }

    fn start(settings: LinkSettings, handlers: SessionHandlers) -> Harness {
        let socket = UdpSocket::bind((LOCALHOST, 0)).unwrap();
        socket.set_nonblocking(true).unwrap();
        let peer = UdpSocket::bind((LOCALHOST, 0)).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        peer.connect(socket.local_addr().unwrap()).unwrap();
        let endpoint = PeerEndpoint::from_data_addr(peer.local_addr().unwrap());
        let (lifecycle, session_id) = connected_lifecycle(endpoint);
        let (tx, events) = mpsc::channel(64);

        let (session, workers) = Session::start(SessionContext {
            settings,
            session_id,
            peer: endpoint,
            socket: Arc::new(socket),
            lifecycle,
            handlers,
            counters: Arc::new(LinkCounters::default()),
            events: EventSink::new(tx),
            running: Arc::new(AtomicBool::new(true)),
        })
        .unwrap();
        Harness {
            session,
            workers,
            peer,
            events,
        }
    }

    /// Reads frames until one starts with `prefix`, skipping heartbeats.
    fn recv_frame(peer: &UdpSocket, prefix: &str) -> String {
        let mut buf = [0u8; 512];
        loop {
            let len = peer.recv(&mut buf).expect("frame before timeout");
            let text = String::from_utf8_lossy(&buf[..len]).into_owned();
            if text.starts_with(prefix) {
                return text;
            }
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_command_reply_comes_from_handler() {
        // Arrange
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let handler = move |name: &str, args: Option<&str>| {
            log.lock().unwrap().push((name.to_string(), args.map(str::to_string)));
            StatusReply::with_details("RUNNING", "ok")
        };
        let handlers = SessionHandlers {
            commands: Some(Arc::new(handler)),
            ..Default::default()
        };
        let h = start(settings(), handlers);

        // Act
        h.peer.send(b"COMMAND:GET_STATUS").unwrap();

        // Assert
        assert_eq!(recv_frame(&h.peer, "STATUS:"), "STATUS:RUNNING:ok");
        assert_eq!(*seen.lock().unwrap(), vec![("GET_STATUS".to_string(), None)]);
        h.session.close();
        h.workers.join();
    }

    #[test]
    fn test_missing_handler_answers_unknown_command() {
        let h = start(settings(), SessionHandlers::default());

        h.peer.send(b"COMMAND:OPEN_FILE:x").unwrap();

        assert_eq!(recv_frame(&h.peer, "STATUS:"), "STATUS:UNKNOWN_COMMAND");
        h.session.close();
        h.workers.join();
    }

    #[test]
    fn test_data_frames_reach_consumer() {
        // Arrange
        let mut consumer = MockConsumer::new();
        consumer
            .expect_append()
            .withf(|_, ty, value| ty == "HEALTH" && value == "87:full")
            .times(1)
            .return_const(());
        consumer.expect_flush().returning(|| Ok(()));
        let handlers = SessionHandlers {
            consumer: Some(Arc::new(consumer)),
            ..Default::default()
        };
        let h = start(settings(), handlers);

        // Act
        h.peer.send(b"DATA:HEALTH:87:full").unwrap();

        // Assert
        assert!(wait_until(|| h.session.stats().data_frames == 1));
        h.session.close();
        h.workers.join();
    }

    #[test]
    fn test_shutdown_command_flushes_consumer_then_disconnects() {
        // Arrange
        let mut consumer = MockConsumer::new();
        consumer.expect_flush().times(1).returning(|| Ok(()));
        let handlers = SessionHandlers {
            consumer: Some(Arc::new(consumer)),
            commands: Some(Arc::new(|_: &str, _: Option<&str>| {
                StatusReply::new("SHUTTING_DOWN")
            })),
            ..Default::default()
        };
        let mut h = start(settings(), handlers);

        // Act
        h.peer.send(b"COMMAND:SHUTDOWN").unwrap();

        // Assert
        assert_eq!(recv_frame(&h.peer, "STATUS:"), "STATUS:SHUTTING_DOWN");
        assert!(wait_until(|| h.session.current_state() == SessionState::Disconnected));
        h.workers.join();
        let mut saw_disconnect = false;
        while let Ok(event) = h.events.try_recv() {
            if event
                == (NodeEvent::Disconnected {
                    reason: DisconnectReason::PeerShutdown,
                })
            {
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);
    }

    #[test]
    fn test_malformed_frame_is_counted_and_session_stays_up() {
        let h = start(settings(), SessionHandlers::default());

        h.peer.send(b"GARBAGE").unwrap();

        assert!(wait_until(|| h.session.stats().malformed_frames == 1));
        assert_eq!(h.session.current_state(), SessionState::Connected);
        h.session.close();
        h.workers.join();
    }

    #[test]
    fn test_peer_disconnect_ends_session() {
        let h = start(settings(), SessionHandlers::default());

        h.peer.send(b"DISCONNECT:SESS_B").unwrap();

        assert!(wait_until(|| h.session.current_state() == SessionState::Disconnected));
        assert!(!h.session.is_active());
        h.workers.join();
    }

    #[test]
    fn test_close_sends_disconnect_and_is_idempotent() {
        // Arrange
        let h = start(settings(), SessionHandlers::default());

        // Act
        let first = h.session.close();
        let second = h.session.close();

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(recv_frame(&h.peer, "DISCONNECT:"), "DISCONNECT:SESS_A");
        h.workers.join();
    }

    #[test]
    fn test_heartbeat_is_sent_without_other_traffic() {
        let h = start(settings(), SessionHandlers::default());

        assert_eq!(recv_frame(&h.peer, "KEEPALIVE:"), "KEEPALIVE:SESS_A");
        assert_eq!(recv_frame(&h.peer, "KEEPALIVE:"), "KEEPALIVE:SESS_A");

        h.session.close();
        h.workers.join();
    }

    #[test]
    fn test_late_handshake_is_answered_with_ready() {
        let h = start(settings(), SessionHandlers::default());

        h.peer.send(b"HANDSHAKE:SESS_B").unwrap();

        assert_eq!(recv_frame(&h.peer, "READY:"), "READY:SESS_A");
        h.session.close();
        h.workers.join();
    }

    #[test]
    fn test_send_after_close_is_rejected() {
        let h = start(settings(), SessionHandlers::default());
        h.session.close();

        let result = h.session.send(MessageType::Data, &["HEALTH", "1"]);

        assert!(matches!(
            result,
            Err(SessionError::NotConnected(SessionState::Disconnected))
        ));
        h.workers.join();
    }

    #[test]
    fn test_send_rejects_invalid_fields() {
        let h = start(settings(), SessionHandlers::default());

        let result = h.session.send(MessageType::KeepAlive, &["has space"]);

        assert!(matches!(result, Err(SessionError::Encode(_))));
        h.session.close();
        h.workers.join();
    }

    // Liveness timeout is a hardening addition on top of the basic protocol.
    #[test]
    fn test_liveness_timeout_fires_despite_data_traffic() {
        // Arrange
        let mut s = settings();
        s.liveness_timeout = Some(Duration::from_millis(150));
        let h = start(s, SessionHandlers::default());

        // Act: keep DATA flowing but never send KEEPALIVE
        let fired = wait_until(|| {
            let _ = h.peer.send(b"DATA:TICK:1");
            h.session.current_state() == SessionState::Disconnected
        });

        // Assert
        assert!(fired);
        assert!(h.session.stats().data_frames > 0);
        assert_eq!(recv_frame(&h.peer, "DISCONNECT:"), "DISCONNECT:SESS_A");
        h.workers.join();
    }

    #[test]
    fn test_keepalives_hold_the_session_open() {
        // Arrange
        let mut s = settings();
        s.liveness_timeout = Some(Duration::from_millis(150));
        let h = start(s, SessionHandlers::default());

        // Act
        let deadline = Instant::now() + Duration::from_millis(400);
        while Instant::now() < deadline {
            h.peer.send(b"KEEPALIVE:SESS_B").unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }

        // Assert
        assert_eq!(h.session.current_state(), SessionState::Connected);
        h.session.close();
        h.workers.join();
    }
}
