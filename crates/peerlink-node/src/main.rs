//! PeerLink node: entry point.
//!
//! Finds the configured peer on the LAN, confirms it with a handshake and
//! keeps the session alive with heartbeats.  Inbound `DATA` records are
//! buffered and written to the log; inbound `COMMAND`s are answered by the
//! recorder's command set.
//!
//! # Usage
//!
//! ```text
//! peerlink-node [OPTIONS]
//!
//! Options:
//!   --config <PATH>                Config file [default: platform config dir]
//!   --node-id <ID>                 This node's identity
//!   --peer-id <ID>                 The identity to look for
//!   --data-port <PORT>             Handshake/session port
//!   --discovery-base-port <PORT>   First port of the discovery window
//!   --broadcast-address <IP>       Destination of DISCOVER broadcasts
//!   --peer-address <IP:PORT>       Peer's data socket; skips or backs up discovery
//!   --no-discovery                 Connect to --peer-address directly
//!   --no-reconnect                 Exit after the first session ends
//!   --log-level <LEVEL>            Used when RUST_LOG is unset
//! ```
//!
//! Command-line values override the config file.  Every option except the
//! two switches can also be set through a `PEERLINK_*` environment variable.
//!
//! # Console
//!
//! While running, the node reads commands from stdin:
//!
//! | Input                  | Effect                                       |
//! |------------------------|----------------------------------------------|
//! | `status`               | print state, peer and traffic counters       |
//! | `cmd <NAME> [ARGS]`    | send `COMMAND:<NAME>[:ARGS]` to the peer     |
//! | `data <TYPE> <VALUE>`  | send `DATA:<TYPE>:<VALUE>` to the peer       |
//! | `quit`                 | stop the node                                |
//!
//! # Architecture
//!
//! ```text
//! main()
//!  ├─ BufferedRecorder + persistence worker   (peerlink-persist thread)
//!  ├─ PeerNode                                (peerlink-node thread)
//!  │    └─ Session                            (peerlink-session-rx, peerlink-heartbeat)
//!  ├─ console reader                          (peerlink-console thread)
//!  └─ Tokio runtime: Ctrl-C, events, console dispatch
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use peerlink_core::MessageType;
use peerlink_node::application::consume_data::{spawn_persistence_worker, BufferedRecorder};
use peerlink_node::application::handle_commands::RecorderCommands;
use peerlink_node::infrastructure::network::connection_manager::{NodeHandle, PeerNode};
use peerlink_node::infrastructure::network::events::NodeEvent;
use peerlink_node::infrastructure::recording::LogSink;
use peerlink_node::infrastructure::storage::config::{load_config, AppConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// PeerLink node.
#[derive(Debug, Parser)]
#[command(
    name = "peerlink-node",
    about = "Finds a named peer on the LAN and keeps a UDP session with it",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "PEERLINK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "PEERLINK_NODE_ID")]
    node_id: Option<String>,

    #[arg(long, env = "PEERLINK_PEER_ID")]
    peer_id: Option<String>,

    #[arg(long, env = "PEERLINK_DATA_PORT")]
    data_port: Option<u16>,

    #[arg(long, env = "PEERLINK_DISCOVERY_BASE_PORT")]
    discovery_base_port: Option<u16>,

    #[arg(long, env = "PEERLINK_BROADCAST_ADDRESS")]
    broadcast_address: Option<String>,

    /// `ip:port` of the peer's data socket.
    ///
    /// Used directly with `--no-discovery`, otherwise as the fallback when
    /// discovery times out.
    #[arg(long, env = "PEERLINK_PEER_ADDRESS")]
    peer_address: Option<String>,

    #[arg(long)]
    no_discovery: bool,

    #[arg(long)]
    no_reconnect: bool,

    /// `error`, `warn`, `info`, `debug` or `trace`.
    #[arg(long, env = "PEERLINK_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Overlays the command-line values onto `config`.
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(id) = &self.node_id {
            config.node.id = id.clone();
        }
        if let Some(id) = &self.peer_id {
            config.node.peer_id = id.clone();
        }
        if let Some(level) = &self.log_level {
            config.node.log_level = level.clone();
        }
        if let Some(port) = self.data_port {
            config.network.data_port = port;
        }
        if let Some(port) = self.discovery_base_port {
            config.network.discovery_base_port = port;
        }
        if let Some(addr) = &self.broadcast_address {
            config.network.broadcast_address = addr.clone();
        }
        if let Some(addr) = &self.peer_address {
            config.network.peer_address = Some(addr.clone());
        }
        if self.no_discovery {
            config.session.discovery_enabled = false;
        }
        if self.no_reconnect {
            config.session.reconnect = false;
        }
    }
}

// ── Console ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Status,
    Command { name: String, args: Option<String> },
    Data { payload_type: String, value: String },
    Quit,
}

/// Parses one console line.  Blank lines yield `Ok(None)`.
fn parse_console_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb {
        "status" => ConsoleCommand::Status,
        "quit" | "exit" => ConsoleCommand::Quit,
        "cmd" => {
            if rest.is_empty() {
                return Err("usage: cmd <NAME> [ARGS]".to_string());
            }
            let (name, args) = match rest.split_once(char::is_whitespace) {
                Some((name, args)) => (name, Some(args.trim().to_string())),
                None => (rest, None),
            };
            ConsoleCommand::Command {
                name: name.to_string(),
                args,
            }
        }
        "data" => match rest.split_once(char::is_whitespace) {
            Some((payload_type, value)) => ConsoleCommand::Data {
                payload_type: payload_type.to_string(),
                value: value.trim().to_string(),
            },
            None => return Err("usage: data <TYPE> <VALUE>".to_string()),
        },
        other => return Err(format!("unknown console command {other:?}")),
    };
    Ok(Some(command))
}

/// Starts the console reader on a detached `peerlink-console` thread.
///
/// This is the node's only blocking read: a pending stdin read cannot be
/// interrupted portably, so the thread is never joined.  It owns no socket
/// and exits on end of input or once the receiving side is dropped; process
/// exit reclaims it otherwise.
fn spawn_console_reader(tx: mpsc::Sender<ConsoleCommand>) -> std::io::Result<()> {
    let detached = std::thread::Builder::new()
        .name("peerlink-console".to_string())
        .spawn(move || forward_console_lines(std::io::stdin().lock(), &tx))?;
    drop(detached);
    Ok(())
}

/// Parses each line of `input` and forwards the commands to `tx`.  Returns
/// when input ends or the receiver is gone.
fn forward_console_lines(input: impl BufRead, tx: &mpsc::Sender<ConsoleCommand>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        match parse_console_line(&line) {
            Ok(Some(command)) => {
                if tx.blocking_send(command).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(msg) => warn!("{msg}"),
        }
    }
}

/// Runs one console command.  Returns `false` when the node should stop.
fn run_console_command(
    node: &NodeHandle,
    recorder: &BufferedRecorder,
    command: ConsoleCommand,
) -> bool {
    let result = match command {
        ConsoleCommand::Quit => return false,
        ConsoleCommand::Status => {
            let snapshot = node.snapshot();
            let peer = snapshot
                .peer()
                .map_or_else(|| "none".to_string(), |p| p.to_string());
            info!(
                "state={} peer={peer} last_disconnect={:?}",
                snapshot.state(),
                snapshot.last_disconnect()
            );
            info!("traffic: {:?}", node.stats());
            info!("recorder: {:?}", recorder.status());
            Ok(())
        }
        ConsoleCommand::Command { name, args } => {
            let mut fields = vec![name.as_str()];
            fields.extend(args.as_deref());
            node.send(MessageType::Command, &fields)
        }
        ConsoleCommand::Data {
            payload_type,
            value,
        } => node.send(MessageType::Data, &[payload_type.as_str(), value.as_str()]),
    };
    if let Err(e) = result {
        warn!("{e}");
    }
    true
}

fn log_event(event: &NodeEvent) {
    match event {
        NodeEvent::StateChanged { from, to } => info!("state: {from} -> {to}"),
        NodeEvent::PeerFound(peer) => info!("peer found at {peer}"),
        NodeEvent::Connected { session_id, peer } => {
            info!("connected to {peer} (session {session_id})")
        }
        NodeEvent::HandshakeFailed { attempts } => {
            warn!("handshake failed after {attempts} attempts; will retry")
        }
        NodeEvent::DiscoveryTimedOut { manual_fallback } => {
            if *manual_fallback {
                info!("discovery timed out; using --peer-address")
            } else {
                warn!("discovery timed out; pass --peer-address <ip:port> to connect directly")
            }
        }
        NodeEvent::StatusReceived(reply) => info!("peer replied: {reply}"),
        NodeEvent::Disconnected { reason } => info!("disconnected: {reason}"),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("failed to load config")?;
    cli.apply_to(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    let settings = config.into_settings().context("invalid configuration")?;
    info!(
        "PeerLink node {} starting; looking for {}",
        settings.local_id, settings.peer_id
    );

    // ── Recorder ──────────────────────────────────────────────────────────────
    let recorder = Arc::new(BufferedRecorder::new(LogSink::new()));
    let persisting = Arc::new(AtomicBool::new(true));
    let persist_worker = spawn_persistence_worker(
        Arc::clone(&recorder),
        Duration::from_millis(config.session.persist_interval_ms.max(1)),
        Arc::clone(&persisting),
    )
    .context("failed to start persistence worker")?;

    // ── Node ──────────────────────────────────────────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let node = PeerNode::new(settings)?
        .with_consumer(recorder.clone())
        .on_command(RecorderCommands::new(Arc::clone(&recorder)))
        .with_events(event_tx)
        .spawn()
        .context("failed to start node")?;

    let (console_tx, mut console_rx) = mpsc::channel(16);
    spawn_console_reader(console_tx).context("failed to start console reader")?;

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl-C; shutting down");
                shutdown_flag.store(true, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    });

    info!("node ready; type `status`, `cmd <NAME> [ARGS]`, `data <TYPE> <VALUE>` or `quit`");

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => log_event(&event),
            Some(command) = console_rx.recv() => {
                if !run_console_command(&node, &recorder, command) {
                    break;
                }
            }
            _ = ticker.tick() => {
                if shutdown.load(Ordering::Relaxed) || !node.is_running() {
                    break;
                }
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    node.stop();
    tokio::task::spawn_blocking(move || node.join())
        .await
        .context("node join task failed")??;
    while let Ok(event) = event_rx.try_recv() {
        log_event(&event);
    }

    recorder.close_segment();
    persisting.store(false, Ordering::Relaxed);
    if persist_worker.join().is_err() {
        warn!("persistence worker panicked");
    }

    info!("PeerLink node stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
