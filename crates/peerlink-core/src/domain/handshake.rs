//! Handshake state machine.
//!
//! Both nodes run the same symmetric exchange:
//!
//! ```text
//! NODE1                          NODE2
//!   ── HANDSHAKE:NODE1 ──────────►   received = true
//!   ◄───────────── READY:NODE2 ──    (reply)
//! sent = true
//!   ◄────────── HANDSHAKE:NODE2 ──
//! received = true
//!   ── READY:NODE1 ──────────────►   sent = true
//! ```
//!
//! `sent` means "my HANDSHAKE was answered with READY"; `received` means
//! "I saw the peer's HANDSHAKE".  They are tracked separately and the
//! handshake is complete only when both hold.  A node that merely answers
//! the peer's HANDSHAKEs never completes on its own.

use serde::Serialize;

/// Default number of HANDSHAKE attempts before giving up.
pub const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 10;

/// What the engine should do on a retry tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Send one HANDSHAKE; `attempt` is 1-based.
    SendHandshake { attempt: u32 },
    /// Both conditions hold.
    Complete,
    /// All attempts were used without completing.
    Failed { attempts: u32 },
}

/// Progress of one handshake.  Discarded after success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HandshakeState {
    attempts_made: u32,
    max_attempts: u32,
    sent: bool,
    received: bool,
}

impl HandshakeState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_made: 0,
            max_attempts,
            sent: false,
            received: false,
        }
    }

    /// Advances the retry clock by one tick.
    pub fn on_tick(&mut self) -> HandshakeAction {
        if self.is_complete() {
            return HandshakeAction::Complete;
        }
        if self.attempts_made >= self.max_attempts {
            return HandshakeAction::Failed {
                attempts: self.attempts_made,
            };
        }
        self.attempts_made += 1;
        HandshakeAction::SendHandshake {
            attempt: self.attempts_made,
        }
    }

    /// Records a HANDSHAKE from the peer.  The caller must reply READY.
    pub fn on_handshake(&mut self) {
        self.received = true;
    }

    /// Records a READY from the peer.
    pub fn on_ready(&mut self) {
        self.sent = true;
    }

    pub fn is_complete(&self) -> bool {
        self.sent && self.received
    }

    pub fn sent(&self) -> bool {
        self.sent
    }

    pub fn received(&self) -> bool {
        self.received
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_ATTEMPTS)
    }
}
