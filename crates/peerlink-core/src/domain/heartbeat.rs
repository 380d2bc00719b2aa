//! Heartbeat timing.
//!
//! Every method takes `now` explicitly, so the timer is driven by whatever
//! clock the caller uses and tests never sleep.
//!
//! Only KEEPALIVE frames count as liveness.  DATA and COMMAND traffic does
//! not reset the silence clock, so a peer whose heartbeat thread has died is
//! detected even while its data stream keeps flowing.

use std::time::{Duration, Instant};

/// Default spacing between outgoing KEEPALIVE frames.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatTimer {
    interval: Duration,
    last_sent: Option<Instant>,
    last_received: Instant,
}

impl HeartbeatTimer {
    /// Starts a timer whose silence clock begins at `session_start`.
    pub fn new(interval: Duration, session_start: Instant) -> Self {
        Self {
            interval,
            last_sent: None,
            last_received: session_start,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `true` if no KEEPALIVE has been sent yet or the interval has elapsed.
    pub fn is_send_due(&self, now: Instant) -> bool {
        match self.last_sent {
            Some(sent) => now.saturating_duration_since(sent) >= self.interval,
            None => true,
        }
    }

    /// Time until the next KEEPALIVE is due.
    pub fn until_next_send(&self, now: Instant) -> Duration {
        match self.last_sent {
            Some(sent) => self
                .interval
                .saturating_sub(now.saturating_duration_since(sent)),
            None => Duration::ZERO,
        }
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Records an inbound KEEPALIVE.
    pub fn record_received(&mut self, now: Instant) {
        if now > self.last_received {
            self.last_received = now;
        }
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    /// Time since the last KEEPALIVE (or session start).
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received)
    }

    /// `true` when `timeout` is set and the silence has reached it.
    pub fn is_expired(&self, now: Instant, timeout: Option<Duration>) -> bool {
        timeout.is_some_and(|limit| self.silence(now) >= limit)
    }
}
