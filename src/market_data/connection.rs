use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::WebSocketConfig;
use crate::market_data::backoff::ReconnectBackoff;

/// Feed connection lifecycle
///
/// `Disconnected -> Connecting -> Connected -> Degraded -> Reconnecting ->
/// Connected | Disconnected { fatal: true }`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected { fatal: bool },
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected { fatal: true } => f.write_str("disconnected (fatal)"),
            ConnectionState::Disconnected { fatal: false } => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Degraded => f.write_str("degraded"),
            ConnectionState::Reconnecting => f.write_str("reconnecting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeReason {
    HeartbeatTimeout,
    PongTimeout,
    ConnectionLost,
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::HeartbeatTimeout => f.write_str("no data within heartbeat timeout"),
            DegradeReason::PongTimeout => f.write_str("no pong within ping timeout"),
            DegradeReason::ConnectionLost => f.write_str("connection lost"),
        }
    }
}

/// Pure connection state machine. The feed loop drives it with clock
/// readings; it never performs I/O.
#[derive(Debug)]
pub struct ConnectionMonitor {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    heartbeat_timeout: Duration,
    ping_interval: Duration,
    ping_timeout: Duration,
    last_message: Option<Instant>,
    last_ping: Option<Instant>,
    pending_ping: Option<Instant>,
    backoff: ReconnectBackoff,
}

impl ConnectionMonitor {
    pub fn new(config: &WebSocketConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected { fatal: false },
            attempts: 0,
            max_attempts: config.max_reconnect_attempts,
            heartbeat_timeout: config.heartbeat_timeout(),
            ping_interval: config.ping_interval(),
            ping_timeout: config.ping_timeout(),
            last_message: None,
            last_ping: None,
            pending_ping: None,
            backoff: ReconnectBackoff::new(
                config.reconnect_delay(),
                config.max_reconnect_delay(),
                0.1,
            ),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_fatal(&self) -> bool {
        self.state == ConnectionState::Disconnected { fatal: true }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// A connect attempt is starting. No-op once fatal.
    pub fn begin_connect(&mut self) {
        if let ConnectionState::Disconnected { fatal: false } = self.state {
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.last_message = Some(now);
        self.last_ping = Some(now);
        self.pending_ping = None;
    }

    /// Any inbound frame refreshes the heartbeat
    pub fn on_message(&mut self, now: Instant) {
        self.last_message = Some(now);
    }

    pub fn on_pong(&mut self, now: Instant) {
        self.pending_ping = None;
        self.last_message = Some(now);
    }

    pub fn should_ping(&self, now: Instant) -> bool {
        self.is_connected()
            && self.pending_ping.is_none()
            && self
                .last_ping
                .map_or(true, |t| now.duration_since(t) >= self.ping_interval)
    }

    pub fn on_ping_sent(&mut self, now: Instant) {
        self.last_ping = Some(now);
        self.pending_ping = Some(now);
    }

    /// Degrade a live connection that went silent or missed a pong
    pub fn check_health(&mut self, now: Instant) -> Option<DegradeReason> {
        if !self.is_connected() {
            return None;
        }

        let reason = if self
            .last_message
            .is_some_and(|t| now.duration_since(t) > self.heartbeat_timeout)
        {
            Some(DegradeReason::HeartbeatTimeout)
        } else if self
            .pending_ping
            .is_some_and(|t| now.duration_since(t) > self.ping_timeout)
        {
            Some(DegradeReason::PongTimeout)
        } else {
            None
        };

        if reason.is_some() {
            self.state = ConnectionState::Degraded;
        }
        reason
    }

    /// The transport failed or the peer hung up
    pub fn mark_lost(&mut self) -> Option<DegradeReason> {
        if self.is_fatal() {
            return None;
        }
        self.state = ConnectionState::Degraded;
        Some(DegradeReason::ConnectionLost)
    }

    /// Count a failed connect or a lost connection and pick the next delay.
    ///
    /// Returns None once the attempt budget is spent; the monitor is then
    /// fatally disconnected.
    pub fn schedule_reconnect(&mut self) -> Option<Duration> {
        if self.is_fatal() {
            return None;
        }

        self.attempts += 1;
        if self.attempts > self.max_attempts {
            self.state = ConnectionState::Disconnected { fatal: true };
            return None;
        }

        self.state = ConnectionState::Reconnecting;
        Some(self.backoff.delay(self.attempts - 1))
    }

    /// Clean stop (shutdown), not a failure
    pub fn close(&mut self) {
        if !self.is_fatal() {
            self.state = ConnectionState::Disconnected { fatal: false };
        }
    }
}
