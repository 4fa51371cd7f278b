// Live connection manager: WebSocket client with bounded reconnection.
//
// Mints a live session over REST, performs the hello handshake, subscribes
// to the webinar's broadcast + presence topics, and surfaces incoming
// frames as `LiveEvent`s for the page to handle.
//
// Transport is abstracted via `LiveTransport` for testability. Reconnect
// backoff is bounded: after `max_attempts` consecutive failures the manager
// enters the persistent `Failed` state and stays there until an explicit
// `reset()`, so the page can show a hard "connection lost" indicator
// instead of retrying silently forever.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::info;
use url::Url;
use uuid::Uuid;

use greenroom_common::protocol::ws::{ChangeOp, ChangeTable, PresenceEntry, WsMessage};

// ── Configuration ───────────────────────────────────────────────────

/// Connection parameters for one viewer session.
#[derive(Debug, Clone)]
pub struct LiveClientConfig {
    /// Engagement server base URL (e.g. "https://live.example.com").
    pub server_url: String,
    /// Webinar this viewer is watching.
    pub webinar_id: Uuid,
    /// Bearer token for REST API auth (scoped to the webinar).
    pub auth_token: String,
    /// Name shown to other viewers in the presence roster.
    pub display_name: String,
}

/// Reconnection parameters.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

// ── Transport trait ─────────────────────────────────────────────────

/// Session info returned by the REST live-session endpoint.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub session_token: String,
    pub ws_url: String,
    pub heartbeat_interval_ms: u32,
    pub max_frame_bytes: usize,
}

/// Abstraction over the network transport for testability.
///
/// In production this is backed by an HTTP client plus a WebSocket; in
/// tests it is a mock that records sent frames and replays scripted ones.
pub trait LiveTransport {
    /// Mint a live session via the REST API.
    fn create_session(&mut self, config: &LiveClientConfig) -> Result<SessionInfo>;

    /// Open a WebSocket connection to the given URL.
    fn connect_ws(&mut self, ws_url: &str) -> Result<()>;

    /// Send a frame over the WebSocket.
    fn send(&mut self, msg: &WsMessage) -> Result<()>;

    /// Receive the next frame (blocking). Returns None on clean close.
    fn recv(&mut self) -> Result<Option<WsMessage>>;

    /// Close the WebSocket.
    fn close(&mut self);
}

// ── Connection state ────────────────────────────────────────────────

/// Current state of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    /// Reconnect attempts are exhausted; only `reset()` leaves this state.
    Failed,
}

// ── Incoming event ──────────────────────────────────────────────────

/// Events emitted by the connection manager for the page to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Successfully connected and authenticated.
    Connected { viewer_count: usize },
    /// An Event Store row changed; routed to the matching sync unit.
    Change { table: ChangeTable, op: ChangeOp, record: serde_json::Value },
    /// Authoritative presence roster; replaces any stale local roster.
    PresenceSync { entries: Vec<PresenceEntry> },
    /// Another viewer joined.
    PresenceJoined { entry: PresenceEntry },
    /// A viewer left.
    PresenceLeft { registration_id: Uuid },
    /// Connection lost; caller should retry per `reconnect_delay()`.
    Disconnected { reason: String },
    /// A protocol error from the server.
    Error { code: String, message: String, retryable: bool },
}

// ── Connection manager ──────────────────────────────────────────────

/// Manages the live connection lifecycle for one viewer session.
pub struct LiveConnectionManager<T: LiveTransport> {
    config: LiveClientConfig,
    reconnect_policy: ReconnectPolicy,
    transport: T,
    state: ConnectionState,
    session_token: Option<String>,
    subscribed: bool,
    consecutive_failures: u32,
}

impl<T: LiveTransport> LiveConnectionManager<T> {
    pub fn new(config: LiveClientConfig, transport: T) -> Self {
        Self {
            config,
            reconnect_policy: ReconnectPolicy::default(),
            transport,
            state: ConnectionState::Disconnected,
            session_token: None,
            subscribed: false,
            consecutive_failures: 0,
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Attempt to connect (or reconnect) to the engagement server.
    ///
    /// Returns `Connected` on success, `Disconnected` on a retryable
    /// failure. Once attempts are exhausted the manager latches into
    /// `Failed` and refuses further connects until `reset()`.
    pub fn connect(&mut self) -> Result<LiveEvent> {
        if self.state == ConnectionState::Failed {
            return Err(anyhow!("connection has failed permanently; call reset() first"));
        }
        validate_server_url(&self.config.server_url)?;
        self.state = ConnectionState::Connecting;
        self.subscribed = false;

        // Step 1: Mint a live session via the REST API.
        let session = match self.transport.create_session(&self.config) {
            Ok(session) => session,
            Err(e) => {
                return Ok(self.fail_attempt(format!("session creation failed: {e}")));
            }
        };

        validate_ws_url(&session.ws_url)?;

        // Step 2: Open WebSocket.
        if let Err(e) = self.transport.connect_ws(&session.ws_url) {
            return Ok(self.fail_attempt(format!("WebSocket connection failed: {e}")));
        }

        // Step 3: Send Hello frame.
        self.state = ConnectionState::Authenticating;
        let hello = WsMessage::Hello {
            session_token: session.session_token.clone(),
            display_name: self.config.display_name.clone(),
        };
        if let Err(e) = self.transport.send(&hello) {
            self.transport.close();
            return Ok(self.fail_attempt(format!("failed to send hello: {e}")));
        }

        // Step 4: Wait for HelloAck.
        let viewer_count = match self.transport.recv() {
            Ok(Some(WsMessage::HelloAck { viewer_count, .. })) => {
                info!(
                    session_id = %session.session_id,
                    viewer_count,
                    "live connection established"
                );
                viewer_count
            }
            Ok(Some(WsMessage::Error { code, message, .. })) => {
                self.transport.close();
                return Ok(self.fail_attempt(format!("hello rejected: {code}: {message}")));
            }
            Ok(Some(_)) => {
                self.transport.close();
                return Ok(
                    self.fail_attempt("unexpected message in response to hello".to_string())
                );
            }
            Ok(None) => {
                return Ok(self.fail_attempt("connection closed during handshake".to_string()));
            }
            Err(e) => {
                self.transport.close();
                return Ok(self.fail_attempt(format!("error during handshake: {e}")));
            }
        };

        self.session_token = Some(session.session_token);
        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;

        Ok(LiveEvent::Connected { viewer_count })
    }

    /// Subscribe to the webinar's broadcast + presence topics.
    ///
    /// The server answers with a `PresenceSync` snapshot which the caller
    /// must treat as authoritative, discarding any stale roster held from
    /// before a reconnect.
    pub fn subscribe(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(anyhow!("cannot subscribe: not connected"));
        }

        let msg = WsMessage::Subscribe { webinar_id: self.config.webinar_id };
        self.transport.send(&msg)?;
        self.subscribed = true;
        Ok(())
    }

    /// Process the next incoming frame. Returns None on frames the page
    /// has no use for.
    pub fn recv_event(&mut self) -> Result<Option<LiveEvent>> {
        if self.state != ConnectionState::Connected {
            return Err(anyhow!("cannot receive: not connected"));
        }

        match self.transport.recv()? {
            Some(WsMessage::Change { table, op, record }) => {
                Ok(Some(LiveEvent::Change { table, op, record }))
            }

            Some(WsMessage::PresenceSync { entries }) => {
                Ok(Some(LiveEvent::PresenceSync { entries }))
            }

            Some(WsMessage::PresenceJoin { entry }) => Ok(Some(LiveEvent::PresenceJoined { entry })),

            Some(WsMessage::PresenceLeave { registration_id }) => {
                Ok(Some(LiveEvent::PresenceLeft { registration_id }))
            }

            Some(WsMessage::Error { code, message, retryable }) => {
                Ok(Some(LiveEvent::Error { code, message, retryable }))
            }

            Some(_) => {
                // Ignore unknown/unexpected frames.
                Ok(None)
            }

            None => {
                // Connection closed.
                self.state = ConnectionState::Disconnected;
                self.subscribed = false;
                Ok(Some(LiveEvent::Disconnected {
                    reason: "connection closed by server".to_string(),
                }))
            }
        }
    }

    /// Disconnect from the server (explicit navigation away).
    pub fn disconnect(&mut self) {
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        self.subscribed = false;
    }

    /// Leave the `Failed` state and allow connecting again.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        if self.state == ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Compute the backoff delay for the next reconnection attempt.
    pub fn reconnect_delay(&self) -> Duration {
        let exp = self.consecutive_failures.min(7);
        let delay =
            DurationSaturatingMul::saturating_mul(self.reconnect_policy.base_delay, 1u64 << exp);
        delay.min(self.reconnect_policy.max_delay)
    }

    /// Whether another reconnection attempt is allowed.
    pub fn should_reconnect(&self) -> bool {
        self.state != ConnectionState::Failed
            && self.consecutive_failures < self.reconnect_policy.max_attempts
    }

    fn fail_attempt(&mut self, reason: String) -> LiveEvent {
        self.consecutive_failures += 1;
        self.state = if self.consecutive_failures >= self.reconnect_policy.max_attempts {
            ConnectionState::Failed
        } else {
            ConnectionState::Disconnected
        };
        LiveEvent::Disconnected { reason }
    }
}

fn validate_server_url(value: &str) -> Result<()> {
    let parsed =
        Url::parse(value).map_err(|error| anyhow!("invalid server_url `{value}`: {error}"))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if is_loopback_host(parsed.host_str()) => Ok(()),
        _ => Err(anyhow!("server_url must use https (http is allowed only for localhost testing)")),
    }
}

fn validate_ws_url(value: &str) -> Result<()> {
    let parsed = Url::parse(value).map_err(|error| anyhow!("invalid ws_url `{value}`: {error}"))?;
    match parsed.scheme() {
        "wss" => Ok(()),
        "ws" if is_loopback_host(parsed.host_str()) => Ok(()),
        _ => Err(anyhow!("ws_url must use wss (ws is allowed only for localhost testing)")),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

// ── Backoff helper (for Duration::saturating_mul with u64) ──────────

trait DurationSaturatingMul {
    fn saturating_mul(self, rhs: u64) -> Self;
}

impl DurationSaturatingMul for Duration {
    fn saturating_mul(self, rhs: u64) -> Self {
        let nanos = self.as_nanos().saturating_mul(rhs as u128);
        if nanos > u64::MAX as u128 {
            Duration::from_secs(u64::MAX)
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}
