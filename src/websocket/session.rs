//! Sessions and Connection Handles
//!
//! A [`Session`] is the server-side record of one authenticated participant.
//! Every connection owns exactly one outbound queue; the [`Outbox`] is the
//! sending half of that queue. The Connection Handler owns the receiving half
//! (through its writer task), while the Registry and Dispatcher only hold
//! cloned senders for lookup and delivery.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use uuid::Uuid;

use super::liveness::HeartbeatSettings;

/// Unique identifier for a WebSocket connection
pub type ConnectionId = String;

/// Close code for a normal closure (server shutdown)
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent to connections pruned as dead
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code sent when no valid join arrived before the deadline
pub const CLOSE_AUTH_TIMEOUT: u16 = 4000;

/// Allocate a fresh connection identifier
pub fn new_connection_id() -> ConnectionId {
    Uuid::new_v4().to_string()
}

/// A frame queued for a connection's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Pre-serialized JSON event, shared between all targets of a broadcast
    Text(Arc<str>),
    /// Heartbeat ping
    Ping,
    /// Close the transport; the writer stops after sending it
    Close { code: u16, reason: String },
}

/// Why a single delivery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The writer side is gone
    Closed,
    /// The peer stopped draining its queue
    Full,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Closed => write!(f, "channel closed"),
            DeliveryFailure::Full => write!(f, "channel full"),
        }
    }
}

/// Why a connection entered the Closed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or the stream ended
    ClientClosed,
    /// Read or write on the transport failed
    TransportError,
    /// No valid join before the authentication deadline
    AuthTimeout,
    /// Pruned by the Dispatcher (failed delivery or missed heartbeat)
    Reaped,
    /// The server is shutting down
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::AuthTimeout => "auth_timeout",
            CloseReason::Reaped => "reaped",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sending half of a connection's outbound queue
#[derive(Debug, Clone)]
pub struct Outbox {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    reaped: Arc<Notify>,
}

impl Outbox {
    /// Create the outbound queue for a connection
    pub fn channel(
        connection_id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            connection_id,
            sender,
            reaped: Arc::new(Notify::new()),
        };
        (outbox, receiver)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a frame without waiting.
    ///
    /// A full queue is reported instead of awaited so one stalled peer can
    /// never hold up a broadcast pass.
    pub fn try_deliver(&self, frame: Outbound) -> Result<(), DeliveryFailure> {
        if self.sender.is_closed() {
            return Err(DeliveryFailure::Closed);
        }

        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Full,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    /// Whether the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Tell the owning Connection Handler it has been pruned.
    pub(crate) fn mark_reaped(&self) {
        // notify_one keeps a permit, so the signal survives until the handler polls
        self.reaped.notify_one();
    }

    /// Resolves once the connection has been pruned from the Registry
    pub async fn reaped(&self) {
        self.reaped.notified().await;
    }
}

/// Server-side record of one authenticated participant
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: ConnectionId,
    /// Immutable for the lifetime of the session
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    outbox: Outbox,
}

impl Session {
    pub(crate) fn new(outbox: Outbox, display_name: String) -> Self {
        Self {
            connection_id: outbox.connection_id().to_string(),
            display_name,
            joined_at: Utc::now(),
            outbox,
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

/// Per-connection limits and timers
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Maximum username length in characters (after trimming)
    pub max_username_chars: usize,
    /// Maximum message length in characters (after trimming)
    pub max_message_chars: usize,
    /// Hard deadline for a valid join
    pub auth_timeout: Duration,
    /// Heartbeat for active connections
    pub heartbeat: HeartbeatSettings,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_username_chars: 20,
            max_message_chars: 1000,
            auth_timeout: Duration::from_secs(30),
            heartbeat: HeartbeatSettings::default(),
            outbound_buffer: 256,
        }
    }
}
