//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and drives each connection through its
//! lifecycle: `Authenticating → Active → Closed`.
//!
//! Every connection runs as one task reading inbound frames plus a writer task
//! that owns the socket sink and drains the connection's outbound queue.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Sleep};

use super::dispatcher::Dispatcher;
use super::error::{SessionError, SessionResult};
use super::liveness::LivenessMonitor;
use super::messages::{validate_message, validate_username, ClientMessage, ServerMessage};
use super::session::{
    new_connection_id, CloseReason, ConnectionId, Outbound, Outbox, SessionSettings,
    CLOSE_AUTH_TIMEOUT, CLOSE_GOING_AWAY, CLOSE_NORMAL,
};
use crate::api::AppState;

/// How long the writer gets to flush a final close frame
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler
///
/// This is the entry point for WebSocket connections.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let dispatcher = state.dispatcher.clone();
    let settings = state.session_settings.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, settings))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, dispatcher: Dispatcher, settings: SessionSettings) {
    let (sender, receiver) = socket.split();
    run_connection(sender, receiver, dispatcher, settings).await;
}

/// Drive one connection until it closes.
///
/// Generic over the transport halves so the state machine runs the same way
/// over an axum socket and over in-memory channels.
pub async fn run_connection<W, R, E>(
    sink: W,
    mut stream: R,
    dispatcher: Dispatcher,
    settings: SessionSettings,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let connection_id = new_connection_id();
    let (outbox, rx) = Outbox::channel(connection_id.clone(), settings.outbound_buffer);
    let mut writer = tokio::spawn(write_frames(sink, rx, connection_id.clone()));
    let mut writer_done = false;

    let reaped = outbox.clone();
    let registry = Arc::clone(dispatcher.registry());
    let mut auth_deadline: Option<Pin<Box<Sleep>>> = Some(Box::pin(sleep(settings.auth_timeout)));
    let mut handler = ConnectionHandler::new(outbox, dispatcher, settings);

    tracing::info!(connection_id = %connection_id, "WebSocket connected");

    let reason = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(message)) => {
                    if let Some(reason) = handler.handle_frame(message).await {
                        break reason;
                    }
                }
                Some(Err(e)) => {
                    handler.report(SessionError::Transport(e.to_string()));
                    break CloseReason::TransportError;
                }
                None => break CloseReason::ClientClosed,
            },
            _ = expire(&mut auth_deadline) => {
                handler.report(SessionError::AuthTimeout(handler.settings.auth_timeout));
                break CloseReason::AuthTimeout;
            }
            _ = reaped.reaped() => break CloseReason::Reaped,
            // Active sessions are closed by the shutdown broadcast instead
            _ = registry.closed(), if !handler.is_authenticated() => break CloseReason::Shutdown,
            exit = &mut writer => {
                writer_done = true;
                match exit {
                    // Only the shutdown broadcast queues a close while the loop runs
                    Ok(WriterExit::CloseSent) => break CloseReason::Shutdown,
                    Ok(WriterExit::SinkFailed) | Ok(WriterExit::QueueClosed) => {
                        handler.report(SessionError::Transport("writer stopped".to_string()));
                    }
                    Err(e) => {
                        handler.report(SessionError::Transport(format!("writer task failed: {e}")));
                    }
                }
                break CloseReason::TransportError;
            }
        }

        // Joining cancels the deadline
        if handler.is_authenticated() {
            auth_deadline = None;
        }
    };

    handler.close(reason).await;

    // Drop every sender so the writer drains what's queued and stops
    drop(handler);
    drop(reaped);
    drop(registry);
    if !writer_done && timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Wait for the auth deadline, or forever once it has been cancelled
async fn expire(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

/// Why the writer task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// A close frame was written
    CloseSent,
    /// The socket rejected a frame
    SinkFailed,
    /// Every sender was dropped
    QueueClosed,
}

/// Forward queued frames to the socket until the queue closes or a close
/// frame has been written
async fn write_frames<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Outbound>,
    connection_id: ConnectionId,
) -> WriterExit
where
    W: Sink<Message> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let (message, closing) = match frame {
            Outbound::Text(text) => (Message::Text(text.to_string()), false),
            Outbound::Ping => (Message::Ping(Vec::new()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if sink.send(message).await.is_err() {
            tracing::debug!(
                connection_id = %connection_id,
                "WebSocket send failed, closing connection"
            );
            return WriterExit::SinkFailed;
        }
        if closing {
            return WriterExit::CloseSent;
        }
    }
    WriterExit::QueueClosed
}

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for a valid join
    Authenticating,
    /// Registered under `username`
    Active { username: String },
    /// Terminal
    Closed,
}

/// Per-connection state machine
pub struct ConnectionHandler {
    outbox: Outbox,
    dispatcher: Dispatcher,
    settings: SessionSettings,
    state: ConnectionState,
    liveness: Option<LivenessMonitor>,
}

impl ConnectionHandler {
    pub fn new(outbox: Outbox, dispatcher: Dispatcher, settings: SessionSettings) -> Self {
        Self {
            outbox,
            dispatcher,
            settings,
            state: ConnectionState::Authenticating,
            liveness: None,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.outbox.connection_id()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, ConnectionState::Active { .. })
    }

    /// Handle one inbound WebSocket frame.
    ///
    /// Returns the close reason when the frame ends the connection.
    pub async fn handle_frame(&mut self, message: Message) -> Option<CloseReason> {
        match message {
            Message::Text(text) => {
                if let Err(e) = self.handle_text(&text).await {
                    self.report(e);
                }
                None
            }
            Message::Binary(_) => {
                tracing::debug!(connection_id = %self.connection_id(), "Ignoring binary frame");
                None
            }
            // Pings are answered by the transport
            Message::Ping(_) => None,
            Message::Pong(_) => {
                if let Some(monitor) = &self.liveness {
                    monitor.record_pong();
                }
                None
            }
            Message::Close(frame) => {
                tracing::debug!(
                    connection_id = %self.connection_id(),
                    frame = ?frame,
                    "Client requested close"
                );
                Some(CloseReason::ClientClosed)
            }
        }
    }

    /// Decode and handle a text frame
    pub async fn handle_text(&mut self, text: &str) -> SessionResult<()> {
        let message: ClientMessage = serde_json::from_str(text)?;
        self.handle_client_message(message).await
    }

    /// Route a decoded client message according to the current state
    pub async fn handle_client_message(&mut self, message: ClientMessage) -> SessionResult<()> {
        match message {
            ClientMessage::Join { username } => {
                if matches!(self.state, ConnectionState::Authenticating) {
                    self.join(&username).await
                } else {
                    self.ignore("join");
                    Ok(())
                }
            }
            ClientMessage::Message { message } => match self.active_username() {
                Some(username) => self.relay_message(&username, &message).await,
                None => {
                    self.ignore("message");
                    Ok(())
                }
            },
            ClientMessage::Typing { is_typing } => match self.active_username() {
                Some(username) => {
                    self.relay_typing(&username, is_typing.as_bool()).await;
                    Ok(())
                }
                None => {
                    self.ignore("typing");
                    Ok(())
                }
            },
            ClientMessage::Unknown => {
                self.ignore("unknown");
                Ok(())
            }
        }
    }

    async fn join(&mut self, requested: &str) -> SessionResult<()> {
        let username = validate_username(requested, self.settings.max_username_chars)?;
        let session = self
            .dispatcher
            .registry()
            .try_register(&self.outbox, &username)
            .await?;

        self.state = ConnectionState::Active {
            username: session.display_name.clone(),
        };

        self.dispatcher.unicast(
            &self.outbox,
            &ServerMessage::Joined {
                username: username.clone(),
            },
        );
        self.dispatcher
            .announce(format!("{username} joined the chat"))
            .await;

        self.liveness = Some(LivenessMonitor::spawn(
            self.outbox.clone(),
            self.dispatcher.clone(),
            self.settings.heartbeat,
        ));
        Ok(())
    }

    async fn relay_message(&self, username: &str, raw: &str) -> SessionResult<()> {
        let content = validate_message(raw, self.settings.max_message_chars)?;
        self.dispatcher
            .broadcast(&ServerMessage::chat(username, &content), None)
            .await;
        Ok(())
    }

    async fn relay_typing(&self, username: &str, is_typing: Option<bool>) {
        // Anything but a boolean is dropped without a reply
        let Some(is_typing) = is_typing else {
            tracing::trace!(connection_id = %self.connection_id(), "Dropping malformed typing event");
            return;
        };

        let event = ServerMessage::Typing {
            username: username.to_string(),
            is_typing,
        };
        self.dispatcher
            .broadcast(&event, Some(self.connection_id()))
            .await;
    }

    /// Enter the Closed state. Calling it again is a no-op.
    pub async fn close(&mut self, reason: CloseReason) {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Closed);
        // Dropping the monitor aborts its task
        self.liveness = None;

        match previous {
            ConnectionState::Closed => return,
            ConnectionState::Authenticating => {}
            ConnectionState::Active { username } => {
                self.dispatcher
                    .registry()
                    .unregister(self.connection_id())
                    .await;
                // Everyone already heard the shutdown notice
                if reason != CloseReason::Shutdown {
                    self.dispatcher
                        .announce(format!("{username} left the chat"))
                        .await;
                }
            }
        }

        let close_frame = match reason {
            CloseReason::AuthTimeout => Some((CLOSE_AUTH_TIMEOUT, "authentication timeout")),
            CloseReason::Reaped => Some((CLOSE_GOING_AWAY, "connection reaped")),
            CloseReason::Shutdown => Some((CLOSE_NORMAL, "server shutting down")),
            _ => None,
        };
        if let Some((code, text)) = close_frame {
            let _ = self.outbox.try_deliver(Outbound::Close {
                code,
                reason: text.to_string(),
            });
        }

        tracing::info!(
            connection_id = %self.connection_id(),
            reason = %reason,
            "WebSocket disconnected"
        );
    }

    /// Log an error and, where the client should hear about it, reply
    fn report(&self, err: SessionError) {
        if let Some(text) = err.client_message() {
            tracing::debug!(connection_id = %self.connection_id(), error = %err, "Rejected client event");
            self.dispatcher
                .unicast(&self.outbox, &ServerMessage::error(text));
        } else if err.is_fatal() {
            tracing::warn!(connection_id = %self.connection_id(), error = %err, "Connection failed");
        } else {
            tracing::warn!(connection_id = %self.connection_id(), error = %err, "Ignoring inbound frame");
        }
    }

    fn ignore(&self, kind: &str) {
        tracing::trace!(
            connection_id = %self.connection_id(),
            kind,
            state = ?self.state,
            "Ignoring event in current state"
        );
    }

    fn active_username(&self) -> Option<String> {
        match &self.state {
            ConnectionState::Active { username } => Some(username.clone()),
            _ => None,
        }
    }
}
