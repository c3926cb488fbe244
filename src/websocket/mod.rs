//! WebSocket Chat Relay
//!
//! Tracks connected participants and relays chat events between them.
//!
//! ## Architecture
//!
//! - **Registry**: Concurrent store of authenticated sessions, owns name uniqueness
//! - **Dispatcher**: Best-effort fan-out over a registry snapshot, prunes dead targets
//! - **Handler**: Per-connection state machine (`Authenticating → Active → Closed`)
//! - **Liveness**: Heartbeat that hands silent peers to the dispatcher for pruning
//! - **Messages**: Client and server event formats
//!
//! ## Protocol
//!
//! Clients connect to `/ws` and must send a `join` within the authentication
//! window (30 s by default), after which they can send `message` and
//! `typing` events:
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:3000/ws');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'join', username: 'alice'}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   // joined | message | typing | system | userList | error
//!   console.log(msg.type, msg);
//! };
//! ```

mod dispatcher;
mod error;
mod handler;
mod liveness;
mod messages;
mod registry;
mod session;

pub use dispatcher::{BroadcastReport, Dispatcher};
pub use error::{SessionError, SessionResult, ValidationError};
pub use handler::{run_connection, websocket_handler, ConnectionHandler, ConnectionState};
pub use liveness::{HeartbeatSettings, LivenessMonitor};
pub use messages::{
    timestamp_now, validate_message, validate_username, ClientMessage, ServerMessage,
};
pub use registry::{Registry, RegistryError};
pub use session::{
    new_connection_id, CloseReason, ConnectionId, DeliveryFailure, Outbound, Outbox, Session,
    SessionSettings, CLOSE_AUTH_TIMEOUT, CLOSE_GOING_AWAY, CLOSE_NORMAL,
};
