//! Session error types
//!
//! Everything that can go wrong while handling one connection. None of these
//! are fatal to the process; they decide whether a client gets an `error`
//! event, whether the connection closes, or whether the event is just logged.

use std::time::Duration;
use thiserror::Error;

use super::registry::RegistryError;
use super::session::{ConnectionId, DeliveryFailure};

/// Errors raised while handling a connection
#[derive(Error, Debug)]
pub enum SessionError {
    /// Frame could not be decoded; ignored
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// Username or message constraints violated
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Requested name is held by another session
    #[error("Username '{0}' is already taken")]
    NameConflict(String),

    /// Connection already holds a session
    #[error("Connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    /// Join attempted after the server started shutting down
    #[error("Server is shutting down")]
    ShuttingDown,

    /// No valid join before the deadline
    #[error("Authentication timed out after {0:?}")]
    AuthTimeout(Duration),

    /// Read or write on the socket failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// One target of a broadcast could not be reached
    #[error("Delivery to {connection_id} failed: {failure}")]
    Delivery {
        connection_id: ConnectionId,
        failure: DeliveryFailure,
    },
}

impl SessionError {
    /// Text for the `error` event sent back to the client, if any
    pub fn client_message(&self) -> Option<String> {
        match self {
            SessionError::Validation(_)
            | SessionError::NameConflict(_)
            | SessionError::ShuttingDown => Some(self.to_string()),
            _ => None,
        }
    }

    /// Whether the connection must close
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::AuthTimeout(_) | SessionError::Transport(_)
        )
    }
}

impl From<RegistryError> for SessionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NameConflict(name) => SessionError::NameConflict(name),
            RegistryError::AlreadyRegistered(id) => SessionError::AlreadyRegistered(id),
            RegistryError::Closed => SessionError::ShuttingDown,
        }
    }
}

/// Input constraint violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Username cannot be empty")]
    EmptyUsername,

    #[error("Username cannot be longer than {max} characters")]
    UsernameTooLong { max: usize },

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Message cannot be longer than {max} characters")]
    MessageTooLong { max: usize },
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
