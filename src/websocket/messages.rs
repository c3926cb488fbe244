//! WebSocket Message Types
//!
//! Defines the JSON events exchanged between chat clients and the server.
//! Every frame is an object tagged by its `type` field.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Claim a display name
    Join {
        #[serde(default)]
        username: String,
    },
    /// Chat message; username and timestamp are filled by the server
    Message {
        #[serde(default)]
        message: String,
    },
    /// Typing indicator. Kept loose so a non-boolean can be dropped quietly
    /// instead of failing the whole frame.
    Typing {
        #[serde(rename = "isTyping", default)]
        is_typing: serde_json::Value,
    },
    /// Any other `type`
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Message { .. } => "message",
            ClientMessage::Typing { .. } => "typing",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Join accepted, sent only to the joining client
    Joined { username: String },
    /// Relayed chat message
    Message {
        username: String,
        message: String,
        timestamp: String,
    },
    /// Relayed typing indicator
    Typing {
        username: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    /// Join/leave/shutdown notice
    System { message: String, timestamp: String },
    /// Full participant snapshot
    UserList { users: Vec<String> },
    /// Validation or name conflict
    Error { message: String },
}

impl ServerMessage {
    pub fn chat(username: &str, message: &str) -> Self {
        ServerMessage::Message {
            username: username.to_string(),
            message: message.to_string(),
            timestamp: timestamp_now(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        ServerMessage::System {
            message: message.into(),
            timestamp: timestamp_now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::Message { .. } => "message",
            ServerMessage::Typing { .. } => "typing",
            ServerMessage::System { .. } => "system",
            ServerMessage::UserList { .. } => "userList",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Current time as ISO-8601 UTC with millisecond precision
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Trim and check a requested display name
pub fn validate_username(raw: &str, max_chars: usize) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    if name.chars().count() > max_chars {
        return Err(ValidationError::UsernameTooLong { max: max_chars });
    }
    Ok(name.to_string())
}

/// Trim and check chat message content
pub fn validate_message(raw: &str, max_chars: usize) -> Result<String, ValidationError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if content.chars().count() > max_chars {
        return Err(ValidationError::MessageTooLong { max: max_chars });
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_deserialize_join() {
        let json = r#"{"type": "join", "username": "alice"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Join { username } => assert_eq!(username, "alice"),
            _ => panic!("Expected Join"),
        }
    }

    #[test]
    fn test_client_message_deserialize_typing() {
        let json = r#"{"type": "typing", "isTyping": true}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Typing { is_typing } => assert_eq!(is_typing.as_bool(), Some(true)),
            _ => panic!("Expected Typing"),
        }

        // Non-boolean payload still decodes, the handler drops it
        let json = r#"{"type": "typing", "isTyping": "yes"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Typing { is_typing } => assert_eq!(is_typing.as_bool(), None),
            _ => panic!("Expected Typing"),
        }
    }

    #[test]
    fn test_client_message_unknown_type() {
        let json = r#"{"type": "dance", "style": "tango"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Unknown));
    }

    #[test]
    fn test_client_message_malformed() {
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"username": "x"}"#).is_err());
    }

    #[test]
    fn test_server_message_serialize_user_list() {
        let msg = ServerMessage::UserList {
            users: vec!["alice".to_string(), "bob".to_string()],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"userList","users":["alice","bob"]}"#);
    }

    #[test]
    fn test_server_message_serialize_typing() {
        let msg = ServerMessage::Typing {
            username: "alice".to_string(),
            is_typing: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"typing\""));
        assert!(json.contains("\"isTyping\":true"));
    }

    #[test]
    fn test_chat_message_has_timestamp() {
        let msg = ServerMessage::chat("alice", "hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["username"], "alice");

        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert!(timestamp.ends_with('Z'));
    }

    #[test]
    fn test_validate_username_limits() {
        assert_eq!(validate_username("  alice ", 20).unwrap(), "alice");
        assert!(validate_username(&"a".repeat(20), 20).is_ok());
        assert_eq!(
            validate_username(&"a".repeat(25), 20).unwrap_err(),
            ValidationError::UsernameTooLong { max: 20 }
        );
        assert_eq!(
            validate_username("   \t ", 20).unwrap_err(),
            ValidationError::EmptyUsername
        );
    }

    #[test]
    fn test_validate_username_counts_characters() {
        // 20 multi-byte characters is still 20 characters
        assert!(validate_username(&"é".repeat(20), 20).is_ok());
    }

    #[test]
    fn test_validate_message_limits() {
        assert!(validate_message(&"x".repeat(1000), 1000).is_ok());
        assert_eq!(
            validate_message(&"x".repeat(1001), 1000).unwrap_err(),
            ValidationError::MessageTooLong { max: 1000 }
        );
        assert_eq!(
            validate_message("   ", 1000).unwrap_err(),
            ValidationError::EmptyMessage
        );
    }
}
