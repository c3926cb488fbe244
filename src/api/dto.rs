//! Data Transfer Objects
//!
//! Response types for the HTTP endpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::websocket::Session;

/// Full health status
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy"
    pub status: String,
    /// Authenticated participants
    pub participants: usize,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Current participant snapshot
#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub count: usize,
    /// Names in join order
    pub users: Vec<String>,
}

/// A single participant
#[derive(Debug, Serialize)]
pub struct ParticipantResponse {
    pub username: String,
    pub joined_at: DateTime<Utc>,
}

impl From<Session> for ParticipantResponse {
    fn from(session: Session) -> Self {
        Self {
            username: session.display_name,
            joined_at: session.joined_at,
        }
    }
}
