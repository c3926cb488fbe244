//! # Chatter
//!
//! Real-time multi-user chat relay over WebSocket.
//!
//! Clients connect, claim a unique display name, and then exchange chat
//! messages and typing indicators with everyone else in the room. The
//! server tracks presence, announces joins and departures, and prunes
//! peers that stop responding.
//!
//! ## Modules
//!
//! - [`websocket`]: Session registry, event dispatch, connection state machine, and heartbeats
//! - [`api`]: HTTP server with Axum (WebSocket upgrade, health, participants, static client)
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatter::{serve, AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let state = AppState::new(config.server.clone(), config.chat.session_settings());
//!
//!     // Runs until Ctrl+C or SIGTERM, then closes every session
//!     serve(state).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiError, AppState};

pub use config::{ChatConfig, Config, ConfigError, LoggingConfig, ServerConfig};

pub use websocket::{
    ClientMessage, CloseReason, ConnectionHandler, ConnectionState, Dispatcher, Registry,
    RegistryError, ServerMessage, Session, SessionError, SessionSettings,
};
