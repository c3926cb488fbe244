//! Application State
//!
//! Shared state accessible by all handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::websocket::{Dispatcher, Registry, SessionSettings};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    /// Active chat sessions
    pub registry: Arc<Registry>,
    /// Event fan-out over the registry
    pub dispatcher: Dispatcher,
    /// Limits and timers applied to every new connection
    pub session_settings: SessionSettings,
}

impl AppState {
    /// Create a new AppState with an empty registry
    pub fn new(config: ServerConfig, session_settings: SessionSettings) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            session_settings,
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Number of authenticated participants
    pub async fn participant_count(&self) -> usize {
        self.registry.len().await
    }
}
