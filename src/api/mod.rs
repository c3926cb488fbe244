//! Chatter HTTP Surface
//!
//! HTTP layer for Chatter, built with Axum.
//!
//! # Endpoints
//!
//! ## WebSocket
//! - `GET /ws` - Chat connection
//!
//! ## Participants
//! - `GET /api/v1/participants` - Current participant list
//! - `GET /api/v1/participants/:name` - One participant
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! Anything else is served from the static client directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use chatter::api::{serve, AppState};
//! use chatter::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let state = AppState::new(config.server.clone(), config.chat.session_settings());
//!     serve(state).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{routing::get, Router};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::websocket::{websocket_handler, Dispatcher};

/// Notice broadcast to every participant when the server stops
const SHUTDOWN_NOTICE: &str = "Server is shutting down";

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/participants", get(routes::participants::list_participants))
        .route("/participants/:name", get(routes::participants::get_participant));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let static_files = ServeDir::new(&state.config.static_dir);

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the server and run until a shutdown signal has been handled.
///
/// On shutdown every participant is told the server is going away and each
/// session is closed normally. If sessions are still open when the grace
/// period runs out, [`ApiError::ShutdownTimeout`] is returned so the caller
/// can terminate the process.
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.addr();
    let grace = state.config.shutdown_grace();
    let dispatcher = state.dispatcher.clone();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Chatter listening on {}", addr);

    let (forced_tx, forced_rx) = oneshot::channel::<()>();
    let shutdown = async move {
        shutdown_signal().await;
        if !close_sessions(&dispatcher, grace).await {
            let _ = forced_tx.send(());
        }
    };

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;
        }
        Ok(()) = forced_rx => {
            tracing::error!(grace = ?grace, "Sessions still open after grace period, forcing shutdown");
            return Err(ApiError::ShutdownTimeout(grace));
        }
    }

    tracing::info!("Chatter shut down gracefully");
    Ok(())
}

/// Announce the shutdown, close every session, and wait for the registry
/// to drain. Returns false if the grace period ran out first.
pub async fn close_sessions(dispatcher: &Dispatcher, grace: Duration) -> bool {
    let closing = dispatcher.shutdown(SHUTDOWN_NOTICE).await;
    tracing::info!(sessions = closing, "Closing chat sessions");

    match tokio::time::timeout(grace, dispatcher.registry().drained()).await {
        Ok(()) => true,
        Err(_) => {
            let remaining = dispatcher.registry().len().await;
            tracing::warn!(remaining, "Shutdown grace period elapsed");
            false
        }
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::websocket::{Outbound, Outbox, SessionSettings};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_state() -> AppState {
        AppState::new(ServerConfig::default(), SessionSettings::default())
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_live() {
        let app = build_router(create_test_state());
        let (status, _) = get(app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready() {
        let app = build_router(create_test_state());
        let (status, _) = get(app, "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let state = create_test_state();
        let (outbox, _rx) = Outbox::channel("c1".to_string(), 4);
        state.registry.try_register(&outbox, "alice").await.unwrap();

        let (status, body) = get(build_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["participants"], 1);
    }

    #[tokio::test]
    async fn test_list_participants() {
        let state = create_test_state();
        let (a, _rx_a) = Outbox::channel("a".to_string(), 4);
        let (b, _rx_b) = Outbox::channel("b".to_string(), 4);
        state.registry.try_register(&a, "alice").await.unwrap();
        state.registry.try_register(&b, "bob").await.unwrap();

        let (status, body) = get(build_router(state), "/api/v1/participants").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["users"], serde_json::json!(["alice", "bob"]));
    }

    #[tokio::test]
    async fn test_get_participant() {
        let state = create_test_state();
        let (a, _rx_a) = Outbox::channel("a".to_string(), 4);
        state.registry.try_register(&a, "alice").await.unwrap();
        let app = build_router(state);

        let (status, body) = get(app.clone(), "/api/v1/participants/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");

        let (status, body) = get(app, "/api/v1/participants/nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let app = build_router(create_test_state());
        let (status, _) = get(app, "/ws").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_close_sessions_drains_registry() {
        let state = create_test_state();
        let (outbox, mut rx) = Outbox::channel("a".to_string(), 8);
        state.registry.try_register(&outbox, "alice").await.unwrap();

        // Stand-in for the connection task: unregister once the close arrives
        let registry = Arc::clone(&state.registry);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if matches!(frame, Outbound::Close { .. }) {
                    registry.unregister("a").await;
                    break;
                }
            }
        });

        assert!(close_sessions(&state.dispatcher, Duration::from_secs(5)).await);
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_sessions_gives_up_after_grace() {
        let state = create_test_state();
        let (outbox, _rx) = Outbox::channel("a".to_string(), 8);
        state.registry.try_register(&outbox, "alice").await.unwrap();

        assert!(!close_sessions(&state.dispatcher, Duration::from_secs(10)).await);
        assert_eq!(state.registry.len().await, 1);
    }
}
