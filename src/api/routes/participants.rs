//! Participant Routes
//!
//! Read-only view of who is in the chat.
//!
//! - GET /api/v1/participants - Current participant list
//! - GET /api/v1/participants/:name - One participant

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{ParticipantResponse, ParticipantsResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /api/v1/participants
pub async fn list_participants(State(state): State<Arc<AppState>>) -> Json<ParticipantsResponse> {
    let users = state.registry.snapshot().await;
    Json(ParticipantsResponse {
        count: users.len(),
        users,
    })
}

/// GET /api/v1/participants/:name
pub async fn get_participant(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ParticipantResponse>> {
    let session = state
        .registry
        .lookup_by_name(&name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("participant '{}'", name)))?;

    Ok(Json(session.into()))
}
