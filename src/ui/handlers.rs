//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::error::SessionError;
use crate::session::{ParticipantView, SessionSnapshot};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Result of a mute or camera toggle
#[derive(Debug, Serialize)]
pub struct ToggleStatus {
    pub muted: bool,
}

/// Get the current session snapshot
pub async fn get_session(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionSnapshot>> {
    Json(ApiResponse::ok(state.session.snapshot()))
}

/// Get remote participants in arrival order
pub async fn get_participants(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<ParticipantView>>> {
    Json(ApiResponse::ok(state.session.snapshot().participants))
}

pub async fn toggle_audio(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<ToggleStatus>>) {
    toggle_response(state.session.toggle_audio().await)
}

pub async fn toggle_video(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<ToggleStatus>>) {
    toggle_response(state.session.toggle_video().await)
}

/// Hang up and return the final snapshot
pub async fn end_call(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionSnapshot>> {
    state.session.end_call().await;
    Json(ApiResponse::ok(state.session.snapshot()))
}

fn toggle_response(
    result: Result<bool, SessionError>,
) -> (StatusCode, Json<ApiResponse<ToggleStatus>>) {
    match result {
        Ok(muted) => (StatusCode::OK, Json(ApiResponse::ok(ToggleStatus { muted }))),
        Err(SessionError::Closed) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error(SessionError::Closed.user_message())),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::error(e.user_message())),
        ),
    }
}
