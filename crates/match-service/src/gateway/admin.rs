//! Event window admin handlers.
//!
//! - `GET /api/v1/window` - current window
//! - `POST /api/v1/window` - open the window until `expiresAt`
//! - `DELETE /api/v1/window` - close the window now
//!
//! The window lives in the shared store with a TTL ending at `expiresAt`, so
//! every instance sees it close at the same instant.

use crate::errors::MatchError;
use crate::gateway::AppState;
use crate::window::EventWindow;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenWindowRequest {
    pub expires_at: DateTime<Utc>,
    pub max_room_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowResponse {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_room_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Option<EventWindow>> for WindowResponse {
    fn from(window: Option<EventWindow>) -> Self {
        match window {
            Some(w) => Self {
                available: w.available,
                max_room_capacity: Some(w.max_room_capacity),
                expires_at: Some(w.expires_at),
            },
            None => Self {
                available: false,
                max_room_capacity: None,
                expires_at: None,
            },
        }
    }
}

/// Handler for GET /api/v1/window
#[instrument(skip(state))]
pub async fn get_window(
    State(state): State<Arc<AppState>>,
) -> Result<Json<WindowResponse>, MatchError> {
    let window = state.engine.windows().current().await?;
    Ok(Json(window.into()))
}

/// Handler for POST /api/v1/window
///
/// # Response
///
/// - 201 Created: window open
/// - 400 Bad Request: `expiresAt` not in the future, or capacity below 2
#[instrument(skip(state, request), fields(expires_at = %request.expires_at))]
pub async fn open_window(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenWindowRequest>,
) -> Result<(StatusCode, Json<WindowResponse>), MatchError> {
    let window = state
        .engine
        .windows()
        .open(request.expires_at, request.max_room_capacity)
        .await?;

    info!(
        target: "mm.admin",
        expires_at = %window.expires_at,
        max_room_capacity = window.max_room_capacity,
        "Event window opened via admin API"
    );
    Ok((StatusCode::CREATED, Json(Some(window).into())))
}

/// Handler for DELETE /api/v1/window
#[instrument(skip(state))]
pub async fn close_window(State(state): State<Arc<AppState>>) -> Result<StatusCode, MatchError> {
    state.engine.windows().close().await?;
    info!(target: "mm.admin", "Event window closed via admin API");
    Ok(StatusCode::NO_CONTENT)
}
