//! Matchmaking service error types.
//!
//! Errors surface in three places: as `exception` events on a client
//! connection, as admin HTTP responses, and as log lines when a queue job is
//! dropped. Internal details (store errors, collaborator responses) are logged
//! server-side and never sent to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Matchmaking service error type.
///
/// Maps to HTTP status codes for the admin API:
/// - `MinimumPeriodNotMet`, `InvalidCapacity`, `MalformedJob`, `InvalidChoice`: 400 Bad Request
/// - `WindowNotOpen`: 409 Conflict
/// - `RoomNotFound`, `MemberNameNotFound`: 404 Not Found
/// - Store, Conflict, Broadcast, Config, Internal: 500 Internal Server Error
/// - `ChatroomCreationFailed`: 502 Bad Gateway
#[derive(Debug, Error)]
pub enum MatchError {
    /// Shared store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Optimistic transaction kept conflicting after the retry bound.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Room does not exist (never created or expired).
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room is full or no longer accepting new members.
    #[error("Room unavailable: {0}")]
    RoomUnavailable(String),

    /// Connection carries no resolvable member identity.
    #[error("Member id not available")]
    MemberIdNotAvailable,

    /// A member was expected in a room roster with a display name but has none.
    #[error("Member name not found: {0}")]
    MemberNameNotFound(String),

    /// ENTER rejected because the event window is closed.
    #[error("Event window is not open")]
    WindowNotOpen,

    /// Window open request with an expiry that is not in the future.
    #[error("Expiry must be in the future")]
    MinimumPeriodNotMet,

    /// Window open request with a room capacity that cannot form a pair.
    #[error("Invalid room capacity: {0}")]
    InvalidCapacity(usize),

    /// Choice target is not a valid counterpart.
    #[error("Invalid choice: {0}")]
    InvalidChoice(String),

    /// Chatroom collaborator did not return a room id.
    #[error("Chatroom creation failed: {0}")]
    ChatroomCreationFailed(String),

    /// Payload could not be decoded into a job or frame.
    #[error("Malformed payload: {0}")]
    MalformedJob(String),

    /// Delivery to a connection failed.
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatchError {
    /// Name of the error as carried in the `error` field of `exception` events.
    #[must_use]
    pub fn error_name(&self) -> &'static str {
        match self {
            MatchError::Store(_) => "StoreError",
            MatchError::Conflict(_) => "Conflict",
            MatchError::RoomNotFound(_) => "RoomNotFound",
            MatchError::RoomUnavailable(_) => "RoomUnavailable",
            MatchError::MemberIdNotAvailable => "MemberIdNotAvailable",
            MatchError::MemberNameNotFound(_) => "MemberNameNotFound",
            MatchError::WindowNotOpen => "WindowNotOpen",
            MatchError::MinimumPeriodNotMet => "MinimumPeriodNotMet",
            MatchError::InvalidCapacity(_) => "InvalidCapacity",
            MatchError::InvalidChoice(_) => "InvalidChoice",
            MatchError::ChatroomCreationFailed(_) => "ChatroomCreationFailed",
            MatchError::MalformedJob(_) => "MalformedPayload",
            MatchError::Broadcast(_) => "BroadcastError",
            MatchError::Config(_) => "ConfigError",
            MatchError::Internal(_) => "InternalError",
        }
    }

    /// Returns a client-safe error message.
    ///
    /// Internal details are not exposed.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            MatchError::RoomNotFound(_) => "Room not found".to_string(),
            MatchError::MemberIdNotAvailable => "A valid member id is required".to_string(),
            MatchError::WindowNotOpen => "The event is not open".to_string(),
            MatchError::MinimumPeriodNotMet => "Expiry must be in the future".to_string(),
            MatchError::InvalidCapacity(_) => "Room capacity must be at least 2".to_string(),
            MatchError::InvalidChoice(_) => "Choice target is not in this room".to_string(),
            MatchError::MalformedJob(_) => "Malformed message".to_string(),
            MatchError::Store(_)
            | MatchError::Conflict(_)
            | MatchError::RoomUnavailable(_)
            | MatchError::MemberNameNotFound(_)
            | MatchError::ChatroomCreationFailed(_)
            | MatchError::Broadcast(_)
            | MatchError::Config(_)
            | MatchError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            MatchError::MinimumPeriodNotMet
            | MatchError::InvalidCapacity(_)
            | MatchError::MalformedJob(_)
            | MatchError::InvalidChoice(_)
            | MatchError::MemberIdNotAvailable => StatusCode::BAD_REQUEST,
            MatchError::WindowNotOpen | MatchError::RoomUnavailable(_) => StatusCode::CONFLICT,
            MatchError::RoomNotFound(_) | MatchError::MemberNameNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            MatchError::ChatroomCreationFailed(_) => StatusCode::BAD_GATEWAY,
            MatchError::Store(_)
            | MatchError::Conflict(_)
            | MatchError::Broadcast(_)
            | MatchError::Config(_)
            | MatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Bounded label for the `error_type` metric dimension.
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            MatchError::Store(_) => "store",
            MatchError::Conflict(_) => "conflict",
            MatchError::RoomNotFound(_) => "room_not_found",
            MatchError::RoomUnavailable(_) => "room_unavailable",
            MatchError::MemberIdNotAvailable => "member_id_not_available",
            MatchError::MemberNameNotFound(_) => "member_name_not_found",
            MatchError::WindowNotOpen => "window_not_open",
            MatchError::MinimumPeriodNotMet => "minimum_period_not_met",
            MatchError::InvalidCapacity(_) => "invalid_capacity",
            MatchError::InvalidChoice(_) => "invalid_choice",
            MatchError::ChatroomCreationFailed(_) => "chatroom_creation_failed",
            MatchError::MalformedJob(_) => "malformed_job",
            MatchError::Broadcast(_) => "broadcast",
            MatchError::Config(_) => "config",
            MatchError::Internal(_) => "internal",
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            MatchError::MinimumPeriodNotMet => "MINIMUM_PERIOD_NOT_MET",
            MatchError::InvalidCapacity(_) => "INVALID_CAPACITY",
            MatchError::WindowNotOpen => "WINDOW_NOT_OPEN",
            MatchError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            MatchError::MalformedJob(_) | MatchError::InvalidChoice(_) => "BAD_REQUEST",
            MatchError::MemberIdNotAvailable => "MEMBER_ID_NOT_AVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(target: "mm.admin", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
