use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Domain error surface (`spec.md` §7). Each variant names exactly one
/// `spec.md` error kind; the wire `code` sent to a client is the
/// variant's name.
#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("room {room_id} not found")]
    RoomNotFound { room_id: String },

    #[error("room {room_id} is full")]
    RoomFull { room_id: String },

    #[error("invalid room name: {reason}")]
    InvalidRoomName { reason: String },

    #[error("room capacity exceeded")]
    CapacityExceeded,

    #[error("user {user_id} is not in room {room_id}")]
    NotInRoom { room_id: String, user_id: String },

    #[error("user {user_id} already joined room {room_id}")]
    AlreadyJoined { room_id: String, user_id: String },

    #[error("room {room_id} is not in a valid state for this operation")]
    InvalidState { room_id: String },

    #[error("invalid progress report: {reason}")]
    InvalidProgress { reason: String },

    #[error("authentication failed")]
    AuthFailed,

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl AppError {
    /// The wire error code, matching `spec.md` §7's kind names.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::RoomNotFound { .. } => "RoomNotFound",
            AppError::RoomFull { .. } => "RoomFull",
            AppError::InvalidRoomName { .. } => "InvalidRoomName",
            AppError::CapacityExceeded => "CapacityExceeded",
            AppError::NotInRoom { .. } => "NotInRoom",
            AppError::AlreadyJoined { .. } => "AlreadyJoined",
            AppError::InvalidState { .. } => "InvalidState",
            AppError::InvalidProgress { .. } => "InvalidProgress",
            AppError::AuthFailed => "AuthFailed",
            AppError::Internal { .. } => "Internal",
        }
    }

    /// Builds the `error{code,message}` frame body sent to the
    /// offending client only (`spec.md` §7: "never broadcast").
    pub fn to_error_frame(&self) -> shared::protocol::ServerMessage {
        shared::protocol::ServerMessage::Error {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::RoomNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::RoomFull { .. } => StatusCode::CONFLICT,
            AppError::InvalidRoomName { .. } => StatusCode::BAD_REQUEST,
            AppError::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotInRoom { .. } => StatusCode::NOT_FOUND,
            AppError::AlreadyJoined { .. } => StatusCode::CONFLICT,
            AppError::InvalidState { .. } => StatusCode::CONFLICT,
            AppError::InvalidProgress { .. } => StatusCode::BAD_REQUEST,
            AppError::AuthFailed => StatusCode::UNAUTHORIZED,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
