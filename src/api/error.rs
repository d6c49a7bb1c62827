use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::engine::EngineError;

/// Errors surfaced to HTTP clients as `{"error": "<message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    /// The room is already booked for some of the requested nights.
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Validation(String),
    /// Details are logged, never sent.
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::RoomNotFound(_)
            | EngineError::ReservationNotFound(_)
            | EngineError::UserNotFound(_) => ApiError::NotFound(e.to_string()),
            EngineError::Conflict { .. } => ApiError::Conflict(e.to_string()),
            EngineError::Forbidden(_) => {
                ApiError::Forbidden("you do not own this reservation".into())
            }
            EngineError::InvalidCredentials => ApiError::Unauthorized(e.to_string()),
            EngineError::RoomExists(_)
            | EngineError::RoomInUse(_)
            | EngineError::UsernameTaken(_)
            | EngineError::EmailTaken(_)
            | EngineError::LimitExceeded(_) => ApiError::Validation(e.to_string()),
            EngineError::InvalidInput(msg) => ApiError::Validation(msg),
            EngineError::WalError(_) | EngineError::Internal(_) => {
                tracing::error!("request failed: {e}");
                ApiError::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}
