use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use crate::models::SchedulingStatus;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Username or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}

/* -------------------------
   Scheduling domain errors
--------------------------*/

/// Raised by the scheduling core; converted into ApiError at the handlers.
/// Conflict messages name the colliding procedure and its window so the
/// frontend can show them inline next to the time field.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("'{procedure}' is already booked from {} to {}", .start.format("%Y-%m-%d %H:%M"), .end.format("%H:%M"))]
    Conflict {
        procedure: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("status cannot move from {from} to {to}")]
    InvalidTransition {
        from: SchedulingStatus,
        to: SchedulingStatus,
    },
    #[error("scheduled_at must be at least one minute in the future")]
    PastDate,
}

impl From<SchedulingError> for ApiError {
    fn from(e: SchedulingError) -> Self {
        match &e {
            SchedulingError::Conflict { .. } => ApiError::Conflict("SCHEDULE_CONFLICT", e.to_string()),
            SchedulingError::InvalidTransition { .. } => {
                ApiError::BadRequest("VALIDATION_ERROR", e.to_string())
            }
            SchedulingError::PastDate => ApiError::BadRequest("VALIDATION_ERROR", e.to_string()),
        }
    }
}
