//! Maps portal failures onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use portal_core::portal::{FieldErrors, PortalError};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    /// Missing, expired or otherwise unusable bearer token.
    Unauthorized,

    NotFound(String),

    /// Form validation failed; carries per-field messages.
    Validation(FieldErrors),

    BadRequest(String),

    /// The request exists but its results are not published yet.
    Conflict(String),

    InternalServerError(String),
}

impl From<PortalError> for ApiError {
    fn from(err: PortalError) -> Self {
        match err {
            PortalError::Validation(errors) => ApiError::Validation(errors),
            PortalError::NotFound(message) => ApiError::NotFound(message),
            PortalError::NotReady(_) => ApiError::Conflict(err.to_string()),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" })),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ApiError::Validation(errors) => (StatusCode::UNPROCESSABLE_ENTITY, json!({ "errors": errors })),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, json!({ "error": message })),
            ApiError::InternalServerError(err) => {
                tracing::error!("Internal server error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "An internal server error occurred" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
