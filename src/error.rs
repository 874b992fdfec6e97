use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::registry::RegistryError;

/// Errors surfaced by the HTTP handlers, rendered as `{ "error": message }`
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    AliasTaken(String),
    Exhausted,
    NotFound(String),
    WrongPassword,
    Unauthorized,
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn link_not_found() -> Self {
        ApiError::NotFound("Link not found or has expired".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::AliasTaken(alias) => (
                StatusCode::CONFLICT,
                format!("Custom alias '{alias}' is already taken"),
            ),
            ApiError::Exhausted => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Could not allocate a short code, please retry".to_string(),
            ),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::WrongPassword => (StatusCode::UNAUTHORIZED, "Incorrect password".to_string()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Invalid or missing API key".to_string(),
            ),
            ApiError::Internal(err) => {
                error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(message) => ApiError::Validation(message),
            RegistryError::AliasTaken(alias) => ApiError::AliasTaken(alias),
            RegistryError::Exhausted { .. } => ApiError::Exhausted,
            RegistryError::NotFound => ApiError::NotFound("URL not found".to_string()),
            RegistryError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}
