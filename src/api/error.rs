// src/api/error.rs
// Centralized error handling for HTTP API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// Standard API error response format.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status_code: StatusCode,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::NOT_FOUND,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": true,
            "message": self.message,
            "status": self.status_code.as_u16(),
        });
        (self.status_code, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Extension trait for converting fallible operations to ApiError while
/// logging the underlying cause.
pub trait IntoApiError<T> {
    fn into_api_error(self, message: &str) -> Result<T, ApiError>;
}

impl<T, E> IntoApiError<T> for Result<T, E>
where
    E: std::fmt::Debug,
{
    fn into_api_error(self, message: &str) -> Result<T, ApiError> {
        self.map_err(|e| {
            error!("{}: {:?}", message, e);
            ApiError::internal(message)
        })
    }
}

/// Extension trait for `Option<T>` lookups that should 404 on `None`.
pub trait IntoApiErrorOption<T> {
    fn ok_or_not_found(self, message: &str) -> Result<T, ApiError>;
}

impl<T> IntoApiErrorOption<T> for Option<T> {
    fn ok_or_not_found(self, message: &str) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_status() {
        assert_eq!(
            ApiError::internal("x").status_code,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::bad_request("x").status_code,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::not_found("x").status_code, StatusCode::NOT_FOUND);
    }

    #[test]
    fn option_extension_maps_none_to_404() {
        let missing: Option<i32> = None;
        let err = missing.ok_or_not_found("Conversation not found").unwrap_err();
        assert_eq!(err.status_code, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Conversation not found");
    }

    #[test]
    fn result_extension_maps_err_to_500() {
        let failing: Result<(), &str> = Err("boom");
        let err = failing.into_api_error("Operation failed").unwrap_err();
        assert_eq!(err.status_code, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
