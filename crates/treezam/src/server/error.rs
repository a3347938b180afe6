//! HTTP error responses.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use crate::error::Error;

/// An error rendered as `{"error": "<message>"}`.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request was malformed or broke a rule.
    #[error("{0}")]
    BadRequest(String),

    /// Missing, expired or wrong credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// The addressed record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The upload exceeded the configured size limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Anything else. Details are logged, not returned.
    #[error("Internal server error")]
    Internal(#[source] Error),
}

impl ApiError {
    /// Create a 400 error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create the 401 error sent to unauthenticated callers.
    #[must_use]
    pub fn please_authenticate() -> Self {
        Self::Unauthorized("Please authenticate".to_string())
    }

    /// Create a 404 error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// The status code this error is sent with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Invalid(message) => Self::BadRequest(message),
            Error::Unauthorized(message) => Self::Unauthorized(message),
            Error::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Internal(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(err.body_text())
        } else {
            Self::BadRequest(err.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("Request failed: {}", err);
        }
        let status = self.status();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_status() {
        assert_eq!(
            ApiError::from(Error::invalid("Already joined this challenge")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::unauthorized("Invalid credentials")).status(),
            StatusCode::UNAUTHORIZED
        );

        let not_found = ApiError::from(Error::not_found("Challenge"));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.to_string(), "Challenge not found");
    }

    #[test]
    fn test_internal_errors_are_hidden() {
        let err = ApiError::from(Error::internal("disk on fire"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[tokio::test]
    async fn test_response_body() {
        let response = ApiError::bad_request("No image file provided").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "No image file provided");
    }
}
