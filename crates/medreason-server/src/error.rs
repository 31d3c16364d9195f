//! Error responses of the HTTP adapter.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-level failures and their wire representation.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not parseable JSON.
    #[error("Body must be valid JSON with a 'message' field.")]
    InvalidJson,

    /// `message` is missing, not a string, or empty.
    #[error("Field 'message' (string) is required.")]
    MissingMessage,

    /// Generation failed. Details stay in the server log.
    #[error("Internal model error. Check logs.")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson | ApiError::MissingMessage => StatusCode::OK,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self {
            ApiError::InvalidJson | ApiError::MissingMessage => json!({ "error": self.to_string() }),
            ApiError::Internal => json!({ "detail": self.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_not_server_faults() {
        assert_eq!(ApiError::InvalidJson.status(), StatusCode::OK);
        assert_eq!(ApiError::MissingMessage.status(), StatusCode::OK);
        assert_eq!(
            ApiError::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
