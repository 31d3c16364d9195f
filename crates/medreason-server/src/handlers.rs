//! Request handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info_span, Instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Successful generation.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub version: String,
}

/// Extract the user message from a raw request body.
///
/// The body must be a JSON object whose `message` is a non-empty string.
pub fn parse_message(body: &[u8]) -> Result<String, ApiError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)?;

    match value.get("message") {
        Some(serde_json::Value::String(message)) if !message.is_empty() => Ok(message.clone()),
        _ => Err(ApiError::MissingMessage),
    }
}

/// `POST /` and `POST /generate`.
pub async fn generate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("generate", %request_id);

    async move {
        let message = match parse_message(&body) {
            Ok(message) => message,
            Err(e) => {
                debug!(reason = %e, "Rejected request");
                return Err(e);
            }
        };
        debug!(message_len = message.len(), "Generating");

        match state.generator.generate(&message).await {
            Ok(response) => Ok(Json(GenerateResponse { response })),
            Err(e) => {
                error!(error = %e, "Generation failed");
                Err(ApiError::Internal)
            }
        }
    }
    .instrument(span)
    .await
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: state.generator.is_ready(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message() {
        assert_eq!(
            parse_message(br#"{"message": "What is sepsis?"}"#).expect("valid"),
            "What is sepsis?"
        );
        assert_eq!(
            parse_message(br#"{"message": "  ", "extra": 1}"#).expect("whitespace"),
            "  "
        );
    }

    #[test]
    fn test_parse_message_rejections() {
        assert!(matches!(parse_message(b"not json"), Err(ApiError::InvalidJson)));
        assert!(matches!(parse_message(b""), Err(ApiError::InvalidJson)));
        let bodies: [&[u8]; 6] = [
            br#"{}"#,
            br#"{"message": 5}"#,
            br#"{"message": ""}"#,
            br#"{"message": null}"#,
            br#"["message"]"#,
            br#""message""#,
        ];
        for body in bodies {
            assert!(matches!(parse_message(body), Err(ApiError::MissingMessage)));
        }
    }
}
