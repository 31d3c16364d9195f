//! HTTP contract tests against stub generators.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use medreason_core::ServerConfig;
use medreason_llm::{
    AnswerGenerator, GenerationService, LlmError, ModelResolver, NOT_FINETUNED_MESSAGE,
};
use medreason_server::{build_router, spawn_preload, AppState};
use medreason_test_utils::checkpoint::TinyCheckpoint;
use medreason_test_utils::harmony;
use medreason_test_utils::stubs::{FailingGenerator, StubGenerator};
use serde_json::Value;
use tower::ServiceExt;

fn router(generator: Arc<dyn AnswerGenerator>) -> Router {
    build_router(AppState::new(generator), &ServerConfig::default())
}

async fn post(app: Router, uri: &str, body: &'static str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = serde_json::from_slice(&bytes).expect("json body");
    (status, json)
}

#[tokio::test]
async fn test_generate_returns_thinking_and_final() {
    let stub = Arc::new(StubGenerator::new(harmony::with_reasoning(
        "Fever, cough and myalgia are typical.",
        "Fever, cough, sore throat, body aches.",
    )));
    let (status, body) = post(
        router(stub.clone()),
        "/",
        r#"{"message": "What are symptoms of flu?"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response = body["response"].as_str().expect("response field");
    assert!(response.starts_with("Thinking:\nFever, cough and myalgia are typical."));
    assert!(response.contains("\n\nFinal:\nFever, cough, sore throat, body aches."));
    assert_eq!(stub.last_message().as_deref(), Some("What are symptoms of flu?"));
}

#[tokio::test]
async fn test_generate_alias_route() {
    let stub = Arc::new(StubGenerator::new(harmony::final_only("Rest.")));
    let (status, body) = post(router(stub), "/generate", r#"{"message": "hi"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Final:\nRest.");
}

#[tokio::test]
async fn test_unstructured_output_returns_fallback() {
    let stub = Arc::new(StubGenerator::new(harmony::untagged("I think it is flu.")));
    let (status, body) = post(router(stub), "/", r#"{"message": "hi"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], NOT_FINETUNED_MESSAGE);
}

#[tokio::test]
async fn test_validation_errors_skip_generation() {
    let stub = Arc::new(StubGenerator::new(harmony::final_only("unused")));

    let cases = [
        ("{}", "Field 'message' (string) is required."),
        (r#"{"message": 5}"#, "Field 'message' (string) is required."),
        (r#"{"message": ""}"#, "Field 'message' (string) is required."),
        ("not json", "Body must be valid JSON with a 'message' field."),
    ];
    for (body, expected) in cases {
        let (status, json) = post(router(stub.clone()), "/", body).await;
        assert_eq!(status, StatusCode::OK, "body {body}");
        assert_eq!(json["error"], expected, "body {body}");
        assert!(json.get("response").is_none());
    }
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_generation_failure_hides_details() {
    let failing = Arc::new(FailingGenerator::default());
    let (status, body) = post(router(failing), "/", r#"{"message": "hi"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Internal model error. Check logs.");
    assert!(!body.to_string().contains("CUDA"));
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let stub = Arc::new(StubGenerator::new(harmony::final_only("ok")));
    let app = router(stub.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], false);

    post(app.clone(), "/", r#"{"message": "hi"}"#).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["model_loaded"], true);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let stub = Arc::new(StubGenerator::new(harmony::final_only("unused")));
    let config = ServerConfig {
        max_payload_size: 16,
        ..ServerConfig::default()
    };
    let app = build_router(AppState::new(stub.clone()), &config);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::from(r#"{"message": "this body is longer than sixteen bytes"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(stub.calls(), 0);
}

/// The tiny checkpoint only ever emits a final section, so this covers the
/// final-only rendering. Thinking plus final output is covered through
/// `StubGenerator` above.
#[tokio::test]
async fn test_end_to_end_with_tiny_checkpoint() {
    let checkpoint = TinyCheckpoint::new();
    let service = GenerationService::new(
        Arc::new(ModelResolver::new(checkpoint.model_config())),
        "You are a medical reasoning assistant",
    );
    let (status, body) = post(
        router(Arc::new(service)),
        "/",
        r#"{"message": "What are symptoms of flu?"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Final:\nRest");
}

fn service_for(checkpoint: &TinyCheckpoint) -> Arc<GenerationService> {
    Arc::new(GenerationService::new(
        Arc::new(ModelResolver::new(checkpoint.model_config())),
        "You are a medical reasoning assistant",
    ))
}

#[tokio::test]
async fn test_preload_reports_unsupported_architecture() {
    let checkpoint = TinyCheckpoint::new();
    checkpoint.write_base_file("config.json", r#"{"model_type": "gpt_oss"}"#);

    let err = spawn_preload(service_for(&checkpoint))
        .await
        .expect("fatal preload error");
    assert!(matches!(err, LlmError::UnsupportedArchitecture { .. }));
}

#[tokio::test]
async fn test_preload_success_reports_nothing() {
    let checkpoint = TinyCheckpoint::new();
    let service = service_for(&checkpoint);

    assert!(spawn_preload(Arc::clone(&service)).await.is_err());
    assert!(service.is_ready());
}
