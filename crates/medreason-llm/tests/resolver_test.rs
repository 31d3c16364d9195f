//! End-to-end resolution against a tiny on-disk checkpoint.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use candle_core::{DType, Device, Tensor};
use medreason_core::ConversationRequest;
use medreason_llm::llm::TemplateOrigin;
use medreason_llm::{parser, DecodingPolicy, LlmError, ModelResolver, WeightSource};
use medreason_test_utils::checkpoint::{token_id, TinyCheckpoint};

const QUESTION: &str = "What are symptoms of flu?";

#[tokio::test]
async fn test_resolve_and_generate_final_answer() {
    let checkpoint = TinyCheckpoint::new();
    let resolver = ModelResolver::new(checkpoint.model_config());

    assert!(resolver.base_source().is_local());
    assert!(resolver.adapter_source().is_local());

    let handle = resolver.resolve().await.expect("resolve");
    assert_eq!(handle.architecture(), "qwen2");
    assert_eq!(handle.template().origin(), TemplateOrigin::Harmony);
    assert_eq!(handle.stop_tokens()[0], token_id("<|return|>"));

    let prompt = handle
        .render_prompt(&ConversationRequest::with_default_system(QUESTION))
        .expect("prompt");
    assert!(prompt.ends_with("<|start|>assistant"));

    let generation = handle
        .generate(&prompt, &DecodingPolicy::default())
        .expect("generate");
    assert!(generation.stopped);
    assert_eq!(generation.generated_tokens, 5);
    assert!(generation
        .text
        .ends_with("<|start|>assistant<|channel|>final<|message|>Rest<|return|>"));
    assert_eq!(parser::render(&generation.text), "Final:\nRest");
}

#[tokio::test]
async fn test_full_recompute_matches_kv_cache() {
    let checkpoint = TinyCheckpoint::new();
    let handle = ModelResolver::new(checkpoint.model_config())
        .resolve()
        .await
        .expect("resolve");
    let prompt = handle
        .render_prompt(&ConversationRequest::with_default_system(QUESTION))
        .expect("prompt");

    let cached = handle
        .generate(&prompt, &DecodingPolicy::default())
        .expect("cached");
    let recomputed = handle
        .generate(
            &prompt,
            &DecodingPolicy {
                use_kv_cache: false,
                ..DecodingPolicy::default()
            },
        )
        .expect("recomputed");
    assert_eq!(cached.text, recomputed.text);
}

#[tokio::test]
async fn test_generation_stops_at_token_limit() {
    let checkpoint = TinyCheckpoint::with_chain(&["assistant", "Rest", "Rest"]);
    let handle = ModelResolver::new(checkpoint.model_config())
        .resolve()
        .await
        .expect("resolve");
    let prompt = handle
        .render_prompt(&ConversationRequest::with_default_system(QUESTION))
        .expect("prompt");

    let generation = handle
        .generate(&prompt, &DecodingPolicy::with_max_new_tokens(3))
        .expect("generate");
    assert!(!generation.stopped);
    assert_eq!(generation.generated_tokens, 3);
    assert!(generation.text.ends_with("RestRestRest"));
    assert_eq!(parser::render(&generation.text), parser::NOT_FINETUNED_MESSAGE);
}

#[tokio::test]
async fn test_cancelled_generation_does_no_work() {
    let checkpoint = TinyCheckpoint::new();
    let handle = ModelResolver::new(checkpoint.model_config())
        .resolve()
        .await
        .expect("resolve");
    let prompt = handle
        .render_prompt(&ConversationRequest::with_default_system(QUESTION))
        .expect("prompt");

    let err = handle
        .generate_cancellable(&prompt, &DecodingPolicy::default(), &AtomicBool::new(true))
        .unwrap_err();
    assert!(matches!(err, LlmError::Cancelled { generated_tokens: 0 }));

    // The KV cache was reset, so the next decode is unaffected.
    let generation = handle
        .generate(&prompt, &DecodingPolicy::default())
        .expect("generate");
    assert_eq!(parser::render(&generation.text), "Final:\nRest");
}

#[tokio::test]
async fn test_model_chat_template_is_used() {
    let checkpoint = TinyCheckpoint::new();
    checkpoint.write_base_file(
        "tokenizer_config.json",
        r#"{
            "eos_token": "<|return|>",
            "chat_template": "{% for m in messages %}<|start|>{{ m.role }}<|message|>{{ m.content }}<|end|>{% endfor %}{% if add_generation_prompt %}<|start|>assistant{% endif %}"
        }"#,
    );

    let handle = ModelResolver::new(checkpoint.model_config())
        .resolve()
        .await
        .expect("resolve");
    assert_eq!(handle.template().origin(), TemplateOrigin::Model);

    let prompt = handle
        .render_prompt(&ConversationRequest::new("Be brief.", "hi"))
        .expect("prompt");
    assert_eq!(
        prompt,
        "<|start|>system<|message|>Be brief.<|end|><|start|>user<|message|>hi<|end|><|start|>assistant"
    );
    let generation = handle
        .generate(&prompt, &DecodingPolicy::default())
        .expect("generate");
    assert_eq!(parser::render(&generation.text), "Final:\nRest");
}

#[tokio::test]
async fn test_adapter_without_lora_layers_fails_to_load() {
    let checkpoint = TinyCheckpoint::new();
    let mut tensors = HashMap::new();
    tensors.insert(
        "base_model.model.lm_head.weight".to_string(),
        Tensor::zeros((2, 2), DType::F32, &Device::Cpu).expect("zeros"),
    );
    checkpoint.write_adapter_weights(&tensors);

    let err = ModelResolver::new(checkpoint.model_config())
        .resolve()
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::AdapterMerge { .. }));
    assert!(err.is_load_failure());
}

#[tokio::test]
async fn test_unsupported_architecture_fails_to_load() {
    let checkpoint = TinyCheckpoint::new();
    checkpoint.write_base_file("config.json", r#"{"model_type": "gpt_oss"}"#);
    // Rejected before any weights are read.
    checkpoint.write_base_file("model.safetensors", "not a safetensors file");

    let err = ModelResolver::new(checkpoint.model_config())
        .resolve()
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::UnsupportedArchitecture { .. }));
}

#[tokio::test]
async fn test_missing_tokenizer_in_volume_cache() {
    let checkpoint = TinyCheckpoint::new();
    std::fs::remove_file(checkpoint.base_dir().join("tokenizer.json")).expect("remove");

    let resolver = ModelResolver::new(checkpoint.model_config());
    assert_eq!(
        resolver.base_source(),
        WeightSource::VolumeCache(checkpoint.base_dir())
    );
    let err = resolver.resolve().await.unwrap_err();
    assert!(matches!(err, LlmError::ModelNotFound { .. }));
}
