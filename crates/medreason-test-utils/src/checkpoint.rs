//! A tiny qwen2 checkpoint and LoRA adapter written to a temp directory.
//!
//! The model is a successor machine: embeddings are one-hot, every decoder
//! block contributes nothing (zero norms), and `lm_head` maps each token to
//! a fixed next token. Tokens without a configured successor are followed by
//! `<|return|>`. With the default chain, a prompt ending in the assistant
//! header continues as
//! `<|channel|>final<|message|>Rest<|return|>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use medreason_core::{ModelConfig, Precision};
use serde_json::json;
use tempfile::TempDir;

/// Vocabulary; ids are positions. Id 0 is the stop token.
pub const VOCAB: &[&str] = &[
    "<|return|>",
    "<unk>",
    "<|start|>",
    "<|end|>",
    "<|message|>",
    "<|channel|>",
    "system",
    "developer",
    "user",
    "assistant",
    "analysis",
    "final",
    "Rest",
    "fluids",
    "<|call|>",
    "#",
];

/// Tokens registered as special added tokens.
pub const SPECIAL_TOKENS: &[&str] = &[
    "<|return|>",
    "<|start|>",
    "<|end|>",
    "<|message|>",
    "<|channel|>",
    "<|call|>",
];

/// Default continuation after the assistant header.
pub const ANSWER_CHAIN: &[&str] = &[
    "assistant",
    "<|channel|>",
    "final",
    "<|message|>",
    "Rest",
    "<|return|>",
];

pub const HIDDEN_SIZE: usize = 32;
const INTERMEDIATE_SIZE: usize = 64;
const NUM_HEADS: usize = 4;
const NUM_KV_HEADS: usize = 2;
const HEAD_DIM: usize = HIDDEN_SIZE / NUM_HEADS;
const ADAPTER_RANK: usize = 2;
/// Long enough for decodes that never emit a stop token.
pub const MAX_POSITIONS: usize = 65_536;

pub const BASE_MODEL_ID: &str = "test/tiny-qwen2";
pub const ADAPTER_ID: &str = "test/tiny-qwen2-lora";

/// Id of `token` in [`VOCAB`].
pub fn token_id(token: &str) -> u32 {
    VOCAB
        .iter()
        .position(|t| *t == token)
        .unwrap_or_else(|| panic!("token {token} not in test vocabulary")) as u32
}

/// tokenizer.json for [`VOCAB`]: word-level, whitespace pre-tokenized,
/// decoded without separators.
pub fn tokenizer_json() -> String {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), json!(id)))
        .collect();
    let added: Vec<serde_json::Value> = SPECIAL_TOKENS
        .iter()
        .map(|token| {
            json!({
                "id": token_id(token),
                "content": token,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            })
        })
        .collect();

    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added,
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": {"type": "Fuse"},
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "<unk>"}
    })
    .to_string()
}

/// config.json for the tiny qwen2 model.
pub fn model_config_json() -> String {
    json!({
        "model_type": "qwen2",
        "architectures": ["Qwen2ForCausalLM"],
        "vocab_size": VOCAB.len(),
        "hidden_size": HIDDEN_SIZE,
        "intermediate_size": INTERMEDIATE_SIZE,
        "num_hidden_layers": 1,
        "num_attention_heads": NUM_HEADS,
        "num_key_value_heads": NUM_KV_HEADS,
        "max_position_embeddings": MAX_POSITIONS,
        "sliding_window": MAX_POSITIONS,
        "max_window_layers": 1,
        "tie_word_embeddings": false,
        "rope_theta": 10000.0,
        "rms_norm_eps": 1e-6,
        "use_sliding_window": false,
        "hidden_act": "silu"
    })
    .to_string()
}

fn matrix(rows: usize, cols: usize, data: Vec<f32>) -> Tensor {
    Tensor::from_vec(data, (rows, cols), &Device::Cpu).expect("matrix")
}

fn zeros(shape: &[usize]) -> Tensor {
    Tensor::zeros(shape, DType::F32, &Device::Cpu).expect("zeros")
}

fn ones(shape: &[usize]) -> Tensor {
    Tensor::ones(shape, DType::F32, &Device::Cpu).expect("ones")
}

/// Base weights implementing `chain` as successor pairs.
pub fn base_tensors(chain: &[&str]) -> HashMap<String, Tensor> {
    let vocab = VOCAB.len();

    let mut embed = vec![0f32; vocab * HIDDEN_SIZE];
    for id in 0..vocab {
        embed[id * HIDDEN_SIZE + id] = 1.0;
    }

    let mut successor: Vec<usize> = vec![0; vocab];
    for pair in chain.windows(2) {
        successor[token_id(pair[0]) as usize] = token_id(pair[1]) as usize;
    }
    let mut lm_head = vec![0f32; vocab * HIDDEN_SIZE];
    for (from, to) in successor.iter().enumerate() {
        lm_head[to * HIDDEN_SIZE + from] = 1.0;
    }

    let q_out = NUM_HEADS * HEAD_DIM;
    let kv_out = NUM_KV_HEADS * HEAD_DIM;
    let layer = "model.layers.0";

    let mut tensors = HashMap::new();
    tensors.insert(
        "model.embed_tokens.weight".to_string(),
        matrix(vocab, HIDDEN_SIZE, embed),
    );
    tensors.insert("lm_head.weight".to_string(), matrix(vocab, HIDDEN_SIZE, lm_head));
    tensors.insert("model.norm.weight".to_string(), ones(&[HIDDEN_SIZE]));

    for (name, shape) in [
        ("self_attn.q_proj.weight", vec![q_out, HIDDEN_SIZE]),
        ("self_attn.q_proj.bias", vec![q_out]),
        ("self_attn.k_proj.weight", vec![kv_out, HIDDEN_SIZE]),
        ("self_attn.k_proj.bias", vec![kv_out]),
        ("self_attn.v_proj.weight", vec![kv_out, HIDDEN_SIZE]),
        ("self_attn.v_proj.bias", vec![kv_out]),
        ("self_attn.o_proj.weight", vec![HIDDEN_SIZE, q_out]),
        ("mlp.gate_proj.weight", vec![INTERMEDIATE_SIZE, HIDDEN_SIZE]),
        ("mlp.up_proj.weight", vec![INTERMEDIATE_SIZE, HIDDEN_SIZE]),
        ("mlp.down_proj.weight", vec![HIDDEN_SIZE, INTERMEDIATE_SIZE]),
        ("input_layernorm.weight", vec![HIDDEN_SIZE]),
        ("post_attention_layernorm.weight", vec![HIDDEN_SIZE]),
    ] {
        tensors.insert(format!("{layer}.{name}"), zeros(&shape));
    }
    tensors
}

/// PEFT-style LoRA tensors for the q and v projections.
pub fn adapter_tensors() -> HashMap<String, Tensor> {
    let filled = |rows: usize, cols: usize| matrix(rows, cols, vec![0.01; rows * cols]);
    let prefix = "base_model.model.model.layers.0.self_attn";

    let mut tensors = HashMap::new();
    tensors.insert(
        format!("{prefix}.q_proj.lora_A.weight"),
        filled(ADAPTER_RANK, HIDDEN_SIZE),
    );
    tensors.insert(
        format!("{prefix}.q_proj.lora_B.weight"),
        filled(NUM_HEADS * HEAD_DIM, ADAPTER_RANK),
    );
    tensors.insert(
        format!("{prefix}.v_proj.lora_A.weight"),
        filled(ADAPTER_RANK, HIDDEN_SIZE),
    );
    tensors.insert(
        format!("{prefix}.v_proj.lora_B.weight"),
        filled(NUM_KV_HEADS * HEAD_DIM, ADAPTER_RANK),
    );
    tensors
}

/// Number of layers [`adapter_tensors`] adapts.
pub const ADAPTED_LAYERS: usize = 2;

/// Checkpoint laid out as a volume cache: `base_model/` and `adapter/`
/// under a temporary cache root.
pub struct TinyCheckpoint {
    root: TempDir,
}

impl TinyCheckpoint {
    /// Checkpoint continuing with [`ANSWER_CHAIN`].
    pub fn new() -> Self {
        Self::with_chain(ANSWER_CHAIN)
    }

    /// Checkpoint whose model follows `chain`.
    pub fn with_chain(chain: &[&str]) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let checkpoint = Self { root };

        let base = checkpoint.base_dir();
        std::fs::create_dir_all(&base).expect("mkdir base");
        std::fs::write(base.join("config.json"), model_config_json()).expect("config");
        std::fs::write(base.join("tokenizer.json"), tokenizer_json()).expect("tokenizer");
        std::fs::write(
            base.join("tokenizer_config.json"),
            json!({"eos_token": "<|return|>"}).to_string(),
        )
        .expect("tokenizer config");
        std::fs::write(
            base.join("generation_config.json"),
            json!({"eos_token_id": [token_id("<|return|>")]}).to_string(),
        )
        .expect("generation config");
        candle_core::safetensors::save(&base_tensors(chain), base.join("model.safetensors"))
            .expect("weights");

        let adapter = checkpoint.adapter_dir();
        std::fs::create_dir_all(&adapter).expect("mkdir adapter");
        std::fs::write(
            adapter.join("adapter_config.json"),
            json!({
                "r": ADAPTER_RANK,
                "lora_alpha": 4,
                "peft_type": "LORA",
                "target_modules": ["q_proj", "v_proj"],
                "base_model_name_or_path": BASE_MODEL_ID
            })
            .to_string(),
        )
        .expect("adapter config");
        candle_core::safetensors::save(
            &adapter_tensors(),
            adapter.join("adapter_model.safetensors"),
        )
        .expect("adapter weights");

        checkpoint
    }

    pub fn cache_root(&self) -> &Path {
        self.root.path()
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.path().join("base_model")
    }

    pub fn adapter_dir(&self) -> PathBuf {
        self.root.path().join("adapter")
    }

    /// Replace a file of the base model snapshot.
    pub fn write_base_file(&self, name: &str, contents: &str) {
        std::fs::write(self.base_dir().join(name), contents).expect("write base file");
    }

    /// Replace the adapter weights.
    pub fn write_adapter_weights(&self, tensors: &HashMap<String, Tensor>) {
        candle_core::safetensors::save(tensors, self.adapter_dir().join("adapter_model.safetensors"))
            .expect("adapter weights");
    }

    /// Model configuration reading this checkpoint on CPU in f32.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            base_model_id: BASE_MODEL_ID.to_string(),
            adapter_id: ADAPTER_ID.to_string(),
            cache_root: self.cache_root().to_path_buf(),
            precision: Precision::F32,
            use_cuda: false,
            cuda_ordinal: 0,
            warmup: true,
            preload: false,
            hf_token: None,
        }
    }
}

impl Default for TinyCheckpoint {
    fn default() -> Self {
        Self::new()
    }
}
