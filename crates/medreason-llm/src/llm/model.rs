//! Decoder architectures the server can run.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{self, Llama, LlamaConfig};
use candle_transformers::models::qwen2::{self, ModelForCausalLM as Qwen2ForCausalLM};
use serde::Deserialize;
use tracing::info;

use crate::error::{LlmError, LlmResult};

/// `model_type` values accepted in config.json.
pub const SUPPORTED_ARCHITECTURES: &[&str] = &["qwen2", "llama"];

#[derive(Debug, Deserialize)]
struct ArchitectureHeader {
    #[serde(default)]
    model_type: Option<String>,
}

/// The supported architecture named by `model_type` in `config_json`.
///
/// Reads nothing but config.json, so an unusable model is rejected before
/// any weights are fetched or loaded.
pub fn check_architecture(config_json: &str) -> LlmResult<&'static str> {
    let header: ArchitectureHeader = serde_json::from_str(config_json)
        .map_err(|e| LlmError::load(format!("Failed to parse config.json: {}", e)))?;
    let model_type = header.model_type.unwrap_or_default();

    SUPPORTED_ARCHITECTURES
        .iter()
        .copied()
        .find(|arch| *arch == model_type)
        .ok_or_else(|| LlmError::UnsupportedArchitecture {
            model_type: if model_type.is_empty() {
                "<missing>".to_string()
            } else {
                model_type
            },
            supported: SUPPORTED_ARCHITECTURES.join(", "),
        })
}

/// A causal language model with its KV cache.
pub enum CausalLm {
    Qwen2(Qwen2ForCausalLM),
    Llama {
        model: Llama,
        cache: llama::Cache,
        config: llama::Config,
        dtype: DType,
        device: Device,
    },
}

impl std::fmt::Debug for CausalLm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CausalLm").field(&self.architecture()).finish()
    }
}

impl CausalLm {
    /// Build the architecture named by `model_type` in `config_json` from
    /// the weights in `vb`.
    pub fn from_config_json(config_json: &str, vb: VarBuilder) -> LlmResult<Self> {
        match check_architecture(config_json)? {
            "qwen2" => {
                let config: qwen2::Config = serde_json::from_str(config_json).map_err(|e| {
                    LlmError::load(format!("Failed to parse qwen2 config: {}", e))
                })?;
                info!(
                    hidden_size = config.hidden_size,
                    num_layers = config.num_hidden_layers,
                    vocab_size = config.vocab_size,
                    "Loaded model configuration"
                );
                let model = Qwen2ForCausalLM::new(&config, vb)
                    .map_err(|e| LlmError::load(format!("Failed to create model: {}", e)))?;
                Ok(CausalLm::Qwen2(model))
            }
            "llama" => {
                let raw: LlamaConfig = serde_json::from_str(config_json).map_err(|e| {
                    LlmError::load(format!("Failed to parse llama config: {}", e))
                })?;
                let config = raw.into_config(false);
                info!(
                    hidden_size = config.hidden_size,
                    num_layers = config.num_hidden_layers,
                    vocab_size = config.vocab_size,
                    "Loaded model configuration"
                );
                let dtype = vb.dtype();
                let device = vb.device().clone();
                let model = Llama::load(vb, &config)
                    .map_err(|e| LlmError::load(format!("Failed to create model: {}", e)))?;
                let cache = llama::Cache::new(true, dtype, &config, &device)
                    .map_err(|e| LlmError::load(format!("Failed to allocate KV cache: {}", e)))?;
                Ok(CausalLm::Llama {
                    model,
                    cache,
                    config,
                    dtype,
                    device,
                })
            }
            other => Err(LlmError::load(format!("No loader for '{}'", other))),
        }
    }

    pub fn architecture(&self) -> &'static str {
        match self {
            CausalLm::Qwen2(_) => "qwen2",
            CausalLm::Llama { .. } => "llama",
        }
    }

    /// Logits for the last position of `input` (shape `[1, seq_len]`),
    /// whose first token sits at `offset` in the cached sequence.
    pub fn forward(&mut self, input: &Tensor, offset: usize) -> candle_core::Result<Tensor> {
        match self {
            CausalLm::Qwen2(model) => model.forward(input, offset),
            CausalLm::Llama { model, cache, .. } => model.forward(input, offset, cache),
        }
    }

    pub fn clear_kv_cache(&mut self) -> candle_core::Result<()> {
        match self {
            CausalLm::Qwen2(model) => {
                model.clear_kv_cache();
                Ok(())
            }
            CausalLm::Llama {
                cache,
                config,
                dtype,
                device,
                ..
            } => {
                *cache = llama::Cache::new(true, *dtype, config, device)?;
                Ok(())
            }
        }
    }
}

/// Reduce logits of shape `[vocab]`, `[1, vocab]` or `[1, seq_len, vocab]`
/// to the greedy next token.
pub fn greedy_token(logits: &Tensor) -> LlmResult<u32> {
    let inference = |e: candle_core::Error| LlmError::inference(e.to_string());

    let last = match logits.dims().len() {
        1 => logits.clone(),
        2 => logits.squeeze(0).map_err(inference)?,
        3 => {
            let logits = logits.squeeze(0).map_err(inference)?;
            let seq_len = logits.dim(0).map_err(inference)?;
            logits.get(seq_len - 1).map_err(inference)?
        }
        _ => {
            return Err(LlmError::inference(format!(
                "Unexpected logits shape: {:?}",
                logits.dims()
            )));
        }
    };

    last.to_dtype(DType::F32)
        .and_then(|l| l.argmax(0))
        .and_then(|t| t.to_scalar::<u32>())
        .map_err(inference)
}
