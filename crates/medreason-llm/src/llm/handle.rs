//! A loaded, merged model ready for generation.

use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::{Device, Tensor};
use medreason_core::ConversationRequest;
use medreason_core::config::constants::DEFAULT_MAX_NEW_TOKENS;
use parking_lot::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, warn};

use super::model::{greedy_token, CausalLm};
use super::prompt::{ChatTemplate, TokenizerConfig};
use crate::error::{LlmError, LlmResult};

/// Harmony terminators, added to the stop set when the vocabulary has them.
const HARMONY_STOP_TOKENS: &[&str] = &["<|return|>", "<|call|>"];

/// Greedy, single-beam decoding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodingPolicy {
    /// Upper bound on newly generated tokens.
    pub max_new_tokens: usize,
    /// Feed one token per step against the KV cache instead of the whole
    /// sequence.
    pub use_kv_cache: bool,
}

impl Default for DecodingPolicy {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            use_kv_cache: true,
        }
    }
}

impl DecodingPolicy {
    pub fn with_max_new_tokens(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            ..Self::default()
        }
    }
}

/// Output of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Prompt and continuation decoded together, special tokens kept.
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    /// A stop token ended generation before the token limit.
    pub stopped: bool,
}

/// Merged model, tokenizer and chat template.
///
/// The decoder is behind a mutex: generations on one handle run one at a
/// time since they share the KV cache.
pub struct ModelHandle {
    model: Mutex<CausalLm>,
    tokenizer: Tokenizer,
    template: ChatTemplate,
    stop_tokens: Vec<u32>,
    device: Device,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("template", &self.template)
            .field("stop_tokens", &self.stop_tokens)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    pub fn new(
        model: CausalLm,
        tokenizer: Tokenizer,
        template: ChatTemplate,
        stop_tokens: Vec<u32>,
        device: Device,
    ) -> Self {
        Self {
            model: Mutex::new(model),
            tokenizer,
            template,
            stop_tokens,
            device,
        }
    }

    pub fn architecture(&self) -> &'static str {
        self.model.lock().architecture()
    }

    pub fn stop_tokens(&self) -> &[u32] {
        &self.stop_tokens
    }

    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }

    /// Render the conversation through the chat template.
    pub fn render_prompt(&self, request: &ConversationRequest) -> LlmResult<String> {
        self.template.render(&request.messages())
    }

    /// Greedy generation from a rendered prompt.
    ///
    /// The prompt is tokenized without extra special tokens since the
    /// template already placed them. Generation ends at the first stop
    /// token, which is kept in the output, or after `max_new_tokens`.
    pub fn generate(&self, prompt: &str, policy: &DecodingPolicy) -> LlmResult<Generation> {
        self.generate_cancellable(prompt, policy, &AtomicBool::new(false))
    }

    /// [`generate`](Self::generate) that gives up once `cancel` is set.
    ///
    /// The flag is checked before every decoding step, including the first,
    /// so a request cancelled while queued on the model lock does no work.
    pub fn generate_cancellable(
        &self,
        prompt: &str,
        policy: &DecodingPolicy,
        cancel: &AtomicBool,
    ) -> LlmResult<Generation> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| LlmError::inference(format!("Tokenization failed: {}", e)))?;
        let mut tokens = encoding.get_ids().to_vec();
        let prompt_tokens = tokens.len();
        if prompt_tokens == 0 {
            return Err(LlmError::inference("Prompt encoded to zero tokens"));
        }

        let mut model = self.model.lock();
        model
            .clear_kv_cache()
            .map_err(|e| LlmError::inference(format!("Failed to reset KV cache: {}", e)))?;

        let mut input = tokens.clone();
        let mut offset = 0;
        let mut stopped = false;
        let mut cancelled = false;

        for _ in 0..policy.max_new_tokens {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }

            let input_tensor = Tensor::new(input.as_slice(), &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(|e| {
                    LlmError::inference(format!("Failed to create input tensor: {}", e))
                })?;
            let logits = model
                .forward(&input_tensor, offset)
                .map_err(|e| LlmError::inference(format!("Forward pass failed: {}", e)))?;
            let next_token = greedy_token(&logits)?;
            tokens.push(next_token);

            if self.stop_tokens.contains(&next_token) {
                stopped = true;
                break;
            }

            if policy.use_kv_cache {
                offset = tokens.len() - 1;
                input = vec![next_token];
            } else {
                model
                    .clear_kv_cache()
                    .map_err(|e| LlmError::inference(format!("Failed to reset KV cache: {}", e)))?;
                offset = 0;
                input = tokens.clone();
            }
        }

        if let Err(e) = model.clear_kv_cache() {
            warn!(error = %e, "Failed to release KV cache");
        }
        drop(model);

        if cancelled {
            let generated_tokens = tokens.len() - prompt_tokens;
            debug!(generated_tokens, "Generation cancelled");
            return Err(LlmError::Cancelled { generated_tokens });
        }

        let text = self
            .tokenizer
            .decode(&tokens, false)
            .map_err(|e| LlmError::inference(format!("Decoding failed: {}", e)))?;
        let generated_tokens = tokens.len() - prompt_tokens;

        debug!(
            prompt_tokens,
            generated_tokens,
            stopped,
            output_len = text.len(),
            "Generation complete"
        );

        Ok(Generation {
            text,
            prompt_tokens,
            generated_tokens,
            stopped,
        })
    }

    /// Run one single-token forward pass so kernels and allocations are
    /// ready before the first real request.
    pub fn warm_up(&self) -> LlmResult<()> {
        let token = self.stop_tokens.first().copied().unwrap_or(0);
        let mut model = self.model.lock();

        let input = Tensor::new(&[token], &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| LlmError::inference(format!("Failed to create warm-up input: {}", e)))?;
        let result = model
            .forward(&input, 0)
            .map_err(|e| LlmError::inference(format!("Warm-up forward pass failed: {}", e)))
            .and_then(|logits| greedy_token(&logits));

        model
            .clear_kv_cache()
            .map_err(|e| LlmError::inference(format!("Failed to reset KV cache: {}", e)))?;
        result.map(|_| ())
    }
}

/// Token ids that end generation.
///
/// Collected from `eos_token_id` in generation_config.json (a single id or a
/// list), the tokenizer config's `eos_token`, and harmony terminators present
/// in the vocabulary. Order is preserved and duplicates dropped.
pub fn resolve_stop_tokens(
    tokenizer: &Tokenizer,
    tokenizer_config: Option<&TokenizerConfig>,
    generation_config_json: Option<&str>,
) -> Vec<u32> {
    let mut stops: Vec<u32> = Vec::new();
    let mut push = |id: u32| {
        if !stops.contains(&id) {
            stops.push(id);
        }
    };

    if let Some(json) = generation_config_json {
        match serde_json::from_str::<serde_json::Value>(json) {
            Ok(value) => match value.get("eos_token_id") {
                Some(serde_json::Value::Number(n)) => {
                    if let Some(id) = n.as_u64() {
                        push(id as u32);
                    }
                }
                Some(serde_json::Value::Array(ids)) => {
                    for id in ids.iter().filter_map(|v| v.as_u64()) {
                        push(id as u32);
                    }
                }
                _ => {}
            },
            Err(e) => warn!(error = %e, "Ignoring unparsable generation config"),
        }
    }

    if let Some(eos) = tokenizer_config.and_then(|c| c.eos_token()) {
        match tokenizer.token_to_id(eos) {
            Some(id) => push(id),
            None => warn!(token = eos, "eos_token not in vocabulary"),
        }
    }

    for token in HARMONY_STOP_TOKENS {
        if let Some(id) = tokenizer.token_to_id(token) {
            push(id);
        }
    }

    if stops.is_empty() {
        warn!("No stop tokens found, generation will always run to the token limit");
    }
    stops
}
