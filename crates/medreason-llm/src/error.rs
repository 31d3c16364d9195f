//! Error types for model resolution and generation.

use thiserror::Error;

/// Errors raised while resolving, merging or running the model.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Required model file is missing.
    #[error("Model file not found: {path}")]
    ModelNotFound { path: String },

    /// Weights, tokenizer or configuration could not be loaded.
    #[error("Failed to load model: {message}")]
    LlmLoadError { message: String },

    /// `model_type` in config.json is not one of the supported decoders.
    #[error("Unsupported model architecture '{model_type}' (supported: {supported})")]
    UnsupportedArchitecture {
        model_type: String,
        supported: String,
    },

    /// LoRA adapter could not be folded into the base weights.
    #[error("Adapter merge failed: {message}")]
    AdapterMerge { message: String },

    /// Remote model registry request failed.
    #[error("Registry request for '{repo_id}' failed: {message}")]
    RemoteRegistry { repo_id: String, message: String },

    /// Chat template failed to compile or render.
    #[error("Chat template error: {message}")]
    Template { message: String },

    /// Tokenization, forward pass or decoding failed.
    #[error("Inference failed: {message}")]
    LlmInferenceError { message: String },

    /// Generation exceeded its wall-clock ceiling.
    #[error("Generation timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// The caller stopped waiting and the decode was abandoned.
    #[error("Generation cancelled after {generated_tokens} tokens")]
    Cancelled { generated_tokens: usize },
}

impl LlmError {
    pub(crate) fn load(message: impl Into<String>) -> Self {
        Self::LlmLoadError {
            message: message.into(),
        }
    }

    pub(crate) fn inference(message: impl Into<String>) -> Self {
        Self::LlmInferenceError {
            message: message.into(),
        }
    }

    pub(crate) fn merge(message: impl Into<String>) -> Self {
        Self::AdapterMerge {
            message: message.into(),
        }
    }

    /// Whether the error happened before the model became usable.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound { .. }
                | Self::LlmLoadError { .. }
                | Self::UnsupportedArchitecture { .. }
                | Self::AdapterMerge { .. }
                | Self::RemoteRegistry { .. }
        )
    }

    /// Whether retrying the load can never succeed with the current
    /// configuration.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::UnsupportedArchitecture { .. })
    }
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failure_classification() {
        assert!(LlmError::merge("no pairs").is_load_failure());
        assert!(LlmError::RemoteRegistry {
            repo_id: "org/model".into(),
            message: "404".into()
        }
        .is_load_failure());
        assert!(!LlmError::inference("forward").is_load_failure());
        assert!(!LlmError::Timeout { millis: 5000 }.is_load_failure());
        assert!(!LlmError::Cancelled { generated_tokens: 3 }.is_load_failure());
    }

    #[test]
    fn test_unrecoverable_only_for_architecture() {
        assert!(LlmError::UnsupportedArchitecture {
            model_type: "gpt_oss".into(),
            supported: "qwen2, llama".into(),
        }
        .is_unrecoverable());
        assert!(!LlmError::ModelNotFound {
            path: "/models/base_model/tokenizer.json".into()
        }
        .is_unrecoverable());
        assert!(!LlmError::load("disk full").is_unrecoverable());
    }

    #[test]
    fn test_timeout_reports_subsecond_limits() {
        assert_eq!(
            LlmError::Timeout { millis: 100 }.to_string(),
            "Generation timed out after 100ms"
        );
    }

    #[test]
    fn test_unsupported_architecture_message() {
        let err = LlmError::UnsupportedArchitecture {
            model_type: "gpt_oss".into(),
            supported: "qwen2, llama".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported model architecture 'gpt_oss' (supported: qwen2, llama)"
        );
    }
}
