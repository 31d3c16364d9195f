//! Sub-configuration structures.
//!
//! Each struct maps to one TOML table of the main [`Config`](super::Config).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::constants::*;

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind address (default: "0.0.0.0")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number (default: 8000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Wall-clock ceiling for one generation call, in seconds (default: 600)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes (default: 1MB)
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_payload_size() -> usize {
    DEFAULT_MAX_PAYLOAD_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl ServerConfig {
    /// `bind_address:port` as a single string.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Floating-point precision used when loading weights.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit float.
    F32,
    /// IEEE half precision.
    F16,
    /// Brain float, half the footprint of f32.
    #[default]
    Bf16,
}

/// Model source and device configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Base model identifier on the remote registry.
    #[serde(default = "default_base_model_id")]
    pub base_model_id: String,

    /// LoRA adapter identifier on the remote registry.
    #[serde(default = "default_adapter_id")]
    pub adapter_id: String,

    /// Persistent cache root holding `base_model/`, `adapter/` and `hf_cache/`.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Weight precision (default: bf16).
    #[serde(default)]
    pub precision: Precision,

    /// Use CUDA when available.
    #[serde(default = "default_true")]
    pub use_cuda: bool,

    /// CUDA device ordinal.
    #[serde(default)]
    pub cuda_ordinal: usize,

    /// Run a warm-up forward pass after loading.
    #[serde(default = "default_true")]
    pub warmup: bool,

    /// Resolve the model at startup instead of on the first request.
    #[serde(default)]
    pub preload: bool,

    /// Registry access token. Falls back to `HF_TOKEN` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hf_token: Option<String>,
}

fn default_base_model_id() -> String {
    DEFAULT_BASE_MODEL_ID.to_string()
}

fn default_adapter_id() -> String {
    DEFAULT_ADAPTER_ID.to_string()
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_ROOT)
}

fn default_true() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_model_id: default_base_model_id(),
            adapter_id: default_adapter_id(),
            cache_root: default_cache_root(),
            precision: Precision::default(),
            use_cuda: true,
            cuda_ordinal: 0,
            warmup: true,
            preload: false,
            hf_token: None,
        }
    }
}

impl ModelConfig {
    /// Local snapshot directory of the base model.
    pub fn base_model_dir(&self) -> PathBuf {
        self.cache_root.join(BASE_MODEL_SUBDIR)
    }

    /// Local snapshot directory of the adapter.
    pub fn adapter_dir(&self) -> PathBuf {
        self.cache_root.join(ADAPTER_SUBDIR)
    }

    /// Download cache used by the registry client.
    pub fn hf_cache_dir(&self) -> PathBuf {
        self.cache_root.join(HF_CACHE_SUBDIR)
    }
}

/// Text generation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// System instruction prepended to every conversation.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Maximum newly generated tokens (default: 2048).
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_new_tokens() -> usize {
    DEFAULT_MAX_NEW_TOKENS
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_new_tokens: default_max_new_tokens(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Include module targets in log lines.
    #[serde(default)]
    pub include_target: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            include_target: false,
        }
    }
}
