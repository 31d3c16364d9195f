//! Default values shared by configuration and the model resolver.

/// Base model identifier on the remote registry.
pub const DEFAULT_BASE_MODEL_ID: &str = "openai/gpt-oss-20b";

/// LoRA adapter identifier on the remote registry.
pub const DEFAULT_ADAPTER_ID: &str = "dousery/medical-reasoning-gpt-oss-20b";

/// Root of the persistent weight cache.
pub const DEFAULT_CACHE_ROOT: &str = "/models";

/// Subdirectory of the cache root holding the base model snapshot.
pub const BASE_MODEL_SUBDIR: &str = "base_model";

/// Subdirectory of the cache root holding the adapter snapshot.
pub const ADAPTER_SUBDIR: &str = "adapter";

/// Subdirectory of the cache root used by the registry client.
pub const HF_CACHE_SUBDIR: &str = "hf_cache";

/// Fixed system instruction for every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a medical reasoning assistant";

/// Upper bound on newly generated tokens per request.
pub const DEFAULT_MAX_NEW_TOKENS: usize = 2048;

/// Wall-clock ceiling for a single generation, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Maximum accepted request body, in bytes (1MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1_048_576;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
