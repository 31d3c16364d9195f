//! Model resolution: locate weights, merge the adapter, build a handle.
//!
//! Each of the base model and the adapter is read from its volume cache
//! directory when that directory exists, and fetched from the remote
//! registry otherwise. The two decisions are independent.

mod files;
mod hub;
mod merge;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use medreason_core::ModelConfig;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::error::{LlmError, LlmResult};
use crate::llm::{
    check_architecture, dtype_for, reclaim_device_memory, resolve_stop_tokens, select_device,
    CausalLm, ChatTemplate, ModelHandle, TokenizerConfig,
};
use crate::service::ModelLoader;

pub use files::{
    shard_names, AdapterFiles, ModelFiles, ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE,
    CHAT_TEMPLATE_FILE, CONFIG_FILE, GENERATION_CONFIG_FILE, SINGLE_WEIGHTS_FILE,
    TOKENIZER_CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_INDEX_FILE,
};
pub use hub::{HubClient, HF_TOKEN_ENV};
pub use merge::{merge_adapter, AdapterConfig, TargetModules};

/// Where a set of weights is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// Local snapshot directory.
    VolumeCache(PathBuf),
    /// Registry identifier, fetched through the download cache.
    Remote(String),
}

impl WeightSource {
    /// `local_dir` when it exists, `remote_id` otherwise.
    pub fn resolve(local_dir: &Path, remote_id: &str) -> Self {
        if local_dir.exists() {
            WeightSource::VolumeCache(local_dir.to_path_buf())
        } else {
            WeightSource::Remote(remote_id.to_string())
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, WeightSource::VolumeCache(_))
    }
}

impl fmt::Display for WeightSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightSource::VolumeCache(dir) => write!(f, "volume cache {}", dir.display()),
            WeightSource::Remote(id) => write!(f, "registry {}", id),
        }
    }
}

/// Loads the configured base model and adapter into a [`ModelHandle`].
#[derive(Debug, Clone)]
pub struct ModelResolver {
    config: ModelConfig,
}

impl ModelResolver {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn base_source(&self) -> WeightSource {
        WeightSource::resolve(&self.config.base_model_dir(), &self.config.base_model_id)
    }

    pub fn adapter_source(&self) -> WeightSource {
        WeightSource::resolve(&self.config.adapter_dir(), &self.config.adapter_id)
    }

    fn hub(&self) -> LlmResult<HubClient> {
        HubClient::new(&self.config.hf_cache_dir(), self.config.hf_token.clone())
    }

    /// Resolve, merge and build the model.
    pub async fn resolve(&self) -> LlmResult<ModelHandle> {
        let device = select_device(self.config.use_cuda, self.config.cuda_ordinal);
        reclaim_device_memory(&device);
        let dtype = dtype_for(self.config.precision);

        let base_source = self.base_source();
        let adapter_source = self.adapter_source();
        info!(
            base = %base_source,
            adapter = %adapter_source,
            precision = ?self.config.precision,
            "Resolving model"
        );

        let base_files = match &base_source {
            WeightSource::VolumeCache(dir) => {
                info!("Loading base model from volume cache");
                let files = ModelFiles::from_dir(dir)?;
                let architecture = check_architecture(&read_text(&files.config)?)?;
                info!(architecture, "Base model architecture supported");
                files
            }
            WeightSource::Remote(id) => {
                info!("Base model not cached, downloading (first run)");
                self.hub()?.fetch_model(id).await?
            }
        };
        let adapter_files = match &adapter_source {
            WeightSource::VolumeCache(dir) => AdapterFiles::from_dir(dir)?,
            WeightSource::Remote(id) => self.hub()?.fetch_adapter(id).await?,
        };

        let warmup = self.config.warmup;
        tokio::task::spawn_blocking(move || {
            build_handle(&base_files, &adapter_files, dtype, device, warmup)
        })
        .await
        .map_err(|e| LlmError::load(format!("Model loading task failed: {}", e)))?
    }

    /// Write full snapshots of the base model and adapter into their volume
    /// cache directories.
    pub async fn download(&self) -> LlmResult<()> {
        let hub = self.hub()?;
        let base = hub
            .snapshot(&self.config.base_model_id, &self.config.base_model_dir())
            .await?;
        let adapter = hub
            .snapshot(&self.config.adapter_id, &self.config.adapter_dir())
            .await?;
        info!(
            base_files = base,
            adapter_files = adapter,
            cache_root = %self.config.cache_root.display(),
            "Models downloaded to volume cache"
        );
        Ok(())
    }
}

#[async_trait]
impl ModelLoader for ModelResolver {
    async fn load(&self) -> LlmResult<ModelHandle> {
        self.resolve().await
    }
}

/// Load weights, merge the adapter and assemble the handle. Blocking.
pub fn build_handle(
    base: &ModelFiles,
    adapter: &AdapterFiles,
    dtype: DType,
    device: Device,
    warmup: bool,
) -> LlmResult<ModelHandle> {
    let tokenizer = Tokenizer::from_file(&base.tokenizer)
        .map_err(|e| LlmError::load(format!("Failed to load tokenizer: {}", e)))?;
    info!("Loaded tokenizer");

    let config_json = read_text(&base.config)?;

    info!(file_count = base.weights.len(), "Loading model weights from safetensors");
    let mut tensors = load_safetensors(&base.weights, Some(dtype), &device)?;

    let adapter_config = AdapterConfig::from_file(&adapter.config)?;
    let adapter_tensors = load_safetensors(std::slice::from_ref(&adapter.weights), None, &device)?;
    merge_adapter(&mut tensors, adapter_tensors, &adapter_config)?;

    let vb = VarBuilder::from_tensors(tensors, dtype, &device);
    let model = CausalLm::from_config_json(&config_json, vb)?;

    let tokenizer_config = match &base.tokenizer_config {
        Some(path) => Some(TokenizerConfig::from_file(path)?),
        None => None,
    };
    let generation_config = match &base.generation_config {
        Some(path) => Some(read_text(path)?),
        None => None,
    };

    let template = ChatTemplate::resolve(tokenizer_config.as_ref(), base.chat_template.as_deref())?;
    let stop_tokens = resolve_stop_tokens(
        &tokenizer,
        tokenizer_config.as_ref(),
        generation_config.as_deref(),
    );

    let handle = ModelHandle::new(model, tokenizer, template, stop_tokens, device.clone());

    if warmup {
        match handle.warm_up() {
            Ok(()) => info!("Warm-up pass complete"),
            Err(e) => warn!(error = %e, "Warm-up pass failed, continuing without it"),
        }
    }

    info!(
        architecture = handle.architecture(),
        device = ?device,
        stop_tokens = ?handle.stop_tokens(),
        "Model loaded and merged"
    );
    Ok(handle)
}

fn read_text(path: &Path) -> LlmResult<String> {
    std::fs::read_to_string(path).map_err(|e| LlmError::ModelNotFound {
        path: format!("{}: {}", path.display(), e),
    })
}

/// Read safetensors files into one map. Floating-point tensors are cast to
/// `dtype` when given.
fn load_safetensors(
    paths: &[PathBuf],
    dtype: Option<DType>,
    device: &Device,
) -> LlmResult<HashMap<String, Tensor>> {
    let mut all = HashMap::new();
    for path in paths {
        let tensors = candle_core::safetensors::load(path, device).map_err(|e| {
            LlmError::load(format!("Failed to load safetensors {}: {}", path.display(), e))
        })?;
        for (name, tensor) in tensors {
            let tensor = match dtype {
                Some(dtype) if tensor.dtype().is_float() && tensor.dtype() != dtype => {
                    tensor.to_dtype(dtype).map_err(|e| {
                        LlmError::load(format!("Failed to convert {}: {}", name, e))
                    })?
                }
                _ => tensor,
            };
            all.insert(name, tensor);
        }
    }
    Ok(all)
}
