//! LoRA adapter merging.
//!
//! Each adapted linear layer `W` (shape `[out, in]`) gains
//! `delta = (B @ A) * scaling`, where `A` is `[r, in]`, `B` is `[out, r]` and
//! `scaling = lora_alpha / r` (or `lora_alpha / sqrt(r)` with rsLoRA).
//! The merge runs in f32 and the result is cast back to the base dtype, so
//! the merged model is a plain set of dense weights with no adapter
//! indirection left at inference time.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use candle_core::{DType, Tensor};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{LlmError, LlmResult};

/// Prefix PEFT adds to every saved adapter tensor.
const PEFT_PREFIX: &str = "base_model.model.";

/// Modules targeted by the adapter: an explicit list or a single pattern.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TargetModules {
    List(Vec<String>),
    Pattern(String),
}

impl TargetModules {
    /// Whether `layer` is one of the listed modules, matched on the full
    /// name or its trailing components. Patterns are not checked.
    pub fn covers(&self, layer: &str) -> bool {
        match self {
            TargetModules::List(names) => names.iter().any(|name| {
                layer == name
                    || layer
                        .strip_suffix(name.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }),
            TargetModules::Pattern(_) => true,
        }
    }
}

/// The subset of `adapter_config.json` needed to merge.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Adapter rank.
    pub r: usize,
    pub lora_alpha: f64,
    #[serde(default)]
    pub use_rslora: bool,
    /// Base layer stores weights as `[in, out]`.
    #[serde(default)]
    pub fan_in_fan_out: bool,
    #[serde(default)]
    pub target_modules: Option<TargetModules>,
    #[serde(default)]
    pub base_model_name_or_path: Option<String>,
    #[serde(default)]
    pub peft_type: Option<String>,
}

impl AdapterConfig {
    pub fn from_file(path: &Path) -> LlmResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LlmError::ModelNotFound {
            path: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> LlmResult<Self> {
        let config: AdapterConfig = serde_json::from_str(json)
            .map_err(|e| LlmError::merge(format!("Failed to parse adapter config: {}", e)))?;

        if let Some(peft_type) = config.peft_type.as_deref() {
            if !peft_type.eq_ignore_ascii_case("lora") {
                return Err(LlmError::merge(format!(
                    "Unsupported adapter type '{}'",
                    peft_type
                )));
            }
        }
        if config.r == 0 {
            return Err(LlmError::merge("Adapter rank must be greater than 0"));
        }
        Ok(config)
    }

    /// Multiplier applied to `B @ A`.
    pub fn scaling(&self) -> f64 {
        if self.use_rslora {
            self.lora_alpha / (self.r as f64).sqrt()
        } else {
            self.lora_alpha / self.r as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoraFactor {
    A,
    B,
}

/// Split an adapter tensor name into the base layer prefix and factor.
///
/// Accepts `base_model.model.<layer>.lora_A.weight` and the
/// `<layer>.lora_A.<adapter_name>.weight` form.
fn split_lora_key(key: &str) -> Option<(String, LoraFactor)> {
    let key = key.strip_prefix(PEFT_PREFIX).unwrap_or(key);
    for (marker, factor) in [(".lora_A.", LoraFactor::A), (".lora_B.", LoraFactor::B)] {
        if let Some(idx) = key.find(marker) {
            if key.ends_with(".weight") {
                return Some((key[..idx].to_string(), factor));
            }
        }
    }
    None
}

/// Fold `adapter` into `base` in place. Returns the number of merged layers.
///
/// Fails when a layer is missing either factor or lies outside the
/// configured `target_modules`, when the base has no weight for an adapted
/// layer, when shapes disagree, or when nothing was merged.
pub fn merge_adapter(
    base: &mut HashMap<String, Tensor>,
    adapter: HashMap<String, Tensor>,
    config: &AdapterConfig,
) -> LlmResult<usize> {
    let scaling = config.scaling();
    let mut pairs: BTreeMap<String, (Option<Tensor>, Option<Tensor>)> = BTreeMap::new();

    for (key, tensor) in adapter {
        if key.contains("lora_embedding_") {
            return Err(LlmError::merge(format!(
                "Embedding adapters are not supported ({})",
                key
            )));
        }
        match split_lora_key(&key) {
            Some((layer, LoraFactor::A)) => pairs.entry(layer).or_default().0 = Some(tensor),
            Some((layer, LoraFactor::B)) => pairs.entry(layer).or_default().1 = Some(tensor),
            None => warn!(tensor = %key, "Ignoring non-LoRA adapter tensor"),
        }
    }

    let mut merged = 0;
    for (layer, factors) in pairs {
        let (Some(lora_a), Some(lora_b)) = factors else {
            return Err(LlmError::merge(format!(
                "Layer '{}' is missing a LoRA factor",
                layer
            )));
        };
        if let Some(targets) = &config.target_modules {
            if !targets.covers(&layer) {
                return Err(LlmError::merge(format!(
                    "Layer '{}' is not in the adapter's target modules",
                    layer
                )));
            }
        }
        let target = format!("{}.weight", layer);
        let weight = base.get(&target).ok_or_else(|| {
            LlmError::merge(format!("Base model has no weight '{}'", target))
        })?;

        let merged_weight = merge_layer(weight, &lora_a, &lora_b, scaling, config.fan_in_fan_out)
            .map_err(|e| LlmError::merge(format!("{}: {}", target, e)))?;
        debug!(layer = %target, "Merged LoRA layer");
        base.insert(target, merged_weight);
        merged += 1;
    }

    if merged == 0 {
        return Err(LlmError::merge("Adapter contains no LoRA layers"));
    }

    info!(
        layers = merged,
        rank = config.r,
        scaling,
        base_model = config.base_model_name_or_path.as_deref().unwrap_or("unknown"),
        "LoRA adapter merged into base weights"
    );
    Ok(merged)
}

fn merge_layer(
    weight: &Tensor,
    lora_a: &Tensor,
    lora_b: &Tensor,
    scaling: f64,
    fan_in_fan_out: bool,
) -> LlmResult<Tensor> {
    let candle = |e: candle_core::Error| LlmError::merge(e.to_string());

    let a = lora_a.to_dtype(DType::F32).map_err(candle)?;
    let b = lora_b.to_dtype(DType::F32).map_err(candle)?;
    let mut delta = b.matmul(&a).map_err(candle)?;
    if fan_in_fan_out {
        delta = delta.t().map_err(candle)?;
    }

    if delta.dims() != weight.dims() {
        return Err(LlmError::merge(format!(
            "shape mismatch: base {:?}, adapter delta {:?}",
            weight.dims(),
            delta.dims()
        )));
    }

    let delta = delta.affine(scaling, 0.0).map_err(candle)?;
    weight
        .to_dtype(DType::F32)
        .and_then(|w| w + delta)
        .and_then(|w| w.to_dtype(weight.dtype()))
        .map_err(candle)
}
