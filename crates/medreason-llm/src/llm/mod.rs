//! Local decoder inference via Candle.
//!
//! Weights are loaded eagerly into memory (they have to be, for the LoRA
//! merge), handed to one of the supported decoder architectures through a
//! `VarBuilder`, and decoded greedily.

mod handle;
mod model;
mod prompt;

use candle_core::{DType, Device};
use medreason_core::Precision;
use tracing::{debug, info, warn};

pub use handle::{resolve_stop_tokens, DecodingPolicy, Generation, ModelHandle};
pub use model::{check_architecture, greedy_token, CausalLm, SUPPORTED_ARCHITECTURES};
pub use prompt::{ChatTemplate, TemplateOrigin, TokenizerConfig, HARMONY_TEMPLATE};

/// Candle dtype for a configured precision.
pub fn dtype_for(precision: Precision) -> DType {
    match precision {
        Precision::F32 => DType::F32,
        Precision::F16 => DType::F16,
        Precision::Bf16 => DType::BF16,
    }
}

/// CUDA device `ordinal` when requested and available, CPU otherwise.
pub fn select_device(use_cuda: bool, ordinal: usize) -> Device {
    if !use_cuda {
        return Device::Cpu;
    }
    match Device::cuda_if_available(ordinal) {
        Ok(dev) => {
            if dev.is_cuda() {
                info!(ordinal, "CUDA device detected, using GPU acceleration");
                dev
            } else {
                warn!("CUDA requested but not available, using CPU");
                Device::Cpu
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to initialize CUDA, using CPU");
            Device::Cpu
        }
    }
}

/// Wait for outstanding device work so freed buffers are returned before a
/// large allocation.
pub fn reclaim_device_memory(device: &Device) {
    match device.synchronize() {
        Ok(()) => debug!(device = ?device, "Device synchronized before load"),
        Err(e) => warn!(error = %e, "Device synchronize failed"),
    }
}
