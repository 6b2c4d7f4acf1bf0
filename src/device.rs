//! # Device Selection — CUDA → Metal → CPU Probe
//!
//! Grounded in the pack's `llmspell-providers` Candle provider, which probes
//! backends in the same order under its `"auto"` device string. The teacher
//! forces `Device::Cpu` unconditionally (a stated Candle/Metal layer-norm gap
//! at the time it was written); this crate needs a real probe because
//! spec.md requires GPU-preferred embedding and GPU-required generation.

use candle_core::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Cuda,
    Metal,
    Cpu,
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Backend::Cuda => "CUDA",
            Backend::Metal => "Metal",
            Backend::Cpu => "CPU",
        }
    }
}

/// Best-effort GPU-preferred device probe. Always succeeds (CPU is the
/// terminal fallback).
pub fn probe() -> (Device, Backend) {
    if let Ok(dev) = Device::cuda_if_available(0) {
        if dev.is_cuda() {
            tracing::info!("device probe: using CUDA");
            return (dev, Backend::Cuda);
        }
    }
    if let Ok(dev) = Device::new_metal(0) {
        tracing::info!("device probe: using Metal");
        return (dev, Backend::Metal);
    }
    tracing::info!("device probe: no GPU backend available, falling back to CPU");
    (Device::Cpu, Backend::Cpu)
}

/// Generator requires a GPU backend; unlike `probe`, this does not fall back
/// to CPU — the caller surfaces `GeneratorUnavailable` when `None` comes back.
pub fn probe_gpu_required() -> Option<(Device, Backend)> {
    if let Ok(dev) = Device::cuda_if_available(0) {
        if dev.is_cuda() {
            return Some((dev, Backend::Cuda));
        }
    }
    if let Ok(dev) = Device::new_metal(0) {
        return Some((dev, Backend::Metal));
    }
    None
}
