use crate::core::GpuId;
use nvml_wrapper::Nvml;

/// Number of NVIDIA devices NVML can see, or `None` when NVML is unavailable
/// (no driver, or a machine without NVIDIA GPUs).
pub fn detect_gpu_count() -> Option<u32> {
    match Nvml::init() {
        Ok(nvml) => match nvml.device_count() {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::debug!("NVML device count failed: {}", e);
                None
            }
        },
        Err(e) => {
            tracing::debug!("NVML unavailable ({}), skipping GPU validation", e);
            None
        }
    }
}

/// Indices in `requested` that are not below `detected`.
pub fn out_of_range(requested: &[GpuId], detected: u32) -> Vec<GpuId> {
    requested
        .iter()
        .copied()
        .filter(|&idx| idx >= detected)
        .collect()
}

/// Warn about requested devices that do not exist on this machine. Jobs are
/// still dispatched to them: the pool is whatever the operator asked for.
pub fn warn_on_unknown_gpus(requested: &[GpuId]) {
    let Some(detected) = detect_gpu_count() else {
        return;
    };

    let invalid = out_of_range(requested, detected);
    if !invalid.is_empty() {
        tracing::warn!(
            "GPU indices {:?} requested but only {} GPUs detected; jobs on them will likely fail",
            invalid,
            detected
        );
    }
}
