//! Device selection.

use candle_core::Device;

/// Pick the best available compute device.
///
/// With the `cuda` feature, tries GPU 0 first. No accelerator is non-fatal:
/// a warning is logged and training proceeds on CPU.
pub fn best_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => {
                tracing::warn!("CUDA device unavailable ({e}); falling back to CPU");
            }
        }
    }
    #[cfg(not(feature = "cuda"))]
    tracing::warn!("no accelerator support compiled in; training on CPU");
    Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_device_always_returns_a_device() {
        // CPU fallback must never fail
        let device = best_device();
        #[cfg(not(feature = "cuda"))]
        assert!(matches!(device, Device::Cpu));
        let _ = device;
    }
}
