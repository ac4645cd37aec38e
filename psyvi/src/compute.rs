use clap::ValueEnum;
use log::info;
use psyvi_util::candle_core::{self, DType, Device};

/// Compute device selection
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    /// Create a candle `Device` from this enum.
    pub fn to_device(&self, device_no: usize) -> candle_core::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

///
/// Where and in what precision a model allocates its tensors.
///
/// Chosen once before a model is built and carried by it for the
/// lifetime of the fit.
///
#[derive(Clone, Debug)]
pub struct ComputeContext {
    pub device: Device,
    pub dtype: DType,
}

impl Default for ComputeContext {
    fn default() -> Self {
        Self::cpu()
    }
}

impl ComputeContext {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
        }
    }

    pub fn new(kind: ComputeDevice, device_no: usize) -> candle_core::Result<Self> {
        Ok(Self {
            device: kind.to_device(device_no)?,
            dtype: DType::F32,
        })
    }

    /// First CUDA device, else the first Metal device, else CPU
    pub fn accelerated_if_available() -> Self {
        let device = if candle_core::utils::cuda_is_available() {
            Device::new_cuda(0).ok()
        } else if candle_core::utils::metal_is_available() {
            Device::new_metal(0).ok()
        } else {
            None
        };

        match device {
            Some(device) => {
                info!("using accelerator {:?}", device);
                Self {
                    device,
                    dtype: DType::F32,
                }
            }
            None => Self::cpu(),
        }
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_context_is_default() {
        let ctx = ComputeContext::default();
        assert!(ctx.device.is_cpu());
        assert_eq!(ctx.dtype, DType::F32);
        assert!(ComputeContext::new(ComputeDevice::Cpu, 0).is_ok());
    }
}
