//! バックエンドの選択
//!
//! `DeviceType::Wgpu` は `wgpu` フィーチャー有効時のみ使用できます。
//! 無効な場合はCPU (NdArray) にフォールバックします。

use burn::backend::{Autodiff, NdArray};
use burn_ndarray::NdArrayDevice;

use crate::model::DeviceType;

pub type CpuBackend = NdArray;
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu;
#[cfg(feature = "wgpu")]
pub type GpuTrainingBackend = Autodiff<GpuBackend>;

pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

#[cfg(feature = "wgpu")]
pub fn gpu_device() -> burn_wgpu::WgpuDevice {
    burn_wgpu::WgpuDevice::default()
}

/// ビルド構成を考慮して実際に使用するデバイス種別を決定
pub fn resolve_device_type(requested: DeviceType) -> DeviceType {
    match requested {
        DeviceType::Cpu => DeviceType::Cpu,
        DeviceType::Wgpu => {
            if cfg!(feature = "wgpu") {
                DeviceType::Wgpu
            } else {
                tracing::warn!("wgpu フィーチャーが無効のため CPU (NdArray) を使用します");
                DeviceType::Cpu
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_is_kept() {
        assert_eq!(resolve_device_type(DeviceType::Cpu), DeviceType::Cpu);
    }

    #[test]
    fn test_wgpu_follows_feature() {
        let expected = if cfg!(feature = "wgpu") { DeviceType::Wgpu } else { DeviceType::Cpu };
        assert_eq!(resolve_device_type(DeviceType::Wgpu), expected);
    }
}
