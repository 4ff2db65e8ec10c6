//! バックエンド選択
//!
//! CPU (NdArray) は常に利用可能、WGPU (GPU) は `wgpu` フィーチャー有効時のみ。

use burn::backend::{Autodiff, NdArray};

use crate::error::{ClassifierError, Result};
use crate::model::DeviceType;

/// CPU推論用バックエンド
pub type CpuBackend = NdArray<f32>;
/// CPU学習用バックエンド
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

/// GPU推論用バックエンド
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu;
/// GPU学習用バックエンド
#[cfg(feature = "wgpu")]
pub type GpuTrainingBackend = Autodiff<GpuBackend>;

/// `--cpu` 指定と設定ファイルから実際に使うデバイスを決める
pub fn resolve_device_type(configured: DeviceType, force_cpu: bool) -> Result<DeviceType> {
    if force_cpu {
        return Ok(DeviceType::Cpu);
    }

    match configured {
        DeviceType::Cpu => Ok(DeviceType::Cpu),
        DeviceType::Wgpu if cfg!(feature = "wgpu") => Ok(DeviceType::Wgpu),
        DeviceType::Wgpu => Err(ClassifierError::Config(
            "device_type is Wgpu but this build has no GPU support (enable the `wgpu` feature)"
                .to_string(),
        )),
    }
}
