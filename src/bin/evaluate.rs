//! 保存済みモデルの評価
//!
//! マニフェスト内の画像パスはマニフェストのあるディレクトリを基準に解決します。

#![recursion_limit = "256"]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use clap::Parser;

use image_classification::logging::init_logging;
use image_classification::ml::backend::{resolve_device_type, CpuBackend};
use image_classification::ml::evaluation::evaluate_model;
use image_classification::ml::inference::InferenceEngine;
use image_classification::model::{print_metadata_info, AppConfig, DeviceType};
use image_classification::paths::resolve_model_path;

#[derive(Parser, Debug)]
#[command(name = "evaluate")]
#[command(about = "Evaluate a trained model against a labeled manifest", long_about = None)]
struct Cli {
    /// モデルファイル（指定時は他の候補を探さない）
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// 評価用マニフェスト（省略時はデータセットのマニフェスト）
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// 設定ファイル
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "false")]
    cpu: bool,

    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_or_default(cli.config.as_deref())?;

    let model_path = resolve_model_path(cli.model.as_deref(), &config)?;
    let manifest_path = cli.manifest.unwrap_or_else(|| config.paths.manifest_path());

    match resolve_device_type(config.device_type, cli.cpu)? {
        DeviceType::Cpu => evaluate::<CpuBackend>(&model_path, &manifest_path),
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            evaluate::<image_classification::ml::backend::GpuBackend>(&model_path, &manifest_path)
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => anyhow::bail!("GPU support is not compiled in"),
    }
}

fn evaluate<B: Backend>(model_path: &Path, manifest_path: &Path) -> Result<()> {
    let device = B::Device::default();
    let engine = InferenceEngine::<B>::load(model_path, &device)
        .with_context(|| format!("failed to load model {}", model_path.display()))?;
    print_metadata_info(engine.metadata());

    let image_root = manifest_path.parent().unwrap_or_else(|| Path::new(""));
    let metrics = evaluate_model(&engine, manifest_path, image_root)
        .with_context(|| format!("failed to evaluate {}", manifest_path.display()))?;

    metrics.print_metrics(engine.schema().vocabulary.labels());
    Ok(())
}
