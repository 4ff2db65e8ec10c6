//! 単一画像の分類
//!
//! 画像を省略した場合は設定の `sample_folder` 内の最初の画像を使います。

#![recursion_limit = "256"]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use clap::Parser;

use image_classification::logging::init_logging;
use image_classification::ml::backend::{resolve_device_type, CpuBackend};
use image_classification::ml::inference::{print_prediction, InferenceEngine};
use image_classification::model::{print_metadata_info, AppConfig, DeviceType};
use image_classification::paths::{first_image_in, resolve_model_path};

#[derive(Parser, Debug)]
#[command(name = "predict")]
#[command(about = "Classify a single image with a trained model", long_about = None)]
struct Cli {
    /// 分類する画像
    image: Option<PathBuf>,

    /// モデルファイル（指定時は他の候補を探さない）
    #[arg(short, long)]
    model: Option<PathBuf>,

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
    let image_path = match cli.image {
        Some(path) => path,
        None => first_image_in(&config.paths.sample_folder)?,
    };

    match resolve_device_type(config.device_type, cli.cpu)? {
        DeviceType::Cpu => predict::<CpuBackend>(&model_path, &image_path, cli.verbose),
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => predict::<image_classification::ml::backend::GpuBackend>(
            &model_path,
            &image_path,
            cli.verbose,
        ),
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => anyhow::bail!("GPU support is not compiled in"),
    }
}

fn predict<B: Backend>(model_path: &Path, image_path: &Path, verbose: bool) -> Result<()> {
    let device = B::Device::default();
    let engine = InferenceEngine::<B>::load(model_path, &device)
        .with_context(|| format!("failed to load model {}", model_path.display()))?;
    if verbose {
        print_metadata_info(engine.metadata());
        engine.schema().print_info();
    }

    let prediction = engine
        .predict_image(image_path)
        .with_context(|| format!("failed to classify {}", image_path.display()))?;
    print_prediction(image_path, &prediction, &engine.schema().vocabulary);

    Ok(())
}
