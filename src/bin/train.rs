//! 分類器の学習
//!
//! マニフェストを読み込み、学習/テストに分割して学習し、
//! テストサブセットで評価した結果と共にモデルファイルを保存します。

#![recursion_limit = "256"]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use image_classification::logging::init_logging;
use image_classification::ml::backend::{resolve_device_type, CpuTrainingBackend};
use image_classification::ml::training::{print_epoch_progress, train_model, TrainingRequest};
use image_classification::model::{print_metadata_info, AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(about = "Train an image classifier from a labeled manifest", long_about = None)]
struct Cli {
    /// データセットのルート（画像とマニフェストを含む）
    dataset_root: Option<PathBuf>,

    /// 設定ファイル
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// モデルの出力先
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    #[arg(short, long)]
    learning_rate: Option<f64>,

    /// テストデータの割合 (0, 1)
    #[arg(long)]
    test_fraction: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// 設定に関わらずCPUで学習する
    #[arg(long, default_value = "false")]
    cpu: bool,

    /// 詳細ログ
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
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;

    if let Some(root) = cli.dataset_root {
        config.paths.dataset_root = root;
    }
    if let Some(output) = cli.output {
        config.paths.model_path = output;
    }
    if let Some(epochs) = cli.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(learning_rate) = cli.learning_rate {
        config.training.learning_rate = learning_rate;
    }
    if let Some(test_fraction) = cli.test_fraction {
        config.training.test_fraction = test_fraction;
    }
    if let Some(seed) = cli.seed {
        config.training.seed = seed;
    }

    config.display();

    let request = TrainingRequest::from_config(&config);
    let report = match resolve_device_type(config.device_type, cli.cpu)? {
        DeviceType::Cpu => {
            train_model::<CpuTrainingBackend>(&request, &Default::default(), print_epoch_progress)
        }
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => train_model::<image_classification::ml::backend::GpuTrainingBackend>(
            &request,
            &Default::default(),
            print_epoch_progress,
        ),
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => anyhow::bail!("GPU support is not compiled in"),
    }
    .context("training failed")?;

    report
        .metrics
        .print_metrics(report.metadata.schema.vocabulary.labels());
    print_metadata_info(&report.metadata);
    println!("モデルを保存しました: {}", report.model_path.display());

    Ok(())
}
