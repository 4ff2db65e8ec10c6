//! クラスフォルダ構成からマニフェスト (tags.tsv) を生成
//!
//! `<ROOT>/<ラベル>/<画像>` を走査して `<ラベル>/<画像>\t<ラベル>` を書き出します。

#![recursion_limit = "256"]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use image_classification::dataset::{scan_class_folders, write_manifest};
use image_classification::logging::init_logging;
use image_classification::model::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "generate_tags")]
#[command(about = "Write a tab-separated manifest from class sub-folders", long_about = None)]
struct Cli {
    /// クラスフォルダを含むルート
    root: Option<PathBuf>,

    /// 出力先（省略時は `<ROOT>/tags.tsv`）
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 設定ファイル
    #[arg(short, long)]
    config: Option<PathBuf>,

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

    let root = cli.root.unwrap_or_else(|| config.paths.dataset_root.clone());
    let output = cli
        .output
        .unwrap_or_else(|| root.join(&config.paths.manifest_name));

    let samples = scan_class_folders(&root)
        .with_context(|| format!("failed to scan {}", root.display()))?;
    write_manifest(&output, &samples)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("{} 件のラベルを書き出しました: {}", samples.len(), output.display());
    Ok(())
}
