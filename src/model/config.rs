//! アプリケーション設定管理モジュール
//!
//! パス・学習ハイパーパラメータ・計算デバイスをJSON形式で保存・読み込みします。
//!
//! 設定ファイルの探索順:
//! 1. `--config` で指定されたファイル（存在しなければエラー）
//! 2. カレントディレクトリの `image_classification.json`
//! 3. 組み込みのデフォルト値

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ClassifierError, Result};
use crate::ml::Architecture;
use crate::paths::CandidateResolver;

/// 設定ファイルの既定名
pub const CONFIG_FILE_NAME: &str = "image_classification.json";

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// パス設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    /// データセットのルート（画像とマニフェストを含む）
    pub dataset_root: PathBuf,
    /// データセットルート内のマニフェストファイル名
    pub manifest_name: String,
    /// ワークスペース（事前学習済みバックボーンの置き場）
    pub workspace: PathBuf,
    /// 学習済みモデルの出力先／読み込み元
    pub model_path: PathBuf,
    /// 予測対象画像を省略したときに最初の画像を使うフォルダ
    pub sample_folder: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("assets/inputs/images"),
            manifest_name: "tags.tsv".to_string(),
            workspace: PathBuf::from("workspace"),
            model_path: PathBuf::from("model.tar.gz"),
            sample_folder: PathBuf::from("assets/inputs/images/plastic"),
        }
    }
}

impl PathSettings {
    /// データセットのマニフェストパス
    pub fn manifest_path(&self) -> PathBuf {
        self.dataset_root.join(&self.manifest_name)
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// テストデータの割合
    pub test_fraction: f64,
    /// ランダムシード
    pub seed: u64,
    /// バックボーン
    pub architecture: Architecture,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// ドロップアウト率
    pub dropout: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 8,
            learning_rate: 0.01,
            test_fraction: 0.2,
            seed: 1,
            architecture: Architecture::ResNet18,
            image_size: 224,
            dropout: 0.2,
        }
    }
}

impl TrainingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(ClassifierError::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ClassifierError::Config("batch_size must be at least 1".to_string()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ClassifierError::Config(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.image_size < 8 {
            return Err(ClassifierError::Config(format!(
                "image_size must be at least 8, got {}",
                self.image_size
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ClassifierError::Config(format!(
                "dropout must be within [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// パス設定
    pub paths: PathSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE_NAME)
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ClassifierError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ClassifierError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// 探索順に従って設定を読み込む
    ///
    /// 明示指定されたファイルが存在しない場合はエラー、
    /// 既定パスに設定ファイルがなければデフォルト設定を返します。
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            tracing::info!("設定ファイルを読み込みました: {}", path.display());
            return Ok(config);
        }

        match CandidateResolver::new().with_candidate(Self::default_path()).resolve() {
            Ok(path) => {
                let config = Self::load(&path)?;
                tracing::info!("設定ファイルを読み込みました: {}", path.display());
                Ok(config)
            }
            Err(_) => {
                tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
                Ok(Self::default())
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ClassifierError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== 設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("\n--- パス設定 ---");
        println!("データセット: {}", self.paths.dataset_root.display());
        println!("ラベルファイル: {}", self.paths.manifest_path().display());
        println!("ワークスペース: {}", self.paths.workspace.display());
        println!("モデル出力: {}", self.paths.model_path.display());
        println!("\n--- トレーニング設定 ---");
        println!("アーキテクチャ: {}", self.training.architecture);
        println!("入力サイズ: {0}x{0}", self.training.image_size);
        println!("エポック数: {}", self.training.epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("テスト割合: {}", self.training.test_fraction);
        println!("シード: {}", self.training.seed);
        println!("============\n");
    }
}
