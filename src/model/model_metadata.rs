//! モデルメタデータの定義
//!
//! tar.gz形式のモデルファイルに `metadata.json` として保存されます。

use serde::{Deserialize, Serialize};

use crate::ml::{Architecture, EvaluationMetrics, ModelConfig};
use crate::model::config::TrainingSettings;
use crate::model::schema::ArtifactSchema;

/// モデルファイルのフォーマットバージョン
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// フォーマットバージョン
    pub format_version: u32,

    /// 推論パイプライン再構築用スキーマ（ラベル語彙を含む）
    pub schema: ArtifactSchema,

    /// バックボーン
    pub architecture: Architecture,

    /// ドロップアウト率
    pub dropout: f64,

    /// 学習エポック数
    pub num_epochs: usize,

    /// バッチサイズ（推論時のバッチサイズにも使用）
    pub batch_size: usize,

    /// 学習率
    pub learning_rate: f64,

    /// テスト割合
    pub test_fraction: f64,

    /// 分割シード
    pub seed: u64,

    /// 学習サンプル数
    pub train_samples: usize,

    /// テストサンプル数
    pub test_samples: usize,

    /// 学習直後のテストサブセットでの評価結果
    #[serde(default)]
    pub metrics: Option<EvaluationMetrics>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        schema: ArtifactSchema,
        settings: &TrainingSettings,
        train_samples: usize,
        test_samples: usize,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            schema,
            architecture: settings.architecture,
            dropout: settings.dropout,
            num_epochs: settings.epochs,
            batch_size: settings.batch_size,
            learning_rate: settings.learning_rate,
            test_fraction: settings.test_fraction,
            seed: settings.seed,
            train_samples,
            test_samples,
            metrics: None,
            trained_at,
        }
    }

    pub fn with_metrics(mut self, metrics: EvaluationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// モデル構築用の設定（推論時はドロップアウトなし）
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.schema.num_classes(), self.architecture)
            .with_dropout(0.0)
            .with_image_size(self.schema.image_size)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LabelVocabulary;

    #[test]
    fn test_json_round_trip() {
        let schema = ArtifactSchema::new(LabelVocabulary::fit(["metal", "plastic"]), 64);
        let metadata = ModelMetadata::new(schema, &TrainingSettings::default(), 8, 2);

        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();
        assert_eq!(restored, metadata);
        assert_eq!(restored.format_version, ARTIFACT_FORMAT_VERSION);
    }

    #[test]
    fn test_model_config_follows_schema() {
        let schema = ArtifactSchema::new(LabelVocabulary::fit(["a", "b", "c"]), 48);
        let mut settings = TrainingSettings::default();
        settings.architecture = Architecture::ResNetMini;
        let metadata = ModelMetadata::new(schema, &settings, 1, 1);

        let config = metadata.model_config();
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.image_size, 48);
        assert_eq!(config.architecture, Architecture::ResNetMini);
        assert_eq!(config.dropout, 0.0);
        assert_eq!(metadata.dropout, settings.dropout);
    }
}
