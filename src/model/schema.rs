//! モデルスキーマ
//!
//! 推論パイプラインの再構築に必要な情報（入力列名・ラベル語彙・入力サイズ）。
//! 推論時の変換トポロジーがここに記録された内容と一致しない場合は `SchemaMismatch` です。

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::pipeline::{ImageFrame, LabelVocabulary, IMAGE_COLUMN, LABEL_KEY_COLUMN};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSchema {
    /// 入力画像列
    pub feature_column: String,
    /// ラベルキー列
    pub label_column: String,
    /// ラベル語彙（インデックス順）
    pub vocabulary: LabelVocabulary,
    /// モデル入力サイズ（正方形）
    pub image_size: usize,
}

impl ArtifactSchema {
    /// 既定の列名でスキーマを作成
    pub fn new(vocabulary: LabelVocabulary, image_size: usize) -> Self {
        Self {
            feature_column: IMAGE_COLUMN.to_string(),
            label_column: LABEL_KEY_COLUMN.to_string(),
            vocabulary,
            image_size,
        }
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.vocabulary.len()
    }

    /// 前処理結果の列構成がスキーマと一致するか検証
    pub fn check_frame(&self, frame: &ImageFrame) -> Result<()> {
        if frame.feature_column() != self.feature_column {
            return Err(ClassifierError::SchemaMismatch(format!(
                "input column '{}' does not match the model's feature column '{}'",
                frame.feature_column(),
                self.feature_column
            )));
        }

        if let Some(label_column) = frame.label_column() {
            if label_column != self.label_column {
                return Err(ClassifierError::SchemaMismatch(format!(
                    "label column '{}' does not match the model's label column '{}'",
                    label_column, self.label_column
                )));
            }
        }

        Ok(())
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        println!("\n=== スキーマ ===");
        println!("入力列: {}", self.feature_column);
        println!("ラベル列: {}", self.label_column);
        println!("クラス数: {}", self.num_classes());
        println!("ラベル: {}", self.vocabulary.labels().join(", "));
        println!("モデル入力サイズ: {0}x{0}", self.image_size);
        println!("================");
    }
}
