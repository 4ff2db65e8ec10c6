//! モデル推論機能

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::ml::{load_and_normalize_image_bytes, ImageClassifier};
use crate::model::{load_model_with_metadata, ArtifactSchema, ModelMetadata};
use crate::pipeline::{ImageFrame, ImageLoader, LabelVocabulary, PipelineBuilder, PreprocessingPipeline};

/// 1枚分の推論結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// 予測ラベル
    pub predicted_label: String,
    /// 予測クラスインデックス
    pub predicted_index: usize,
    /// ラベルごとのスコア（softmax、語彙順）
    pub score_distribution: Vec<f32>,
}

impl PredictionResult {
    /// スコア分布から最大スコアのラベルを選ぶ
    pub fn from_scores(score_distribution: Vec<f32>, vocabulary: &LabelVocabulary) -> Result<Self> {
        if score_distribution.len() != vocabulary.len() {
            return Err(ClassifierError::SchemaMismatch(format!(
                "model produced {} scores for {} labels",
                score_distribution.len(),
                vocabulary.len()
            )));
        }

        let predicted_index = argmax(&score_distribution);
        let predicted_label = vocabulary.decode(predicted_index)?.to_string();

        Ok(Self {
            predicted_label,
            predicted_index,
            score_distribution,
        })
    }

    /// 予測ラベルの信頼度（スコアの最大値）
    pub fn confidence(&self) -> f32 {
        self.score_distribution
            .iter()
            .copied()
            .fold(0.0f32, f32::max)
    }
}

/// 最大値のインデックス（同値なら先頭）
pub(crate) fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = i;
        }
    }
    best
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: ImageClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: &B::Device) -> Result<Self> {
        let model_path = model_path.as_ref();

        // メタデータとモデルバイナリ読み込み
        let (metadata, model_binary) = load_model_with_metadata(model_path)?;

        // モデル初期化
        let model = metadata.model_config().init::<B>(device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, device)
            .map_err(|e| ClassifierError::corrupt(model_path, format!("failed to restore weights: {:?}", e)))?;

        // メタデータと重みの構造が食い違う場合は読み込み時にパニックするため捕捉する
        let expected_params = model.num_params();
        let model = panic::catch_unwind(AssertUnwindSafe(|| model.load_record(record)))
            .map_err(|_| ClassifierError::corrupt(model_path, "weights do not match the architecture in metadata"))?;
        if model.num_params() != expected_params {
            return Err(ClassifierError::corrupt(
                model_path,
                format!(
                    "weights have {} parameters, metadata describes {}",
                    model.num_params(),
                    expected_params
                ),
            ));
        }
        tracing::debug!("モデルを読み込みました: {}", model_path.display());

        Ok(Self::from_parts(model, metadata, device.clone()))
    }

    /// 学習済みモデルから直接構築
    pub fn from_parts(model: ImageClassifier<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Self {
            model,
            metadata,
            device,
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn schema(&self) -> &ArtifactSchema {
        &self.metadata.schema
    }

    /// 画像読み込みのみの入力パイプライン
    pub fn input_pipeline(&self, image_folder: &Path) -> PreprocessingPipeline {
        PipelineBuilder::new(image_folder)
            .with_feature_column(self.schema().feature_column.as_str())
            .build()
    }

    /// 保存済み語彙をそのまま使うラベル付きパイプライン
    pub fn labeled_pipeline(&self, image_folder: &Path) -> PreprocessingPipeline {
        PipelineBuilder::new(image_folder)
            .with_feature_column(self.schema().feature_column.as_str())
            .map_value_to_key(self.schema().label_column.as_str())
            .with_vocabulary(self.schema().vocabulary.clone())
    }

    /// 前処理済みの全行をバッチ推論し、行ごとのスコア分布を返す
    pub fn score_frame(&self, frame: &ImageFrame) -> Result<Vec<Vec<f32>>> {
        self.schema().check_frame(frame)?;

        let image_size = self.schema().image_size;
        let num_classes = self.schema().num_classes();
        let batch_size = self.metadata.batch_size.max(1);
        let mut scores = Vec::with_capacity(frame.len());

        for chunk in frame.rows().chunks(batch_size) {
            let mut data = Vec::with_capacity(chunk.len() * 3 * image_size * image_size);
            for row in chunk {
                data.extend(load_and_normalize_image_bytes(&row.bytes, image_size, &row.source)?);
            }

            // Tensorに変換 [N, 3, S, S]
            let images = Tensor::<B, 1>::from_floats(data.as_slice(), &self.device)
                .reshape([chunk.len(), 3, image_size, image_size]);

            let probabilities = self
                .model
                .forward_softmax(images)
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| ClassifierError::SchemaMismatch(format!("unexpected score tensor: {:?}", e)))?;

            scores.extend(probabilities.chunks(num_classes).map(<[f32]>::to_vec));
        }

        Ok(scores)
    }

    /// 前処理済みの全行を分類
    pub fn predict_frame(&self, frame: &ImageFrame) -> Result<Vec<PredictionResult>> {
        self.score_frame(frame)?
            .into_iter()
            .map(|scores| PredictionResult::from_scores(scores, &self.schema().vocabulary))
            .collect()
    }

    /// 単一画像を分類
    ///
    /// 画像のファイル名だけを持つ1行の疑似マニフェストを作り、
    /// 画像が置かれたディレクトリを基準に読み込みます。
    pub fn predict_image<P: AsRef<Path>>(&self, image_path: P) -> Result<PredictionResult> {
        let image_path = image_path.as_ref();
        let file_name = image_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ClassifierError::ImageNotFound(image_path.to_path_buf()))?;

        let loader = ImageLoader::for_image(image_path);
        let frame = self
            .input_pipeline(loader.image_folder())
            .transform_images(&[file_name])?;

        self.predict_frame(&frame)?
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::ImageNotFound(image_path.to_path_buf()))
    }
}

/// 推論結果を表示
pub fn print_prediction(image_path: &Path, prediction: &PredictionResult, vocabulary: &LabelVocabulary) {
    println!("\n=== 推論結果 ===");
    println!("画像: {}", image_path.display());
    println!("予測ラベル: {}", prediction.predicted_label);
    println!("信頼度: {:.4}", prediction.confidence());
    for (label, score) in vocabulary.labels().iter().zip(&prediction.score_distribution) {
        println!("  {}: {:.4}", label, score);
    }
    println!("================");
}
