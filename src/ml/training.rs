//! モデル学習
//!
//! マニフェスト読み込み → 分割 → 前処理 → 学習 → 評価 → 保存 を1回の呼び出しで行います。

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, DefaultFileRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dataset::{load_manifest, train_test_split};
use crate::error::{ClassifierError, Result};
use crate::ml::evaluation::EvaluationMetrics;
use crate::ml::inference::InferenceEngine;
use crate::ml::{load_and_normalize_image_bytes, Architecture, ImageClassifier, ModelConfig};
use crate::model::{save_model_with_metadata, AppConfig, ArtifactSchema, ModelMetadata, TrainingSettings};
use crate::pipeline::{ImageFrame, PipelineBuilder, LABEL_KEY_COLUMN};

/// デコード済みの学習サンプル
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// 正規化済みピクセル (C, H, W)
    pub pixels: Vec<f32>,
    pub label: usize,
}

/// 学習データセット（デコード済み画像をメモリに保持）
pub struct ImageDataset {
    items: Vec<ImageItem>,
}

impl ImageDataset {
    /// 前処理結果から作成。ラベルキーのない行は `SchemaMismatch`
    pub fn from_frame(frame: &ImageFrame, image_size: usize) -> Result<Self> {
        let mut items = Vec::with_capacity(frame.len());
        for row in frame.rows() {
            let label = row.label_key.ok_or_else(|| {
                ClassifierError::SchemaMismatch(format!(
                    "training row {} has no label key",
                    row.source.display()
                ))
            })?;
            let pixels = load_and_normalize_image_bytes(&row.bytes, image_size, &row.source)?;
            items.push(ImageItem { pixels, label });
        }
        Ok(Self { items })
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// バッチャー
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, _device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let image_size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * image_size * image_size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, image_size, image_size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// エポックごとの進捗
#[derive(Debug, Clone, PartialEq)]
pub struct EpochProgress {
    /// 1始まりのエポック番号
    pub epoch: usize,
    pub total_epochs: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub validation_accuracy: f64,
}

/// 学習の入力
#[derive(Debug, Clone)]
pub struct TrainingRequest {
    /// 画像パスの基準ディレクトリ
    pub dataset_root: PathBuf,
    pub manifest_path: PathBuf,
    pub output_model_path: PathBuf,
    /// 事前学習済みバックボーンの置き場
    pub workspace: PathBuf,
    pub settings: TrainingSettings,
}

impl TrainingRequest {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dataset_root: config.paths.dataset_root.clone(),
            manifest_path: config.paths.manifest_path(),
            output_model_path: config.paths.model_path.clone(),
            workspace: config.paths.workspace.clone(),
            settings: config.training.clone(),
        }
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_path: PathBuf,
    /// 保存したメタデータ（テストサブセットでの評価結果を含む）
    pub metadata: ModelMetadata,
    pub metrics: EvaluationMetrics,
    pub history: Vec<EpochProgress>,
}

/// モデル学習を実行
///
/// `progress` は各エポック終了後に呼び出し元のスレッドで呼ばれます。
/// 学習中の失敗は `TrainingFailure` となり、モデルファイルは書き込まれません。
pub fn train_model<B: AutodiffBackend>(
    request: &TrainingRequest,
    device: &B::Device,
    mut progress: impl FnMut(&EpochProgress),
) -> Result<TrainingReport> {
    let settings = &request.settings;
    settings.validate()?;

    // 1. マニフェスト読み込み
    if !request.dataset_root.is_dir() {
        return Err(ClassifierError::DatasetRootNotFound(request.dataset_root.clone()));
    }
    let samples = load_manifest(&request.manifest_path)?;
    tracing::info!(
        "マニフェストを読み込みました: {} ({} 件)",
        request.manifest_path.display(),
        samples.len()
    );

    // 2. 学習/テストに分割
    let split = train_test_split(&samples, settings.test_fraction, settings.seed)?;
    tracing::info!("学習データ: {} 枚", split.train.len());
    tracing::info!("テストデータ: {} 枚", split.test.len());

    // 3. 学習サブセットで前処理を確定し、両方に適用
    let pipeline = PipelineBuilder::new(&request.dataset_root)
        .map_value_to_key(LABEL_KEY_COLUMN)
        .fit(&split.train);
    let vocabulary = pipeline
        .vocabulary()
        .cloned()
        .ok_or_else(|| ClassifierError::TrainingFailure("label vocabulary was not built".to_string()))?;

    if split.train.is_empty() {
        return Err(ClassifierError::TrainingFailure("training subset is empty".to_string()));
    }
    if vocabulary.len() < 2 {
        return Err(ClassifierError::TrainingFailure(format!(
            "training subset needs at least two classes, found {}",
            vocabulary.len()
        )));
    }
    if split.test.is_empty() {
        return Err(ClassifierError::TrainingFailure("test subset is empty".to_string()));
    }
    tracing::info!("ラベル ({}個): {}", vocabulary.len(), vocabulary.labels().join(", "));

    let train_frame = pipeline.transform(&split.train)?;
    let test_frame = pipeline.transform(&split.test)?;

    // 4. 分類器の設定
    let model_config = ModelConfig::new(vocabulary.len(), settings.architecture)
        .with_dropout(settings.dropout)
        .with_image_size(settings.image_size);
    let model = init_with_pretrained_backbone::<B>(&model_config, &request.workspace, device)?;

    let train_dataset = ImageDataset::from_frame(&train_frame, settings.image_size)?;
    let test_dataset = ImageDataset::from_frame(&test_frame, settings.image_size)?;

    // 5. 学習（ブロッキング）
    let mut history = Vec::with_capacity(settings.epochs);
    let fitted = panic::catch_unwind(AssertUnwindSafe(|| {
        fit_classifier(model, &train_dataset, &test_dataset, settings, device, |p| {
            progress(p);
            history.push(p.clone());
        })
    }))
    .map_err(|payload| ClassifierError::TrainingFailure(panic_message(payload)))??;

    // 6. テストサブセットで評価
    let trained = fitted.valid();
    let schema = ArtifactSchema::new(vocabulary, settings.image_size);
    let metadata = ModelMetadata::new(schema, settings, split.train.len(), split.test.len());

    let engine = InferenceEngine::from_parts(trained.clone(), metadata.clone(), device.clone());
    let scores = engine.score_frame(&test_frame)?;
    let truth = test_frame
        .label_keys()
        .ok_or_else(|| ClassifierError::SchemaMismatch("test rows have no label keys".to_string()))?;
    let metrics = EvaluationMetrics::compute(&scores, &truth, engine.schema().num_classes())?;

    // 7. 分類器 + スキーマ + 語彙を保存
    let model_binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(trained.clone().into_record(), ())
        .map_err(|e| ClassifierError::TrainingFailure(format!("failed to serialize weights: {:?}", e)))?;
    let metadata = metadata.with_metrics(metrics.clone());
    save_model_with_metadata(&request.output_model_path, &metadata, &model_binary)?;
    tracing::info!("モデルを保存しました: {}", request.output_model_path.display());

    Ok(TrainingReport {
        model_path: request.output_model_path.clone(),
        metadata,
        metrics,
        history,
    })
}

/// ワークスペース内のバックボーンファイル（拡張子なし）
fn backbone_path(workspace: &Path, architecture: Architecture) -> PathBuf {
    workspace.join(architecture.backbone_file_stem())
}

/// ワークスペースに事前学習済みバックボーンがあれば読み込み、新しい分類ヘッドを付ける
///
/// ワークスペースは読み込み専用です。学習結果はモデルファイルにのみ保存します。
fn init_with_pretrained_backbone<B: Backend>(
    config: &ModelConfig,
    workspace: &Path,
    device: &B::Device,
) -> Result<ImageClassifier<B>> {
    let path = backbone_path(workspace, config.architecture);
    let file = path.with_extension("mpk");
    let backbone = config.init_backbone::<B>(device);

    if !file.is_file() {
        tracing::info!("事前学習済みバックボーンなし。ランダム初期化で学習します");
        return Ok(config.init_with_backbone(backbone, device));
    }

    let backbone = backbone
        .load_file(&path, &DefaultFileRecorder::<FullPrecisionSettings>::new(), device)
        .map_err(|e| ClassifierError::corrupt(&file, format!("{:?}", e)))?;
    tracing::info!("事前学習済みバックボーンを読み込みました: {}", file.display());

    Ok(config.init_with_backbone(backbone, device))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("training panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("training panicked: {}", message)
    } else {
        "training panicked".to_string()
    }
}

/// 学習ループ
fn fit_classifier<B: AutodiffBackend>(
    mut model: ImageClassifier<B>,
    train_dataset: &ImageDataset,
    valid_dataset: &ImageDataset,
    settings: &TrainingSettings,
    device: &B::Device,
    mut on_epoch: impl FnMut(&EpochProgress),
) -> Result<ImageClassifier<B>> {
    let batcher = ImageBatcher::<B>::new(device.clone(), settings.image_size);
    let mut optimizer = AdamConfig::new().init();
    let mut rng = rand::rngs::StdRng::seed_from_u64(settings.seed);

    tracing::info!(
        "学習を開始します (エポック数: {}, バッチサイズ: {}, 学習率: {})",
        settings.epochs,
        settings.batch_size,
        settings.learning_rate
    );

    for epoch in 1..=settings.epochs {
        let mut indices: Vec<usize> = (0..train_dataset.len()).collect();
        indices.shuffle(&mut rng);

        let mut loss_sum = 0.0f64;
        let mut batches = 0usize;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for batch_indices in indices.chunks(settings.batch_size) {
            let items: Vec<ImageItem> = batch_indices
                .iter()
                .filter_map(|&i| train_dataset.get(i))
                .collect();
            if items.is_empty() {
                continue;
            }

            let batch = batcher.batch(items, device);
            let batch_len = batch.targets.dims()[0];
            let output = model.forward_classification(batch.images, batch.targets);

            let loss_value: f64 = output.loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(ClassifierError::TrainingFailure(format!(
                    "loss became {} at epoch {}",
                    loss_value, epoch
                )));
            }
            loss_sum += loss_value;
            batches += 1;

            let batch_correct: i64 = output
                .output
                .clone()
                .argmax(1)
                .reshape([batch_len])
                .equal(output.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem();
            correct += batch_correct as usize;
            seen += batch_len;

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(settings.learning_rate, model, grads);
        }

        let validation_accuracy = accuracy(&model.valid(), valid_dataset, settings, device);
        let progress = EpochProgress {
            epoch,
            total_epochs: settings.epochs,
            train_loss: if batches > 0 { loss_sum / batches as f64 } else { 0.0 },
            train_accuracy: if seen > 0 { correct as f64 / seen as f64 } else { 0.0 },
            validation_accuracy,
        };
        tracing::debug!(
            "epoch {}/{}: loss={:.4} train_acc={:.4} valid_acc={:.4}",
            progress.epoch,
            progress.total_epochs,
            progress.train_loss,
            progress.train_accuracy,
            progress.validation_accuracy
        );
        on_epoch(&progress);
    }

    Ok(model)
}

/// 推論モードでの正解率
fn accuracy<B: Backend>(
    model: &ImageClassifier<B>,
    dataset: &ImageDataset,
    settings: &TrainingSettings,
    device: &B::Device,
) -> f64 {
    let batcher = ImageBatcher::<B>::new(device.clone(), settings.image_size);
    let mut correct = 0usize;
    let mut seen = 0usize;

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for batch_indices in indices.chunks(settings.batch_size) {
        let items: Vec<ImageItem> = batch_indices.iter().filter_map(|&i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }

        let batch = batcher.batch(items, device);
        let batch_len = batch.targets.dims()[0];
        let batch_correct: i64 = model
            .forward(batch.images)
            .argmax(1)
            .reshape([batch_len])
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();
        correct += batch_correct as usize;
        seen += batch_len;
    }

    if seen > 0 {
        correct as f64 / seen as f64
    } else {
        0.0
    }
}

/// エポックの進捗を表示
pub fn print_epoch_progress(progress: &EpochProgress) {
    println!(
        "エポック {}/{}: 損失 {:.4}, 学習精度 {:.2}%, 検証精度 {:.2}%",
        progress.epoch,
        progress.total_epochs,
        progress.train_loss,
        progress.train_accuracy * 100.0,
        progress.validation_accuracy * 100.0
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{write_manifest, LabeledSample};
    use crate::ml::backend::{CpuBackend, CpuTrainingBackend};
    use crate::pipeline::ImageRow;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes(color: [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(12, 12, image::Rgb(color));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn request(dir: &Path, labels: &[&str]) -> TrainingRequest {
        let root = dir.join("images");
        let mut samples = Vec::new();
        for (i, label) in labels.iter().enumerate() {
            std::fs::create_dir_all(root.join(label)).unwrap();
            let rel = format!("{}/{}.png", label, i);
            let color = if *label == "metal" { [220, 220, 220] } else { [30, 120, 30] };
            std::fs::write(root.join(&rel), png_bytes(color)).unwrap();
            samples.push(LabeledSample::new(rel, *label));
        }
        let manifest_path = root.join("tags.tsv");
        write_manifest(&manifest_path, &samples).unwrap();

        let settings = TrainingSettings {
            epochs: 1,
            batch_size: 4,
            learning_rate: 0.001,
            test_fraction: 0.25,
            seed: 1,
            architecture: Architecture::ResNetMini,
            image_size: 16,
            dropout: 0.0,
        };

        TrainingRequest {
            dataset_root: root,
            manifest_path,
            output_model_path: dir.join("out").join("model.tar.gz"),
            workspace: dir.join("workspace"),
            settings,
        }
    }

    #[test]
    fn test_batcher_shapes() {
        let device = Default::default();
        let batcher = ImageBatcher::<CpuBackend>::new(device, 8);
        let items = vec![
            ImageItem { pixels: vec![0.0; 3 * 8 * 8], label: 0 },
            ImageItem { pixels: vec![1.0; 3 * 8 * 8], label: 1 },
        ];
        let batch = batcher.batch(items, &Default::default());
        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [2]);
    }

    #[test]
    fn test_dataset_requires_label_keys() {
        let row = ImageRow {
            source: PathBuf::from("a.png"),
            bytes: png_bytes([0, 0, 0]),
            label_key: None,
        };
        let frame = ImageFrame::new("Image", None, vec![row]);
        assert!(matches!(
            ImageDataset::from_frame(&frame, 8),
            Err(ClassifierError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_train_writes_artifact_and_reports_progress() {
        let dir = TempDir::new().unwrap();
        let labels = ["metal", "plastic", "metal", "plastic", "metal", "plastic", "metal", "plastic"];
        let request = request(dir.path(), &labels);

        let mut epochs = Vec::new();
        let report =
            train_model::<CpuTrainingBackend>(&request, &Default::default(), |p| epochs.push(p.epoch))
                .unwrap();

        assert_eq!(epochs, vec![1]);
        assert_eq!(report.history.len(), 1);
        assert!(report.model_path.is_file());
        assert_eq!(report.metadata.train_samples, 6);
        assert_eq!(report.metadata.test_samples, 2);
        assert_eq!(report.metrics.sample_count, 2);
        assert!(report.metadata.metrics.is_some());
        assert!(!dir.path().join("workspace").exists());
    }

    #[test]
    fn test_unreadable_backbone_is_model_corrupt() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), &["metal", "plastic", "metal", "plastic"]);
        std::fs::create_dir_all(&request.workspace).unwrap();
        std::fs::write(request.workspace.join("resnet_mini_backbone.mpk"), b"garbage").unwrap();

        let err = train_model::<CpuTrainingBackend>(&request, &Default::default(), |_| {}).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelCorrupt { .. }), "{}", err);
        assert!(!request.output_model_path.exists());
    }

    #[test]
    fn test_single_class_is_training_failure() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), &["metal", "metal", "metal", "metal"]);

        let err = train_model::<CpuTrainingBackend>(&request, &Default::default(), |_| {}).unwrap_err();
        assert!(matches!(err, ClassifierError::TrainingFailure(_)));
        assert!(!request.output_model_path.exists());
    }

    #[test]
    fn test_missing_dataset_root() {
        let dir = TempDir::new().unwrap();
        let mut request = request(dir.path(), &["metal", "plastic"]);
        request.dataset_root = dir.path().join("nowhere");

        let err = train_model::<CpuTrainingBackend>(&request, &Default::default(), |_| {}).unwrap_err();
        assert!(matches!(err, ClassifierError::DatasetRootNotFound(_)));
    }
}
