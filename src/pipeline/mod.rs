//! 前処理パイプライン
//!
//! 1. ラベル文字列 → クラスインデックス（学習サブセットから構築した語彙を使用）
//! 2. 画像パス → 生画像バイト列（データセットのルートを基準に解決）
//!
//! 学習時に一度だけ `fit` したパイプラインを学習・テスト両方に適用します。
//! 推論時は語彙を作り直さず、モデルファイルに保存された語彙を渡して構築します。

pub mod image_loader;
pub mod vocabulary;

use std::path::{Path, PathBuf};

use crate::dataset::LabeledSample;
use crate::error::Result;

pub use image_loader::ImageLoader;
pub use vocabulary::LabelVocabulary;

/// 画像列の既定名
pub const IMAGE_COLUMN: &str = "Image";
/// ラベルキー列の既定名
pub const LABEL_KEY_COLUMN: &str = "LabelKey";

/// 前処理済みの1行
#[derive(Debug, Clone)]
pub struct ImageRow {
    /// 解決済みの画像パス
    pub source: PathBuf,
    /// 生画像バイト列（デコードは分類器側で行う）
    pub bytes: Vec<u8>,
    /// クラスインデックス（ラベル付きデータのみ）
    pub label_key: Option<usize>,
}

/// 前処理結果（列名 + 行）
#[derive(Debug, Clone)]
pub struct ImageFrame {
    feature_column: String,
    label_column: Option<String>,
    rows: Vec<ImageRow>,
}

impl ImageFrame {
    pub fn new(feature_column: impl Into<String>, label_column: Option<String>, rows: Vec<ImageRow>) -> Self {
        Self {
            feature_column: feature_column.into(),
            label_column,
            rows,
        }
    }

    pub fn feature_column(&self) -> &str {
        &self.feature_column
    }

    pub fn label_column(&self) -> Option<&str> {
        self.label_column.as_deref()
    }

    pub fn rows(&self) -> &[ImageRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 全行のラベルキー（ラベルのない行があれば None）
    pub fn label_keys(&self) -> Option<Vec<usize>> {
        self.rows.iter().map(|row| row.label_key).collect()
    }
}

/// パイプラインの構築
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    image_folder: PathBuf,
    feature_column: String,
    label_column: Option<String>,
}

impl PipelineBuilder {
    /// 画像読み込みのみのパイプライン
    pub fn new(image_folder: impl Into<PathBuf>) -> Self {
        Self {
            image_folder: image_folder.into(),
            feature_column: IMAGE_COLUMN.to_string(),
            label_column: None,
        }
    }

    /// 画像読み込み変換の出力列名
    pub fn with_feature_column(mut self, name: impl Into<String>) -> Self {
        self.feature_column = name.into();
        self
    }

    /// ラベル → キー変換を追加
    pub fn map_value_to_key(mut self, output_column: impl Into<String>) -> Self {
        self.label_column = Some(output_column.into());
        self
    }

    /// 学習サブセットから語彙を構築してパイプラインを確定
    pub fn fit(self, samples: &[LabeledSample]) -> PreprocessingPipeline {
        let vocabulary = self
            .label_column
            .as_ref()
            .map(|_| LabelVocabulary::fit(samples.iter().map(|s| s.label.as_str())));
        self.finish(vocabulary)
    }

    /// 保存済みの語彙を再利用してパイプラインを確定
    pub fn with_vocabulary(mut self, vocabulary: LabelVocabulary) -> PreprocessingPipeline {
        if self.label_column.is_none() {
            self.label_column = Some(LABEL_KEY_COLUMN.to_string());
        }
        self.finish(Some(vocabulary))
    }

    /// 画像読み込みのみで確定
    pub fn build(mut self) -> PreprocessingPipeline {
        self.label_column = None;
        self.finish(None)
    }

    fn finish(self, vocabulary: Option<LabelVocabulary>) -> PreprocessingPipeline {
        PreprocessingPipeline {
            loader: ImageLoader::new(self.image_folder),
            feature_column: self.feature_column,
            label_column: self.label_column,
            vocabulary,
        }
    }
}

/// 確定済みの前処理パイプライン
#[derive(Debug, Clone)]
pub struct PreprocessingPipeline {
    loader: ImageLoader,
    feature_column: String,
    label_column: Option<String>,
    vocabulary: Option<LabelVocabulary>,
}

impl PreprocessingPipeline {
    pub fn vocabulary(&self) -> Option<&LabelVocabulary> {
        self.vocabulary.as_ref()
    }

    pub fn feature_column(&self) -> &str {
        &self.feature_column
    }

    pub fn image_folder(&self) -> &Path {
        self.loader.image_folder()
    }

    /// ラベル付きサンプルを変換
    ///
    /// 語彙を持つ場合は未知ラベルで `SchemaMismatch`、画像がなければ `ImageNotFound`。
    pub fn transform(&self, samples: &[LabeledSample]) -> Result<ImageFrame> {
        let mut rows = Vec::with_capacity(samples.len());
        for sample in samples {
            let label_key = match &self.vocabulary {
                Some(vocabulary) => Some(vocabulary.encode(&sample.label)?),
                None => None,
            };
            let (source, bytes) = self.loader.load_raw_bytes(&sample.image_path)?;
            rows.push(ImageRow {
                source,
                bytes,
                label_key,
            });
        }
        Ok(self.frame(rows))
    }

    /// ラベルなしの画像パスを変換
    pub fn transform_images<S: AsRef<str>>(&self, image_paths: &[S]) -> Result<ImageFrame> {
        let mut rows = Vec::with_capacity(image_paths.len());
        for image_path in image_paths {
            let (source, bytes) = self.loader.load_raw_bytes(image_path.as_ref())?;
            rows.push(ImageRow {
                source,
                bytes,
                label_key: None,
            });
        }
        Ok(ImageFrame::new(self.feature_column.clone(), None, rows))
    }

    fn frame(&self, rows: Vec<ImageRow>) -> ImageFrame {
        let label_column = self.vocabulary.as_ref().and(self.label_column.clone());
        ImageFrame::new(self.feature_column.clone(), label_column, rows)
    }
}
