//! エラー定義
//!
//! 各プログラムは1回の実行で1つの処理単位のみを行うため、
//! ここで定義するエラーはすべて回復不能として扱います。
//! メッセージの先頭には必ずエラー種別名が入ります。

use std::path::{Path, PathBuf};

use thiserror::Error;

/// 画像分類パイプライン全体のエラー型
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// マニフェストファイルが存在しない
    #[error("ManifestNotFound: manifest file does not exist: {}", .0.display())]
    ManifestNotFound(PathBuf),

    /// マニフェストの行が不正（列不足など）
    #[error("ManifestParseError: {}:{line}: {reason}", .path.display())]
    ManifestParse {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    /// 分割比率が (0, 1) の範囲外
    #[error("InvalidSplitFraction: test fraction must be within (0, 1), got {0}")]
    InvalidSplitFraction(f64),

    /// 画像ファイルが存在しない
    #[error("ImageNotFound: image file does not exist: {}", .0.display())]
    ImageNotFound(PathBuf),

    /// 画像のデコードに失敗
    #[error("ImageDecode: failed to decode image '{}': {reason}", .path.display())]
    ImageDecode { path: PathBuf, reason: String },

    /// モデルファイルが見つからない（探索した候補をすべて保持）
    #[error("ModelNotFound: no model artifact found (searched: {})", join_paths(.0))]
    ModelNotFound(Vec<PathBuf>),

    /// モデルファイルが壊れている、または読み込めない
    #[error("ModelCorrupt: '{}': {reason}", .path.display())]
    ModelCorrupt { path: PathBuf, reason: String },

    /// 推論時のスキーマ（列名・ラベル語彙）が学習時と一致しない
    #[error("SchemaMismatch: {0}")]
    SchemaMismatch(String),

    /// 学習処理の失敗
    #[error("TrainingFailure: {0}")]
    TrainingFailure(String),

    /// データセットのルートディレクトリが存在しない
    #[error("DatasetRootNotFound: dataset directory does not exist: {}", .0.display())]
    DatasetRootNotFound(PathBuf),

    /// 設定ファイルのエラー
    #[error("Config: {0}")]
    Config(String),

    #[error("Io: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassifierError {
    /// エラー種別名
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManifestNotFound(_) => "ManifestNotFound",
            Self::ManifestParse { .. } => "ManifestParseError",
            Self::InvalidSplitFraction(_) => "InvalidSplitFraction",
            Self::ImageNotFound(_) => "ImageNotFound",
            Self::ImageDecode { .. } => "ImageDecode",
            Self::ModelNotFound(_) => "ModelNotFound",
            Self::ModelCorrupt { .. } => "ModelCorrupt",
            Self::SchemaMismatch(_) => "SchemaMismatch",
            Self::TrainingFailure(_) => "TrainingFailure",
            Self::DatasetRootNotFound(_) => "DatasetRootNotFound",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl ToString) -> Self {
        Self::ModelCorrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "<none>".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, ClassifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_start_with_kind() {
        let errors = vec![
            ClassifierError::ManifestNotFound(PathBuf::from("tags.tsv")),
            ClassifierError::ManifestParse {
                path: PathBuf::from("tags.tsv"),
                line: 3,
                reason: "expected 2 fields".to_string(),
            },
            ClassifierError::InvalidSplitFraction(1.5),
            ClassifierError::ImageNotFound(PathBuf::from("a.jpg")),
            ClassifierError::ModelNotFound(vec![PathBuf::from("model.tar.gz")]),
            ClassifierError::corrupt(Path::new("model.tar.gz"), "bad gzip header"),
            ClassifierError::SchemaMismatch("column".to_string()),
            ClassifierError::TrainingFailure("loss is NaN".to_string()),
        ];

        for error in errors {
            let message = error.to_string();
            assert!(
                message.starts_with(error.kind()),
                "'{}' does not start with '{}'",
                message,
                error.kind()
            );
        }
    }

    #[test]
    fn test_model_not_found_lists_candidates() {
        let error = ClassifierError::ModelNotFound(vec![
            PathBuf::from("a/model.tar.gz"),
            PathBuf::from("b/model.tar.gz"),
        ]);
        let message = error.to_string();
        assert!(message.contains("a/model.tar.gz"));
        assert!(message.contains("b/model.tar.gz"));

        let empty = ClassifierError::ModelNotFound(Vec::new());
        assert!(empty.to_string().contains("<none>"));
    }
}
