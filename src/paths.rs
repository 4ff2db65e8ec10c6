//! パス解決
//!
//! 「存在する最初のパスを使う」探索を、候補の順序付きリストとして明示的に扱います。
//!
//! モデルファイルの探索順:
//! 1. コマンドライン引数 `--model`（指定時はこれのみ）
//! 2. 設定ファイルの `paths.model_path`
//! 3. カレントディレクトリの `model.tar.gz`
//! 4. ワークスペースディレクトリの `model.tar.gz`

use std::path::{Path, PathBuf};

use crate::error::{ClassifierError, Result};
use crate::model::AppConfig;

/// 既定のモデルファイル名
pub const DEFAULT_MODEL_FILE: &str = "model.tar.gz";

/// 対応する画像拡張子
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 候補が1つも存在しなかった場合の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    pub searched: Vec<PathBuf>,
}

/// 順序付きの候補パスリスト
#[derive(Debug, Clone, Default)]
pub struct CandidateResolver {
    candidates: Vec<PathBuf>,
}

impl CandidateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 候補を末尾に追加（重複は無視）
    pub fn with_candidate(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.candidates.contains(&path) {
            self.candidates.push(path);
        }
        self
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// 存在する最初の候補を返す
    pub fn resolve(&self) -> std::result::Result<PathBuf, NotFound> {
        self.candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| NotFound {
                searched: self.candidates.clone(),
            })
    }
}

/// モデルファイルの探索候補を構築
pub fn model_candidates(explicit: Option<&Path>, config: &AppConfig) -> CandidateResolver {
    if let Some(path) = explicit {
        return CandidateResolver::new().with_candidate(path);
    }

    let mut resolver = CandidateResolver::new().with_candidate(&config.paths.model_path);
    if let Ok(current) = std::env::current_dir() {
        resolver = resolver.with_candidate(current.join(DEFAULT_MODEL_FILE));
    }
    resolver.with_candidate(config.paths.workspace.join(DEFAULT_MODEL_FILE))
}

/// モデルファイルを探索
pub fn resolve_model_path(explicit: Option<&Path>, config: &AppConfig) -> Result<PathBuf> {
    model_candidates(explicit, config)
        .resolve()
        .map_err(|nf| ClassifierError::ModelNotFound(nf.searched))
}

/// 拡張子が対応画像形式かどうか（大文字小文字は区別しない）
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// フォルダ内の画像ファイルを名前順で列挙（サブディレクトリは含まない）
pub fn list_images(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(ClassifierError::ImageNotFound(folder.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// フォルダ内の最初の画像（名前順）
pub fn first_image_in(folder: &Path) -> Result<PathBuf> {
    list_images(folder)?
        .into_iter()
        .next()
        .ok_or_else(|| ClassifierError::ImageNotFound(folder.join("*.jpg")))
}
