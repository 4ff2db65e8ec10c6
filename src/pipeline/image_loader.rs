//! 生画像バイト列の読み込み

use std::path::{Path, PathBuf};

use crate::error::{ClassifierError, Result};

/// 画像フォルダを基準に相対パスを解決して画像バイト列を読み込む
#[derive(Debug, Clone)]
pub struct ImageLoader {
    image_folder: PathBuf,
}

impl ImageLoader {
    pub fn new(image_folder: impl Into<PathBuf>) -> Self {
        Self {
            image_folder: image_folder.into(),
        }
    }

    /// 単一画像用: 画像自身が置かれているディレクトリを基準にする
    pub fn for_image(image_path: &Path) -> Self {
        let folder = image_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(folder)
    }

    pub fn image_folder(&self) -> &Path {
        &self.image_folder
    }

    /// 相対パスを解決（絶対パスはそのまま）
    pub fn resolve(&self, image_path: &str) -> PathBuf {
        let path = Path::new(image_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.image_folder.join(path)
        }
    }

    /// 画像ファイルを読み込み、(解決済みパス, バイト列) を返す
    pub fn load_raw_bytes(&self, image_path: &str) -> Result<(PathBuf, Vec<u8>)> {
        let resolved = self.resolve(image_path);
        if !resolved.is_file() {
            return Err(ClassifierError::ImageNotFound(resolved));
        }
        let bytes = std::fs::read(&resolved)?;
        Ok((resolved, bytes))
    }
}
