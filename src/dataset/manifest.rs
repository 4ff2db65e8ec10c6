//! マニフェスト（tags.tsv）の読み書き
//!
//! 1行1サンプル、`<画像パス>\t<ラベル>` の2列、ヘッダー行なし。

use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::paths::list_images;

/// ラベル付きサンプル
///
/// `image_path` はデータセットのルートディレクトリからの相対パス
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledSample {
    pub image_path: String,
    pub label: String,
}

impl LabeledSample {
    pub fn new(image_path: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            label: label.into(),
        }
    }
}

/// マニフェストを読み込む（ファイル順を保持）
pub fn load_manifest(path: &Path) -> Result<Vec<LabeledSample>> {
    if !path.is_file() {
        return Err(ClassifierError::ManifestNotFound(path.to_path_buf()));
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .terminator(Terminator::CRLF)
        .from_path(path)
        .map_err(|e| parse_error(path, &e))?;

    let mut samples = Vec::new();

    for result in reader.records() {
        let record = result.map_err(|e| parse_error(path, &e))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.len() < 2 {
            return Err(ClassifierError::ManifestParse {
                path: path.to_path_buf(),
                line,
                reason: format!("expected 2 tab-separated fields, found {}", record.len()),
            });
        }

        let image_path = record.get(0).unwrap_or_default().trim();
        let label = record.get(1).unwrap_or_default().trim();

        if image_path.is_empty() || label.is_empty() {
            return Err(ClassifierError::ManifestParse {
                path: path.to_path_buf(),
                line,
                reason: "image path and label must not be empty".to_string(),
            });
        }

        samples.push(LabeledSample::new(image_path, label));
    }

    tracing::debug!("マニフェスト読み込み: {} ({} 件)", path.display(), samples.len());
    Ok(samples)
}

fn parse_error(path: &Path, error: &csv::Error) -> ClassifierError {
    ClassifierError::ManifestParse {
        path: path.to_path_buf(),
        line: error.position().map(|p| p.line()).unwrap_or(0),
        reason: error.to_string(),
    }
}

/// マニフェストを書き出す
pub fn write_manifest(path: &Path, samples: &[LabeledSample]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .from_path(path)
        .map_err(|e| ClassifierError::Io(std::io::Error::other(e)))?;

    for sample in samples {
        writer
            .write_record([sample.image_path.as_str(), sample.label.as_str()])
            .map_err(|e| ClassifierError::Io(std::io::Error::other(e)))?;
    }
    writer.flush()?;
    Ok(())
}

/// `<root>/<ラベル>/<画像>` 構成のフォルダを走査してサンプルを生成
///
/// ラベル（フォルダ名）順、ファイル名順に並びます。
pub fn scan_class_folders(root: &Path) -> Result<Vec<LabeledSample>> {
    if !root.is_dir() {
        return Err(ClassifierError::DatasetRootNotFound(root.to_path_buf()));
    }

    let mut class_dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            class_dirs.push(path);
        }
    }
    class_dirs.sort();

    let mut samples = Vec::new();
    for class_dir in class_dirs {
        let label = match class_dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                tracing::warn!("UTF-8でないフォルダ名をスキップ: {}", class_dir.display());
                continue;
            }
        };

        for image in list_images(&class_dir)? {
            if let Some(file_name) = image.file_name().and_then(|n| n.to_str()) {
                samples.push(LabeledSample::new(format!("{}/{}", label, file_name), label.clone()));
            }
        }
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_preserves_line_count_and_order() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "tags.tsv",
            "plastic/1.jpg\tplastic\nmetal/1.jpg\tmetal\nplastic/2.jpg\tplastic\r\nmetal/2.jpg\tmetal\n",
        );

        let samples = load_manifest(&path).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], LabeledSample::new("plastic/1.jpg", "plastic"));
        assert_eq!(samples[1], LabeledSample::new("metal/1.jpg", "metal"));
        assert_eq!(samples[2], LabeledSample::new("plastic/2.jpg", "plastic"));
        assert_eq!(samples[3], LabeledSample::new("metal/2.jpg", "metal"));
    }

    #[test]
    fn test_extra_columns_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "tags.tsv", "a.jpg\tcat\textra\n");
        let samples = load_manifest(&path).unwrap();
        assert_eq!(samples, vec![LabeledSample::new("a.jpg", "cat")]);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_manifest(&dir.path().join("tags.tsv")).unwrap_err();
        assert!(matches!(err, ClassifierError::ManifestNotFound(_)));
    }

    #[test]
    fn test_single_field_row_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "tags.tsv", "a.jpg\tcat\nb.jpg\n");
        match load_manifest(&path).unwrap_err() {
            ClassifierError::ManifestParse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_label_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "tags.tsv", "a.jpg\t\n");
        assert!(matches!(
            load_manifest(&path).unwrap_err(),
            ClassifierError::ManifestParse { .. }
        ));
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("tags.tsv");
        let samples = vec![
            LabeledSample::new("metal/x \"1\".jpg", "metal"),
            LabeledSample::new("plastic/y.png", "plastic"),
        ];

        write_manifest(&path, &samples).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "metal/x \"1\".jpg\tmetal\nplastic/y.png\tplastic\n");
        assert_eq!(load_manifest(&path).unwrap(), samples);
    }

    #[test]
    fn test_scan_class_folders() {
        let dir = TempDir::new().unwrap();
        for (class, file) in [("plastic", "b.jpg"), ("plastic", "a.PNG"), ("metal", "c.jpeg")] {
            std::fs::create_dir_all(dir.path().join(class)).unwrap();
            std::fs::write(dir.path().join(class).join(file), b"x").unwrap();
        }
        std::fs::write(dir.path().join("plastic").join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("tags.tsv"), b"").unwrap();

        let samples = scan_class_folders(dir.path()).unwrap();
        assert_eq!(
            samples,
            vec![
                LabeledSample::new("metal/c.jpeg", "metal"),
                LabeledSample::new("plastic/a.PNG", "plastic"),
                LabeledSample::new("plastic/b.jpg", "plastic"),
            ]
        );
    }
}
