//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（スキーマ、ラベル語彙、ハイパーパラメータなど）
//! - model.bin       - モデルの重み（バイナリ）

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::error::{ClassifierError, Result};
use crate::model::model_metadata::{ModelMetadata, ARTIFACT_FORMAT_VERSION};

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 一時ファイルに書き出してからリネームするため、
/// 失敗時に既存のモデルファイルが壊れることはありません。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<()> {
    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = temporary_path(output_path);
    let written = write_archive(&tmp_path, metadata, model_binary);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, output_path)?;
    tracing::debug!("モデルを保存しました: {}", output_path.display());
    Ok(())
}

fn temporary_path(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    output_path.with_file_name(name)
}

fn write_archive(path: &Path, metadata: &ModelMetadata, model_binary: &[u8]) -> Result<()> {
    let tar_gz_file = File::create(path)?;

    // Gzip圧縮を設定
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    // メタデータをJSONとして追加
    let json_str = metadata
        .to_json_string()
        .map_err(|e| ClassifierError::corrupt(path, e))?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;

    // モデルバイナリを追加
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // tarアーカイブを完成させる
    let encoder = tar_builder.into_inner()?;
    let mut file = encoder.finish()?;
    file.flush()?;
    Ok(())
}

fn append_entry<W: Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    if !tar_gz_path.is_file() {
        return Err(ClassifierError::ModelNotFound(vec![tar_gz_path.to_path_buf()]));
    }
    let tar_gz_file = File::open(tar_gz_path).map_err(|e| open_failure(tar_gz_path, e))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// 存在確認後に開けなかった場合は、消えていれば `ModelNotFound`、それ以外は `ModelCorrupt`
fn open_failure(tar_gz_path: &Path, error: std::io::Error) -> ClassifierError {
    match error.kind() {
        std::io::ErrorKind::NotFound => ClassifierError::ModelNotFound(vec![tar_gz_path.to_path_buf()]),
        _ => ClassifierError::corrupt(tar_gz_path, format!("cannot open artifact: {}", error)),
    }
}

fn parse_metadata(tar_gz_path: &Path, json_str: &str) -> Result<ModelMetadata> {
    let metadata = ModelMetadata::from_json_string(json_str)
        .map_err(|e| ClassifierError::corrupt(tar_gz_path, format!("invalid {}: {}", METADATA_ENTRY, e)))?;

    if metadata.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(ClassifierError::corrupt(
            tar_gz_path,
            format!(
                "unsupported format version {} (expected {})",
                metadata.format_version, ARTIFACT_FORMAT_VERSION
            ),
        ));
    }
    if metadata.schema.vocabulary.is_empty() {
        return Err(ClassifierError::corrupt(tar_gz_path, "label vocabulary is empty"));
    }

    Ok(metadata)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut archive = open_archive(tar_gz_path)?;
    let corrupt = |e: std::io::Error| ClassifierError::corrupt(tar_gz_path, e);

    // metadata.jsonを探す
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let is_metadata = entry.path().map_err(corrupt)?.to_str() == Some(METADATA_ENTRY);

        if is_metadata {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str).map_err(corrupt)?;
            return parse_metadata(tar_gz_path, &json_str);
        }
    }

    Err(ClassifierError::corrupt(
        tar_gz_path,
        format!("{} not found in archive", METADATA_ENTRY),
    ))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut archive = open_archive(tar_gz_path)?;
    let corrupt = |e: std::io::Error| ClassifierError::corrupt(tar_gz_path, e);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    // 両方のファイルを読み込む
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let name = entry
            .path()
            .map_err(corrupt)?
            .to_str()
            .map(str::to_string);

        match name.as_deref() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str).map_err(corrupt)?;
                metadata_opt = Some(parse_metadata(tar_gz_path, &json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer).map_err(corrupt)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(ClassifierError::corrupt(
            tar_gz_path,
            format!("{} not found in archive", METADATA_ENTRY),
        )),
        (_, None) => Err(ClassifierError::corrupt(
            tar_gz_path,
            format!("{} not found in archive", MODEL_ENTRY),
        )),
    }
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("アーキテクチャ: {}", metadata.architecture);
    println!("ラベル: {}", metadata.schema.vocabulary.labels().join(", "));
    println!("モデル入力サイズ: {0}x{0}", metadata.schema.image_size);
    println!("学習エポック数: {}", metadata.num_epochs);
    println!("バッチサイズ: {}", metadata.batch_size);
    println!("学習率: {}", metadata.learning_rate);
    println!(
        "学習/テスト: {} / {} 枚 (テスト割合 {}, シード {})",
        metadata.train_samples, metadata.test_samples, metadata.test_fraction, metadata.seed
    );
    if let Some(metrics) = &metadata.metrics {
        println!("学習時のマクロ精度: {:.4}", metrics.macro_accuracy);
        println!("学習時のミクロ精度: {:.4}", metrics.micro_accuracy);
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::TrainingSettings;
    use crate::model::schema::ArtifactSchema;
    use crate::pipeline::LabelVocabulary;
    use tempfile::TempDir;

    fn metadata() -> ModelMetadata {
        let schema = ArtifactSchema::new(LabelVocabulary::fit(["metal", "plastic"]), 32);
        ModelMetadata::new(schema, &TrainingSettings::default(), 8, 2)
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("model.tar.gz");
        let meta = metadata();

        save_model_with_metadata(&path, &meta, &[1, 2, 3, 4]).unwrap();
        assert!(path.is_file());
        assert!(!temporary_path(&path).exists());

        let (loaded, binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(binary, vec![1, 2, 3, 4]);
        assert_eq!(load_metadata(&path).unwrap(), meta);
    }

    #[test]
    fn test_missing_file_is_model_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load_model_with_metadata(&dir.path().join("none.tar.gz")).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelNotFound(_)));
    }

    #[test]
    fn test_open_failure_kinds() {
        let path = Path::new("model.tar.gz");
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            open_failure(path, denied),
            ClassifierError::ModelCorrupt { .. }
        ));

        let vanished = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            open_failure(path, vanished),
            ClassifierError::ModelNotFound(_)
        ));
    }

    #[test]
    fn test_directory_is_model_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load_metadata(dir.path()).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelNotFound(_)));
    }

    #[test]
    fn test_garbage_file_is_model_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.tar.gz");
        std::fs::write(&path, b"this is not an archive").unwrap();

        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelCorrupt { .. }));
    }

    #[test]
    fn test_archive_without_weights_is_model_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.tar.gz");

        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        let json = metadata().to_json_string().unwrap();
        append_entry(&mut builder, METADATA_ENTRY, json.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelCorrupt { .. }));
        assert!(err.to_string().contains("model.bin"));
    }

    #[test]
    fn test_overwrite_replaces_previous_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.tar.gz");
        save_model_with_metadata(&path, &metadata(), &[0]).unwrap();
        save_model_with_metadata(&path, &metadata(), &[9, 9]).unwrap();

        let (_, binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(binary, vec![9, 9]);
    }
}
