//! 評価指標
//!
//! マイクロ精度・マクロ精度・対数損失に加えて、
//! 対数損失の改善率・クラス別対数損失・混同行列を計算します。

use std::path::Path;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::dataset::load_manifest;
use crate::error::{ClassifierError, Result};
use crate::ml::inference::{argmax, InferenceEngine};

/// 対数損失計算時の確率の下限
pub const LOG_LOSS_EPSILON: f64 = 1e-15;

/// 評価結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EvaluationMetrics {
    /// 評価サンプル数
    pub sample_count: usize,
    /// 全サンプルでの正解率
    pub micro_accuracy: f64,
    /// クラスごとの正解率の平均（正解データに現れるクラスのみ）
    pub macro_accuracy: f64,
    /// 平均対数損失
    pub log_loss: f64,
    /// 事前分布に対する対数損失の改善率
    pub log_loss_reduction: f64,
    /// クラス別の平均対数損失（語彙順）
    pub per_class_log_loss: Vec<f64>,
    /// 混同行列 `[正解][予測]`
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl EvaluationMetrics {
    /// スコア分布と正解インデックスから指標を計算
    pub fn compute(scores: &[Vec<f32>], truth: &[usize], num_classes: usize) -> Result<Self> {
        if scores.len() != truth.len() {
            return Err(ClassifierError::SchemaMismatch(format!(
                "{} score rows for {} labels",
                scores.len(),
                truth.len()
            )));
        }
        if let Some(bad) = truth.iter().find(|&&t| t >= num_classes) {
            return Err(ClassifierError::SchemaMismatch(format!(
                "label index {} is outside of {} classes",
                bad, num_classes
            )));
        }
        if let Some(row) = scores.iter().find(|row| row.len() != num_classes) {
            return Err(ClassifierError::SchemaMismatch(format!(
                "score row has {} entries for {} classes",
                row.len(),
                num_classes
            )));
        }

        let sample_count = truth.len();
        let mut confusion_matrix = vec![vec![0usize; num_classes]; num_classes];
        let mut class_loss_sum = vec![0.0f64; num_classes];
        let mut class_support = vec![0usize; num_classes];
        let mut loss_sum = 0.0f64;

        for (row, &actual) in scores.iter().zip(truth) {
            let predicted = argmax(row);
            confusion_matrix[actual][predicted] += 1;

            let p = (row[actual] as f64).clamp(LOG_LOSS_EPSILON, 1.0);
            let loss = -p.ln();
            loss_sum += loss;
            class_loss_sum[actual] += loss;
            class_support[actual] += 1;
        }

        if sample_count == 0 {
            return Ok(Self {
                per_class_log_loss: vec![0.0; num_classes],
                confusion_matrix,
                ..Self::default()
            });
        }

        let n = sample_count as f64;
        let correct: usize = (0..num_classes).map(|c| confusion_matrix[c][c]).sum();
        let micro_accuracy = correct as f64 / n;

        let present: Vec<usize> = (0..num_classes).filter(|&c| class_support[c] > 0).collect();
        let macro_accuracy = present
            .iter()
            .map(|&c| confusion_matrix[c][c] as f64 / class_support[c] as f64)
            .sum::<f64>()
            / present.len() as f64;

        let log_loss = loss_sum / n;

        let per_class_log_loss = (0..num_classes)
            .map(|c| {
                if class_support[c] > 0 {
                    class_loss_sum[c] / class_support[c] as f64
                } else {
                    0.0
                }
            })
            .collect();

        // 正解データのクラス頻度だけを使う予測器の対数損失
        let prior_log_loss = present
            .iter()
            .map(|&c| {
                let support = class_support[c] as f64;
                -support * (support / n).ln()
            })
            .sum::<f64>()
            / n;
        let log_loss_reduction = if prior_log_loss > LOG_LOSS_EPSILON {
            (prior_log_loss - log_loss) / prior_log_loss
        } else {
            0.0
        };

        Ok(Self {
            sample_count,
            micro_accuracy,
            macro_accuracy,
            log_loss,
            log_loss_reduction,
            per_class_log_loss,
            confusion_matrix,
        })
    }

    /// 評価結果を表示
    pub fn print_metrics(&self, labels: &[String]) {
        println!("\n=== 評価結果 ===");
        println!("サンプル数: {}", self.sample_count);
        println!("マクロ精度: {:.4}", self.macro_accuracy);
        println!("ミクロ精度: {:.4}", self.micro_accuracy);
        println!("対数損失: {:.4}", self.log_loss);
        println!("対数損失の改善率: {:.4}", self.log_loss_reduction);

        println!("\n--- クラス別対数損失 ---");
        for (label, loss) in labels.iter().zip(&self.per_class_log_loss) {
            println!("  {}: {:.4}", label, loss);
        }

        println!("\n--- 混同行列（行: 正解, 列: 予測） ---");
        println!("  {}", labels.join("\t"));
        for (label, row) in labels.iter().zip(&self.confusion_matrix) {
            let cells: Vec<String> = row.iter().map(usize::to_string).collect();
            println!("  {}\t{}", label, cells.join("\t"));
        }
        println!("================");
    }
}

/// 保存済みモデルをラベル付きマニフェストで評価
///
/// マニフェスト内の画像パスは `image_root` を基準に解決します。
/// モデルファイルへの書き込みは行いません。
pub fn evaluate_model<B: Backend>(
    engine: &InferenceEngine<B>,
    manifest_path: &Path,
    image_root: &Path,
) -> Result<EvaluationMetrics> {
    let samples = load_manifest(manifest_path)?;
    if samples.is_empty() {
        return Err(ClassifierError::ManifestParse {
            path: manifest_path.to_path_buf(),
            line: 0,
            reason: "manifest contains no samples".to_string(),
        });
    }
    tracing::info!("評価データ: {} 枚", samples.len());

    let frame = engine.labeled_pipeline(image_root).transform(&samples)?;
    let truth = frame
        .label_keys()
        .ok_or_else(|| ClassifierError::SchemaMismatch("evaluation rows have no label keys".to_string()))?;

    let scores = engine.score_frame(&frame)?;
    EvaluationMetrics::compute(&scores, &truth, engine.schema().num_classes())
}
