//! 学習/テスト分割
//!
//! 同じシードと同じ入力順であれば、常に同じ分割結果になります。

use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dataset::LabeledSample;
use crate::error::{ClassifierError, Result};

/// 学習用とテスト用に分割されたマニフェスト
///
/// どちらも元のマニフェストの並び順を保持します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<LabeledSample>,
    pub test: Vec<LabeledSample>,
}

/// マニフェストを分割する
///
/// テスト件数は `round(件数 × test_fraction)`。
pub fn train_test_split(
    samples: &[LabeledSample],
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(ClassifierError::InvalidSplitFraction(test_fraction));
    }

    // インデックスのみをシャッフル
    let mut indices: Vec<usize> = (0..samples.len()).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_len = (samples.len() as f64 * test_fraction).round() as usize;
    let mut is_test = vec![false; samples.len()];
    for &idx in &indices[..test_len] {
        is_test[idx] = true;
    }

    let (test, train): (Vec<_>, Vec<_>) = samples
        .iter()
        .zip(is_test)
        .partition(|(_, test)| *test);

    Ok(TrainTestSplit {
        train: train.into_iter().map(|(s, _)| s.clone()).collect(),
        test: test.into_iter().map(|(s, _)| s.clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ten_samples() -> Vec<LabeledSample> {
        (0..10)
            .map(|i| {
                let label = if i < 5 { "plastic" } else { "metal" };
                LabeledSample::new(format!("{}/{}.jpg", label, i), label)
            })
            .collect()
    }

    #[test]
    fn test_ten_rows_twenty_percent() {
        let samples = ten_samples();
        let split = train_test_split(&samples, 0.2, 1).unwrap();

        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 8);

        // 繰り返しても同じメンバー
        for _ in 0..5 {
            assert_eq!(train_test_split(&samples, 0.2, 1).unwrap(), split);
        }
    }

    #[test]
    fn test_disjoint_and_complete() {
        let samples = ten_samples();
        let split = train_test_split(&samples, 0.3, 7).unwrap();

        let train: HashSet<_> = split.train.iter().collect();
        let test: HashSet<_> = split.test.iter().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), samples.len());
    }

    #[test]
    fn test_subsets_keep_manifest_order() {
        let samples = ten_samples();
        let split = train_test_split(&samples, 0.5, 3).unwrap();

        let position = |s: &LabeledSample| samples.iter().position(|x| x == s).unwrap();
        for subset in [&split.train, &split.test] {
            let positions: Vec<_> = subset.iter().map(position).collect();
            let mut sorted = positions.clone();
            sorted.sort();
            assert_eq!(positions, sorted);
        }
    }

    #[test]
    fn test_different_seeds_usually_differ() {
        let samples: Vec<_> = (0..100)
            .map(|i| LabeledSample::new(format!("{}.jpg", i), "x"))
            .collect();
        let a = train_test_split(&samples, 0.2, 1).unwrap();
        let b = train_test_split(&samples, 0.2, 2).unwrap();
        assert_ne!(a.test, b.test);
    }

    #[test]
    fn test_invalid_fractions() {
        let samples = ten_samples();
        for f in [0.0, 1.0, -0.1, 1.5, f64::NAN, f64::INFINITY] {
            match train_test_split(&samples, f, 1) {
                Err(ClassifierError::InvalidSplitFraction(_)) => {}
                other => panic!("fraction {} gave {:?}", f, other.map(|s| s.test.len())),
            }
        }
    }

    #[test]
    fn test_empty_manifest() {
        let split = train_test_split(&[], 0.2, 1).unwrap();
        assert!(split.train.is_empty());
        assert!(split.test.is_empty());
    }
}
