//! ラベル語彙（ラベル文字列 ⇔ クラスインデックス）
//!
//! 学習サブセットから出現順に構築し、モデルファイルに保存して推論時にそのまま再利用します。

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ClassifierError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelVocabulary {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelVocabulary {
    /// ラベル列から語彙を構築（初出順にインデックスを割り当て）
    pub fn fit<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut vocabulary = Self::default();
        for label in labels {
            if !vocabulary.index.contains_key(label) {
                vocabulary.index.insert(label.to_string(), vocabulary.labels.len());
                vocabulary.labels.push(label.to_string());
            }
        }
        vocabulary
    }

    /// 保存済みのラベル一覧から復元（重複はスキーマ不一致）
    pub fn from_labels(labels: Vec<String>) -> Result<Self> {
        let mut index = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            if index.insert(label.clone(), i).is_some() {
                return Err(ClassifierError::SchemaMismatch(format!(
                    "label vocabulary contains duplicate label '{}'",
                    label
                )));
            }
        }
        Ok(Self { labels, index })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn label_of(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// ラベル → クラスインデックス（未知ラベルは致命的エラー）
    pub fn encode(&self, label: &str) -> Result<usize> {
        self.index_of(label).ok_or_else(|| {
            ClassifierError::SchemaMismatch(format!(
                "label '{}' is not part of the model vocabulary [{}]",
                label,
                self.labels.join(", ")
            ))
        })
    }

    /// クラスインデックス → ラベル
    pub fn decode(&self, index: usize) -> Result<&str> {
        self.label_of(index).ok_or_else(|| {
            ClassifierError::SchemaMismatch(format!(
                "class index {} is out of range for a vocabulary of {} labels",
                index,
                self.labels.len()
            ))
        })
    }
}

// JSONではラベル配列としてのみ保存する
impl Serialize for LabelVocabulary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.labels.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LabelVocabulary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let labels = Vec::<String>::deserialize(deserializer)?;
        Self::from_labels(labels).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_uses_first_occurrence_order() {
        let vocab = LabelVocabulary::fit(["metal", "plastic", "metal", "glass", "plastic"]);
        assert_eq!(vocab.labels(), &["metal", "plastic", "glass"]);
        assert_eq!(vocab.encode("glass").unwrap(), 2);
        assert_eq!(vocab.decode(1).unwrap(), "plastic");
    }

    #[test]
    fn test_unknown_label_is_schema_mismatch() {
        let vocab = LabelVocabulary::fit(["metal", "plastic"]);
        assert!(matches!(
            vocab.encode("paper"),
            Err(ClassifierError::SchemaMismatch(_))
        ));
        assert!(matches!(vocab.decode(2), Err(ClassifierError::SchemaMismatch(_))));
    }

    #[test]
    fn test_json_is_plain_label_list() {
        let vocab = LabelVocabulary::fit(["b", "a"]);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["b","a"]"#);

        let restored: LabelVocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, vocab);
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        assert!(serde_json::from_str::<LabelVocabulary>(r#"["a","a"]"#).is_err());
        assert!(LabelVocabulary::from_labels(vec!["a".into(), "a".into()]).is_err());
    }
}
