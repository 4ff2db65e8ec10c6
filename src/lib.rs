//! ラベル付きマニフェストから転移学習で画像分類器を学習・評価・推論するライブラリ
//!
//! - `dataset`: マニフェスト読み込みと学習/テスト分割
//! - `pipeline`: ラベル → キー変換と生画像の読み込み
//! - `ml`: 分類器・学習・推論・評価
//! - `model`: 設定とモデルファイル（tar.gz）の永続化

pub mod dataset;
pub mod error;
pub mod logging;
pub mod ml;
pub mod model;
pub mod paths;
pub mod pipeline;

pub use error::{ClassifierError, Result};
