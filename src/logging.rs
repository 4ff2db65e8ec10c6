//! ログ初期化
//!
//! 診断ログは `tracing` 経由で標準エラー出力へ、
//! 設定・進捗・評価結果などのレポートは標準出力へ `println!` で出します。

use tracing_subscriber::EnvFilter;

/// tracingサブスクライバを初期化
///
/// `RUST_LOG` が設定されていればそれを優先し、
/// なければ `info`（`verbose` 時は `debug`）を使用します。
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 二重初期化（テストなど）は無視する
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init();
}
