//! tracing の初期化と進捗バー

use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` が設定されていればそれを優先し、なければ `--verbose` に応じたレベルを使う
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "xr_interaction=debug,xr_interaction_common=debug"
    } else {
        "xr_interaction=info"
    };

    // 二重初期化（テストなど）は無視する
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// ラベル付きの進捗バーを作成
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
            label
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
