//! パッチ分類
//!
//! 2種類の分類器（埋め込み類似度・マルチモーダルチャット）を `PatchClassifier` で統一し、
//! バッチ処理と再開可能な実行ループ（`run_classification`）から呼び出す。

mod backend;
mod chat;
mod progress;
mod runner;
mod similarity;

pub use backend::{encode_png_base64, ChatBackend, EmbeddingBackend, HttpChatBackend, HttpEmbeddingBackend};
pub use chat::ChatClassifier;
pub use progress::ProgressCursor;
pub use runner::{
    jobs_from_folder, jobs_from_patch_rows, run_classification, PatchJob, RunOutputs, RunSummary,
};
pub use similarity::{cosine_scores, l2_normalize, SimilarityClassifier};

use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

/// 分類器に渡す1パッチ
#[derive(Debug, Clone, PartialEq)]
pub struct PatchInput {
    pub patch_id: u64,
    pub semantic_category: String,
    pub path: PathBuf,
}

/// 分類結果
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// 語彙側の表記のラベル
    pub label: String,
    pub score: Option<f32>,
    /// 語彙順のスコア分布（類似度分類のみ）
    pub scores: Option<Vec<f32>>,
}

/// パッチをスキップした理由（実行は止めない）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("パッチ画像が見つかりません")]
    MissingImage,

    #[error("パッチ画像が複数あります: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    AmbiguousImage(Vec<PathBuf>),

    #[error("画像読み込みエラー: {0}")]
    ImageLoad(String),

    #[error("バックエンドエラー: {0}")]
    Backend(String),

    #[error("語彙にないカテゴリ: {0}")]
    UnexpectedCategory(String),

    #[error("埋め込み数が一致しません (expected {expected}, got {actual})")]
    BatchMismatch { expected: usize, actual: usize },
}

impl SkipReason {
    /// 集計・エラーログ用の種別名
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::MissingImage => "missing image",
            SkipReason::AmbiguousImage(_) => "ambiguous image",
            SkipReason::ImageLoad(_) => "image load",
            SkipReason::Backend(_) => "backend",
            SkipReason::UnexpectedCategory(_) => "unexpected category",
            SkipReason::BatchMismatch { .. } => "batch mismatch",
        }
    }
}

pub type ClassifyOutcome = std::result::Result<Classification, SkipReason>;

/// パッチ分類器
pub trait PatchClassifier: Send + Sync {
    /// 出力ラベルの語彙（順序はスコア分布の列順）
    fn vocabulary(&self) -> &[String];

    fn classify(&self, patch: &PatchInput) -> impl Future<Output = ClassifyOutcome> + Send;

    /// バッチ分類（戻り値は入力と同じ順序・同じ長さ）
    ///
    /// デフォルトは1件ずつ `classify` を呼ぶ。
    fn classify_batch(&self, patches: &[PatchInput]) -> impl Future<Output = Vec<ClassifyOutcome>> + Send {
        async move {
            let mut outcomes = Vec::with_capacity(patches.len());
            for patch in patches {
                outcomes.push(self.classify(patch).await);
            }
            outcomes
        }
    }
}
