use clap::{Parser, Subcommand};
use crate::assembler::AssembleMode;
use crate::extractor::{MatchMode, PatchNaming};
use crate::provider::ClassifierProvider;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xr-interaction")]
#[command(about = "XRインタラクション認識: パッチ切り出し・VLM分類・COCO変換・評価ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 分類バックエンド (clip/chat)
    #[arg(long, default_value = "clip", global = true)]
    pub provider: ClassifierProvider,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 注釈のbboxからパッチを切り出してCSVを出力
    Extract {
        /// インタラクション注釈（COCO JSON）
        #[arg(short, long)]
        interaction: PathBuf,

        /// セマンティック注釈（COCO JSON）
        #[arg(short, long)]
        semantic: Option<PathBuf>,

        /// 元画像フォルダ
        #[arg(long)]
        images: PathBuf,

        /// 切り出し画像の出力フォルダ
        #[arg(short, long)]
        output: PathBuf,

        /// パッチCSV（デフォルト: 出力フォルダ/patches.csv）
        #[arg(long)]
        csv: Option<PathBuf>,

        /// エラーログ（デフォルト: 出力フォルダ/extract_errors.csv）
        #[arg(long)]
        errors: Option<PathBuf>,

        /// 切り出し画像のCOCOデータセットを保存
        #[arg(long)]
        crop_annotations: Option<PathBuf>,

        /// 対応付けモード (fuzzy/exact/none)
        #[arg(short, long, default_value = "fuzzy")]
        match_mode: MatchMode,

        /// ファイル名規則 (id/descriptive)
        #[arg(long, default_value = "id")]
        naming: PatchNaming,

        /// 近似一致の許容誤差（省略時は設定値）
        #[arg(short, long)]
        tolerance: Option<f64>,

        /// 近似一致した候補をすべて出力（デフォルトは最初の1件）
        #[arg(long)]
        all_matches: bool,
    },

    /// パッチ画像を分類（中断しても続きから再開）
    Classify {
        /// パッチ画像フォルダ
        #[arg(short, long)]
        patches: PathBuf,

        /// 語彙を定義するCOCO JSON（categories を使用）
        #[arg(short, long)]
        annotations: PathBuf,

        /// パッチCSV（省略時はフォルダ内のファイルを数値順に分類）
        #[arg(long)]
        patch_csv: Option<PathBuf>,

        /// 出力フォルダ（デフォルト: カレント）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// バッチサイズ（省略時は設定値）
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// 進捗をリセットして最初から実行
        #[arg(long)]
        reset: bool,
    },

    /// 予測を正解アノテーションに結合してCOCO形式で出力
    Assemble {
        /// 正解アノテーション（COCO JSON、idはパッチID）
        #[arg(short, long)]
        ground_truth: PathBuf,

        /// 予測CSV（patch_id,predicted_category[,score]）
        #[arg(long, conflicts_with = "similarity", required_unless_present = "similarity")]
        predictions: Option<PathBuf>,

        /// 類似度CSV（patch_id,<カテゴリ>...）
        #[arg(long)]
        similarity: Option<PathBuf>,

        /// 出力モード (results/overwrite/dataset/paired)
        #[arg(short, long, default_value = "results")]
        mode: AssembleMode,

        /// 出力JSON
        #[arg(short, long)]
        output: PathBuf,

        /// pairedモードの正解側の出力JSON
        #[arg(long)]
        truth_output: Option<PathBuf>,
    },

    /// パッチCSVに含まれる注釈だけの正解データを作成
    GroundTruth {
        /// 元の正解アノテーション（COCO JSON）
        #[arg(short, long)]
        annotations: PathBuf,

        /// パッチCSV
        #[arg(short, long)]
        patch_csv: PathBuf,

        /// 出力JSON
        #[arg(short, long)]
        output: PathBuf,
    },

    /// 分類結果を評価
    Evaluate {
        /// 正解アノテーション（COCO JSON、idはパッチID）
        #[arg(short, long)]
        ground_truth: PathBuf,

        /// 予測CSV
        #[arg(long, conflicts_with = "similarity", required_unless_present = "similarity")]
        predictions: Option<PathBuf>,

        /// 類似度CSV（Top-k・スコアmAPも計算）
        #[arg(long)]
        similarity: Option<PathBuf>,

        /// レポート出力フォルダ（デフォルト: カレント）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// レポートのタイトル
        #[arg(short, long, default_value = "XR Interaction Evaluation")]
        title: String,

        /// Excelレポートも出力
        #[arg(long)]
        excel: bool,
    },

    /// 検出結果のカテゴリIDが正解に存在するか確認
    Check {
        /// 正解アノテーション（COCO JSON）
        #[arg(short, long)]
        ground_truth: PathBuf,

        /// 検出結果JSON
        #[arg(short, long)]
        results: PathBuf,
    },

    /// 正解をそのまま高スコアの検出結果として出力（評価器の動作確認用）
    HighMatch {
        /// 正解アノテーション（COCO JSON）
        #[arg(short, long)]
        ground_truth: PathBuf,

        /// 出力JSON
        #[arg(short, long)]
        output: PathBuf,
    },

    /// CSVの重複行を除去
    Dedup {
        /// 入力CSV
        #[arg(required = true)]
        input: PathBuf,

        /// 出力CSV（省略時は上書き）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 重複を数えるだけ（書き込まない）
        #[arg(long)]
        analyze: bool,
    },

    /// 分類の進捗カーソルを表示/削除
    Progress {
        /// 進捗ファイル（デフォルト: ./progress.txt）
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 進捗を削除
        #[arg(long)]
        clear: bool,
    },

    /// 設定を表示/編集
    Config {
        /// APIキーを設定
        #[arg(long)]
        set_api_key: Option<String>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },
}
