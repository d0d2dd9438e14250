//! アノテーションストア
//!
//! COCO形式JSONと各種CSV（パッチ・予測・類似度・エラーログ）の読み書き。
//! ここでは変換ロジックを持たず、データアクセスのみを扱う。

mod coco;
mod csv_io;

pub use coco::{load_annotations, load_json, save_json};
pub use csv_io::{
    analyze_duplicates, argmax, dedup_csv_file, ensure_parent, dedup_rows, read_error_log, read_patch_rows,
    read_prediction_rows, read_similarity_table, write_error_log, write_patch_rows, AppendCsv,
    DuplicateStats, ErrorLogEntry, SimilarityRow, SimilarityTable, ERROR_LOG_HEADER,
    PATCH_CSV_HEADER, PREDICTION_CSV_HEADER,
};
