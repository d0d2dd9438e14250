//! CSVの読み書き
//!
//! パッチCSV・予測CSV・類似度CSV・エラーログと、重複除去・追記ライタ。

use crate::error::{InteractionError, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::hash::Hash;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use xr_interaction_common::{PatchRow, PredictionRow};

pub const PATCH_CSV_HEADER: [&str; 5] = [
    "patch_id",
    "original_image_id",
    "interaction_category",
    "semantic_category",
    "interaction_bbox",
];
pub const PREDICTION_CSV_HEADER: [&str; 3] = ["patch_id", "predicted_category", "score"];
pub const ERROR_LOG_HEADER: [&str; 3] = ["patch_id", "reason", "detail"];

const ERROR_LOG_TOTAL_PREFIX: &str = "# total unmatched:";

/// エラーログの1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub patch_id: Option<u64>,
    pub reason: String,
    pub detail: String,
}

impl ErrorLogEntry {
    pub fn new(patch_id: Option<u64>, reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            patch_id,
            reason: reason.into(),
            detail: detail.into(),
        }
    }
}

/// 重複行の集計
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateStats {
    pub total: usize,
    pub duplicates: usize,
}

impl DuplicateStats {
    pub fn unique(&self) -> usize {
        self.total - self.duplicates
    }
}

/// 類似度CSVの1行
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityRow {
    pub patch_id: u64,
    pub scores: Vec<f32>,
}

/// 類似度CSV全体（列順 = カテゴリ順）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilarityTable {
    pub categories: Vec<String>,
    pub rows: Vec<SimilarityRow>,
}

impl SimilarityTable {
    /// 行ごとの最大スコアのカテゴリとスコア
    pub fn top1(&self, row: &SimilarityRow) -> Option<(&str, f32)> {
        argmax(&row.scores).and_then(|i| self.categories.get(i).map(|c| (c.as_str(), row.scores[i])))
    }
}

/// 最大スコアのインデックス（同点は先頭）
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
}

/// 親ディレクトリがなければ作成
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn require_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(InteractionError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

/// パッチCSVを書き出し（ヘッダは行が0件でも出力）
pub fn write_patch_rows(path: &Path, rows: &[PatchRow]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(PATCH_CSV_HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_patch_rows(path: &Path) -> Result<Vec<PatchRow>> {
    require_file(path)?;
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<PatchRow>, _>>()?;
    Ok(rows)
}

/// 予測CSVを読み込み（score列は省略可）
pub fn read_prediction_rows(path: &Path) -> Result<Vec<PredictionRow>> {
    require_file(path)?;
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<PredictionRow>, _>>()?;
    Ok(rows)
}

/// 類似度CSVを読み込み
pub fn read_similarity_table(path: &Path) -> Result<SimilarityTable> {
    require_file(path)?;
    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.get(0) != Some("patch_id") {
        return Err(InteractionError::InvalidAnnotations(format!(
            "{}: 1列目は patch_id である必要があります",
            path.display()
        )));
    }
    let categories: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(parse_similarity_record(&record, categories.len())?);
    }

    Ok(SimilarityTable { categories, rows })
}

fn parse_similarity_record(record: &StringRecord, width: usize) -> Result<SimilarityRow> {
    let patch_id = record
        .get(0)
        .unwrap_or_default()
        .trim()
        .parse::<u64>()
        .map_err(|e| InteractionError::InvalidAnnotations(format!("patch_id が不正: {}", e)))?;

    let scores = record
        .iter()
        .skip(1)
        .map(|v| {
            let score = v.trim().parse::<f32>().map_err(|e| {
                InteractionError::InvalidAnnotations(format!("patch {} のスコアが不正 '{}': {}", patch_id, v, e))
            })?;
            if !score.is_finite() {
                return Err(InteractionError::InvalidAnnotations(format!(
                    "patch {} のスコアが有限値ではありません: '{}'",
                    patch_id, v
                )));
            }
            Ok(score)
        })
        .collect::<Result<Vec<f32>>>()?;

    if scores.len() != width {
        return Err(InteractionError::InvalidAnnotations(format!(
            "patch {} のスコア列数 {} がカテゴリ数 {} と一致しません",
            patch_id,
            scores.len(),
            width
        )));
    }

    Ok(SimilarityRow { patch_id, scores })
}

/// エラーログを書き出し
///
/// 1行目は `# total unmatched: N`、2行目以降はCSV。
pub fn write_error_log(path: &Path, total_unmatched: usize, entries: &[ErrorLogEntry]) -> Result<()> {
    ensure_parent(path)?;
    let mut file = File::create(path)?;
    writeln!(file, "{} {}", ERROR_LOG_TOTAL_PREFIX, total_unmatched)?;

    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(ERROR_LOG_HEADER)?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

/// エラーログを読み込み（集計行がなければ合計は `None`）
pub fn read_error_log(path: &Path) -> Result<(Option<usize>, Vec<ErrorLogEntry>)> {
    require_file(path)?;

    let mut first_line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first_line)?;
    let total = first_line
        .trim()
        .strip_prefix(ERROR_LOG_TOTAL_PREFIX)
        .and_then(|n| n.trim().parse::<usize>().ok());

    let mut reader = ReaderBuilder::new().comment(Some(b'#')).from_path(path)?;
    let entries = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ErrorLogEntry>, _>>()?;
    Ok((total, entries))
}

/// 完全一致の重複を除去（最初の出現順を保持）
pub fn dedup_rows<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(key(row))).collect()
}

fn read_records(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    require_file(path)?;
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((headers, records))
}

fn record_key(record: &StringRecord) -> Vec<String> {
    record.iter().map(str::to_string).collect()
}

/// CSVファイルの重複行を除去して `output` に書き出し
///
/// `output` は `input` と同じパスでもよい。結果に再適用しても変化しない。
pub fn dedup_csv_file(input: &Path, output: &Path) -> Result<DuplicateStats> {
    let (headers, records) = read_records(input)?;
    let total = records.len();
    let unique = dedup_rows(records, record_key);

    ensure_parent(output)?;
    let mut writer = WriterBuilder::new().has_headers(false).from_path(output)?;
    writer.write_record(&headers)?;
    for record in &unique {
        writer.write_record(record)?;
    }
    writer.flush()?;

    Ok(DuplicateStats {
        total,
        duplicates: total - unique.len(),
    })
}

/// CSVファイルの重複行数を集計
pub fn analyze_duplicates(path: &Path) -> Result<DuplicateStats> {
    let (_, records) = read_records(path)?;
    let total = records.len();
    let unique = dedup_rows(records, record_key).len();
    Ok(DuplicateStats {
        total,
        duplicates: total - unique,
    })
}

/// 追記モードのCSVライタ
///
/// ファイルが空のときだけヘッダを書き、1レコードごとにflushする。
pub struct AppendCsv {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl AppendCsv {
    pub fn open<I, T>(path: &Path, header: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        ensure_parent(path)?;
        let is_empty = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_empty {
            writer.write_record(header)?;
            writer.flush()?;
        }

        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn append<I, T>(&mut self, record: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(record)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn append_row<S: Serialize>(&mut self, row: &S) -> Result<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
