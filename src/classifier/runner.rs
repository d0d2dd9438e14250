//! 再開可能な分類ループ
//!
//! 固定サイズのバッチごとに分類し、1件ごとに結果を追記してから進捗カーソルを進める。

use super::progress::ProgressCursor;
use super::{ClassifyOutcome, PatchClassifier, PatchInput, SkipReason};
use crate::error::Result;
use crate::logging::create_progress_bar;
use crate::scanner::{PatchFile, PatchIndex, PatchLookup};
use crate::store::{AppendCsv, ERROR_LOG_HEADER, PREDICTION_CSV_HEADER};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use xr_interaction_common::{normalize_label, PatchRow};

/// 分類対象の1件
#[derive(Debug, Clone, PartialEq)]
pub struct PatchJob {
    pub patch_id: u64,
    pub semantic_category: String,
    /// 正解ラベル（パッチCSVから作った場合のみ）
    pub ground_truth: Option<String>,
}

/// パッチCSVの行順に分類対象を作る
pub fn jobs_from_patch_rows(rows: &[PatchRow]) -> Vec<PatchJob> {
    rows.iter()
        .map(|row| PatchJob {
            patch_id: row.patch_id,
            semantic_category: row.semantic_category.clone(),
            ground_truth: Some(row.interaction_category.clone()),
        })
        .collect()
}

/// パッチフォルダのファイル順に分類対象を作る（IDを読めないファイルは除外）
pub fn jobs_from_folder(files: &[PatchFile]) -> Vec<PatchJob> {
    files
        .iter()
        .filter_map(|f| {
            f.patch_id.map(|patch_id| PatchJob {
                patch_id,
                semantic_category: String::new(),
                ground_truth: None,
            })
        })
        .collect()
}

/// 分類結果の出力先
#[derive(Debug, Clone)]
pub struct RunOutputs {
    pub predictions: PathBuf,
    /// スコア分布を出力する場合のみ
    pub similarity: Option<PathBuf>,
    pub errors: PathBuf,
    pub progress: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    /// 再開位置
    pub start_index: usize,
    pub processed: usize,
    pub succeeded: usize,
    /// 理由ごとのスキップ件数
    pub skipped: BTreeMap<&'static str, usize>,
    pub labelled: usize,
    pub correct: usize,
}

impl RunSummary {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    /// 正解つきの項目に対する正解率
    pub fn accuracy(&self) -> Option<f64> {
        if self.labelled == 0 {
            None
        } else {
            Some(self.correct as f64 / self.labelled as f64)
        }
    }
}

struct Sinks {
    predictions: AppendCsv,
    similarity: Option<AppendCsv>,
    errors: AppendCsv,
}

impl Sinks {
    fn open(outputs: &RunOutputs, vocabulary: &[String]) -> Result<Self> {
        let similarity = match &outputs.similarity {
            Some(path) => {
                let header = std::iter::once("patch_id").chain(vocabulary.iter().map(String::as_str));
                Some(AppendCsv::open(path, header)?)
            }
            None => None,
        };

        Ok(Self {
            predictions: AppendCsv::open(&outputs.predictions, PREDICTION_CSV_HEADER)?,
            similarity,
            errors: AppendCsv::open(&outputs.errors, ERROR_LOG_HEADER)?,
        })
    }

    fn record(&mut self, job: &PatchJob, outcome: &ClassifyOutcome) -> Result<()> {
        let patch_id = job.patch_id.to_string();
        match outcome {
            Ok(classification) => {
                let score = classification.score.map(|s| s.to_string()).unwrap_or_default();
                self.predictions
                    .append([patch_id.as_str(), classification.label.as_str(), score.as_str()])?;

                if let (Some(sink), Some(scores)) = (self.similarity.as_mut(), &classification.scores) {
                    let record = std::iter::once(patch_id.clone()).chain(scores.iter().map(|s| s.to_string()));
                    sink.append(record)?;
                }
            }
            Err(reason) => {
                let detail = reason.to_string();
                self.errors.append([patch_id.as_str(), reason.kind(), detail.as_str()])?;
            }
        }
        Ok(())
    }
}

fn resolve_job(job: &PatchJob, index: &PatchIndex) -> std::result::Result<PatchInput, SkipReason> {
    match index.resolve(job.patch_id) {
        PatchLookup::Found(path) => Ok(PatchInput {
            patch_id: job.patch_id,
            semantic_category: job.semantic_category.clone(),
            path,
        }),
        PatchLookup::Missing => Err(SkipReason::MissingImage),
        PatchLookup::Ambiguous(paths) => Err(SkipReason::AmbiguousImage(paths)),
    }
}

/// 分類を実行
///
/// 進捗カーソルの位置から再開し、各項目の結果を追記した直後にカーソルを保存する。
/// 項目単位の失敗はエラーログに書いて続行し、ファイル書き込みの失敗だけを `Err` で返す。
pub async fn run_classification<C: PatchClassifier>(
    classifier: &C,
    jobs: &[PatchJob],
    index: &PatchIndex,
    outputs: &RunOutputs,
    batch_size: usize,
) -> Result<RunSummary> {
    let mut cursor = ProgressCursor::load(&outputs.progress);
    let start = cursor.next_index().min(jobs.len());
    if start > 0 {
        info!("{}件目から再開します（全{}件）", start, jobs.len());
    }

    let mut sinks = Sinks::open(outputs, classifier.vocabulary())?;
    let mut summary = RunSummary {
        total: jobs.len(),
        start_index: start,
        ..Default::default()
    };

    let remaining = &jobs[start..];
    let pb = create_progress_bar(remaining.len() as u64, "classify");

    for (batch_idx, batch) in remaining.chunks(batch_size.max(1)).enumerate() {
        debug!("バッチ {}: {}件", batch_idx + 1, batch.len());
        let batch_start = start + batch_idx * batch_size.max(1);

        // 画像が引けない項目は分類器に渡さない
        let resolved: Vec<std::result::Result<PatchInput, SkipReason>> =
            batch.iter().map(|job| resolve_job(job, index)).collect();
        let inputs: Vec<PatchInput> = resolved.iter().filter_map(|r| r.as_ref().ok().cloned()).collect();

        let mut classified = classifier.classify_batch(&inputs).await.into_iter();

        for (offset, (job, resolution)) in batch.iter().zip(resolved).enumerate() {
            let outcome: ClassifyOutcome = match resolution {
                Ok(_) => classified
                    .next()
                    .unwrap_or_else(|| Err(SkipReason::Backend("結果がありません".into()))),
                Err(reason) => Err(reason),
            };

            sinks.record(job, &outcome)?;

            summary.processed += 1;
            match &outcome {
                Ok(classification) => {
                    summary.succeeded += 1;
                    if let Some(truth) = &job.ground_truth {
                        summary.labelled += 1;
                        if normalize_label(truth) == normalize_label(&classification.label) {
                            summary.correct += 1;
                        }
                    }
                }
                Err(reason) => {
                    warn!("patch {} をスキップ: {}", job.patch_id, reason);
                    *summary.skipped.entry(reason.kind()).or_default() += 1;
                }
            }

            cursor.set(batch_start + offset + 1)?;
            pb.inc(1);
        }
    }

    pb.finish_and_clear();

    info!(
        "分類完了: processed={} succeeded={} skipped={}",
        summary.processed,
        summary.succeeded,
        summary.skipped_total()
    );

    Ok(summary)
}
