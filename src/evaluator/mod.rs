//! 評価
//!
//! 正解アノテーション（idがパッチID）と予測CSV・類似度CSVをパッチIDで結合し、
//! 共通ライブラリの指標計算に渡す。ラベルは正解側のカテゴリ表記にそろえて比較する。
//! 同じパッチIDの行が複数あるときは最初の行だけを使う。

mod report;

pub use report::{format_text_report, write_confusion_csv, write_excel_report, write_metrics_csv, write_text_report};

use crate::store::SimilarityTable;
use std::collections::{HashMap, HashSet};
use tracing::warn;
use xr_interaction_common::metrics::{self, Metrics};
use xr_interaction_common::{normalize_label, AnnotationSet, PredictionRow};

/// Top-k Accuracy を求める k
pub const DEFAULT_TOP_K: [usize; 2] = [1, 5];

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub metrics: Metrics,
    /// 正解アノテーションが見つからなかった予測のパッチID
    pub unmatched_patch_ids: Vec<u64>,
}

/// パッチID → 正解カテゴリ名、と語彙（カテゴリの定義順）
struct TruthIndex {
    labels: HashMap<u64, String>,
    vocabulary: Vec<String>,
    canonical: HashMap<String, String>,
}

impl TruthIndex {
    fn build(ground_truth: &AnnotationSet) -> Self {
        let names = ground_truth.category_names_by_id();
        let labels = ground_truth
            .annotations
            .iter()
            .filter_map(|ann| names.get(&ann.category_id).map(|name| (ann.id, name.to_string())))
            .collect();

        let vocabulary = ground_truth.vocabulary();
        let canonical = vocabulary
            .iter()
            .map(|label| (normalize_label(label), label.clone()))
            .collect();

        Self {
            labels,
            vocabulary,
            canonical,
        }
    }

    /// 語彙にあれば語彙側の表記、なければ正規化したまま
    fn canonicalize(&self, label: &str) -> String {
        let normalized = normalize_label(label);
        self.canonical.get(&normalized).cloned().unwrap_or(normalized)
    }
}

/// パッチIDごとに最初の行だけを残す（順序は維持）
fn first_per_patch<'a, T>(rows: impl IntoIterator<Item = &'a T>, patch_id: impl Fn(&T) -> u64) -> Vec<&'a T>
where
    T: 'a,
{
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut repeated = 0usize;
    for row in rows {
        if seen.insert(patch_id(row)) {
            kept.push(row);
        } else {
            repeated += 1;
        }
    }
    if repeated > 0 {
        warn!("同じパッチIDの行が{}件重複しています（最初の行を使用）", repeated);
    }
    kept
}

/// 予測CSV（ラベル）を評価
pub fn evaluate_predictions(ground_truth: &AnnotationSet, rows: &[PredictionRow]) -> Evaluation {
    let index = TruthIndex::build(ground_truth);

    let mut truths = Vec::new();
    let mut predictions = Vec::new();
    let mut unmatched_patch_ids = Vec::new();

    for row in first_per_patch(rows, |r| r.patch_id) {
        match index.labels.get(&row.patch_id) {
            Some(truth) => {
                truths.push(truth.clone());
                predictions.push(index.canonicalize(&row.predicted_category));
            }
            None => unmatched_patch_ids.push(row.patch_id),
        }
    }

    if !unmatched_patch_ids.is_empty() {
        warn!("正解のない予測が{}件あります", unmatched_patch_ids.len());
    }

    Evaluation {
        metrics: metrics::evaluate(&truths, &predictions, &index.vocabulary),
        unmatched_patch_ids,
    }
}

/// 類似度CSV（スコア分布）を評価
///
/// 予測ラベルは各行の最大スコアのカテゴリ。スコア列は正解の語彙順に並べ替え、
/// 類似度CSVにないカテゴリのスコアは最小値とする。
pub fn evaluate_similarity(ground_truth: &AnnotationSet, table: &SimilarityTable, ks: &[usize]) -> Evaluation {
    let index = TruthIndex::build(ground_truth);

    let columns: Vec<Option<usize>> = index
        .vocabulary
        .iter()
        .map(|label| {
            let target = normalize_label(label);
            table.categories.iter().position(|c| normalize_label(c) == target)
        })
        .collect();
    for (label, column) in index.vocabulary.iter().zip(&columns) {
        if column.is_none() {
            warn!("類似度CSVにカテゴリ '{}' の列がありません", label);
        }
    }

    let mut truths = Vec::new();
    let mut predictions = Vec::new();
    let mut scores = Vec::new();
    let mut unmatched_patch_ids = Vec::new();

    for row in first_per_patch(&table.rows, |r| r.patch_id) {
        let Some(truth) = index.labels.get(&row.patch_id) else {
            unmatched_patch_ids.push(row.patch_id);
            continue;
        };

        let predicted = table
            .top1(row)
            .map(|(label, _)| index.canonicalize(label))
            .unwrap_or_default();

        let reordered: Vec<f32> = columns
            .iter()
            .map(|c| c.and_then(|i| row.scores.get(i).copied()).unwrap_or(f32::MIN))
            .collect();

        truths.push(truth.clone());
        predictions.push(predicted);
        scores.push(reordered);
    }

    if !unmatched_patch_ids.is_empty() {
        warn!("正解のない類似度行が{}件あります", unmatched_patch_ids.len());
    }

    Evaluation {
        metrics: metrics::evaluate_with_scores(&truths, &predictions, &scores, &index.vocabulary, ks),
        unmatched_patch_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SimilarityRow;
    use xr_interaction_common::{Annotation, BBox, Category};

    fn ground_truth(labels: &[u64]) -> AnnotationSet {
        AnnotationSet {
            images: vec![],
            categories: vec![
                Category { id: 1, name: "grab".into(), supercategory: None },
                Category { id: 2, name: "shoot".into(), supercategory: None },
                Category { id: 3, name: "open".into(), supercategory: None },
                Category { id: 4, name: "push".into(), supercategory: None },
                Category { id: 5, name: "Turn".into(), supercategory: None },
            ],
            annotations: labels
                .iter()
                .enumerate()
                .map(|(i, &category_id)| Annotation {
                    id: i as u64 + 1,
                    image_id: 1,
                    category_id,
                    bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
                    area: 1.0,
                    iscrowd: 0,
                    segmentation: None,
                })
                .collect(),
        }
    }

    fn row(patch_id: u64, label: &str) -> PredictionRow {
        PredictionRow {
            patch_id,
            predicted_category: label.into(),
            score: None,
        }
    }

    #[test]
    fn test_all_correct() {
        let gt = ground_truth(&[1, 2, 3, 4, 5]);
        let rows = vec![row(1, "grab"), row(2, "shoot"), row(3, "open"), row(4, "push"), row(5, "turn")];

        let evaluation = evaluate_predictions(&gt, &rows);
        assert_eq!(evaluation.metrics.accuracy, 1.0);
        assert_eq!(evaluation.metrics.f1, 1.0);
        assert_eq!(evaluation.metrics.map, 1.0);
        assert_eq!(evaluation.metrics.confusion.trace(), 5);
    }

    #[test]
    fn test_all_wrong_five_categories() {
        let gt = ground_truth(&[1, 2, 3, 4, 5]);
        let rows = vec![row(1, "shoot"), row(2, "open"), row(3, "push"), row(4, "turn"), row(5, "grab")];

        let evaluation = evaluate_predictions(&gt, &rows);
        assert_eq!(evaluation.metrics.accuracy, 0.0);
        assert_eq!(evaluation.metrics.f1, 0.0);
        assert_eq!(evaluation.metrics.confusion.get("grab", "shoot"), Some(1));
    }

    #[test]
    fn test_unpredicted_category_contributes_zero_f1() {
        // open は一度も予測されない
        let gt = ground_truth(&[1, 1, 3]);
        let rows = vec![row(1, "grab"), row(2, "grab"), row(3, "grab")];

        let evaluation = evaluate_predictions(&gt, &rows);
        let open = evaluation
            .metrics
            .per_class
            .iter()
            .find(|c| c.label == "open")
            .unwrap();
        assert_eq!(open.f1, 0.0);
        // grab: P=2/3, R=1, F1=0.8 / open: 0 → マクロ平均0.4
        assert!((evaluation.metrics.f1 - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_without_truth_is_reported() {
        let gt = ground_truth(&[1]);
        let rows = vec![row(1, "grab"), row(99, "grab")];

        let evaluation = evaluate_predictions(&gt, &rows);
        assert_eq!(evaluation.unmatched_patch_ids, vec![99]);
        assert_eq!(evaluation.metrics.samples, 1);
    }

    #[test]
    fn test_repeated_patch_id_counts_once() {
        let gt = ground_truth(&[1, 2]);
        let rows = vec![row(1, "grab"), row(2, "grab"), row(1, "grab")];

        let evaluation = evaluate_predictions(&gt, &rows);
        assert_eq!(evaluation.metrics.samples, 2);
        assert_eq!(evaluation.metrics.accuracy, 0.5);
        assert_eq!(evaluation.metrics.confusion.get("grab", "grab"), Some(1));
    }

    #[test]
    fn test_repeated_similarity_row_keeps_first() {
        let gt = ground_truth(&[1]);
        let table = SimilarityTable {
            categories: vec!["grab".into(), "shoot".into()],
            rows: vec![
                SimilarityRow { patch_id: 1, scores: vec![0.9, 0.1] },
                SimilarityRow { patch_id: 1, scores: vec![0.1, 0.9] },
            ],
        };

        let evaluation = evaluate_similarity(&gt, &table, &DEFAULT_TOP_K);
        assert_eq!(evaluation.metrics.samples, 1);
        assert_eq!(evaluation.metrics.accuracy, 1.0);
    }

    #[test]
    fn test_evaluate_similarity_top_k() {
        let gt = ground_truth(&[1, 2]);
        // 列順は正解の語彙順と異なる
        let table = SimilarityTable {
            categories: vec!["shoot".into(), "grab".into(), "open".into(), "push".into(), "turn".into()],
            rows: vec![
                SimilarityRow { patch_id: 1, scores: vec![0.1, 0.9, 0.0, 0.0, 0.0] },
                SimilarityRow { patch_id: 2, scores: vec![0.3, 0.1, 0.5, 0.0, 0.0] },
            ],
        };

        let evaluation = evaluate_similarity(&gt, &table, &DEFAULT_TOP_K);
        let metrics = &evaluation.metrics;
        assert_eq!(metrics.accuracy, 0.5);
        assert_eq!(metrics.top_k, vec![(1, 0.5), (5, 1.0)]);
        assert!(metrics.score_map.is_some());
        assert_eq!(metrics.confusion.get("shoot", "open"), Some(1));
    }
}
