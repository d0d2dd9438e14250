//! 予測結果の組み立て
//!
//! パッチIDで正解アノテーションと予測を突き合わせ、COCO結果形式や
//! カテゴリを書き換えたデータセットを作る。

use crate::store::SimilarityTable;
use clap::ValueEnum;
use std::collections::{HashMap, HashSet};
use tracing::warn;
use xr_interaction_common::{
    normalize_label, AnnotationSet, DetectionResult, GroundTruthEntry, PatchRow, Prediction,
    PredictionRow, ScoredAnnotation, ScoredDataset,
};

/// 外部評価器の検証用に正解をコピーするときのスコア
pub const HIGH_MATCH_SCORE: f64 = 0.99;

/// ラベル予測（チャット分類など）にスコアがない場合のスコア
pub const DEFAULT_LABEL_SCORE: f64 = 1.0;

/// 組み立てモード
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum AssembleMode {
    /// `{image_id, category_id, bbox, score}` のリスト
    #[default]
    Results,
    /// 正解データセットのカテゴリを上書き
    Overwrite,
    /// 画像・カテゴリを含むスコア付きデータセット
    Dataset,
    /// 正解と予測の対
    Paired,
}

/// カテゴリIDに解決した予測と、解決できなかったラベル
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPredictions {
    pub predictions: Vec<Prediction>,
    pub unresolved: Vec<(u64, String)>,
}

fn category_lookup(categories: &AnnotationSet) -> HashMap<String, (u64, &str)> {
    let mut lookup = HashMap::new();
    for category in &categories.categories {
        lookup
            .entry(normalize_label(&category.name))
            .or_insert((category.id, category.name.as_str()));
    }
    lookup
}

fn resolve<I>(categories: &AnnotationSet, items: I) -> ResolvedPredictions
where
    I: IntoIterator<Item = (u64, String, f64)>,
{
    let lookup = category_lookup(categories);
    let mut resolved = ResolvedPredictions::default();

    for (patch_id, label, score) in items {
        match lookup.get(&normalize_label(&label)) {
            Some(&(category_id, name)) => resolved.predictions.push(Prediction {
                patch_id,
                category_id,
                category_name: name.to_string(),
                score,
            }),
            None => {
                warn!("patch {}: カテゴリ '{}' が見つかりません", patch_id, label);
                resolved.unresolved.push((patch_id, label));
            }
        }
    }

    resolved
}

/// 類似度CSVの各行から最大スコアのカテゴリを予測とする
pub fn predictions_from_similarity(table: &SimilarityTable, categories: &AnnotationSet) -> ResolvedPredictions {
    let items = table.rows.iter().filter_map(|row| {
        table
            .top1(row)
            .map(|(label, score)| (row.patch_id, label.to_string(), score as f64))
    });
    resolve(categories, items)
}

/// 予測CSVの各行を予測とする（スコアがなければ `default_score`）
pub fn predictions_from_labels(
    rows: &[PredictionRow],
    categories: &AnnotationSet,
    default_score: f64,
) -> ResolvedPredictions {
    let items = rows.iter().map(|row| {
        (
            row.patch_id,
            row.predicted_category.clone(),
            row.score.unwrap_or(default_score),
        )
    });
    resolve(categories, items)
}

/// パッチID → 予測（同じIDは最初の予測を使う）
fn index_predictions(predictions: &[Prediction]) -> HashMap<u64, &Prediction> {
    let mut index = HashMap::new();
    for prediction in predictions {
        index.entry(prediction.patch_id).or_insert(prediction);
    }
    index
}

/// 予測のある正解アノテーションごとに検出結果を作る（予測のない注釈は出力しない）
pub fn assemble_results(ground_truth: &AnnotationSet, predictions: &[Prediction]) -> Vec<DetectionResult> {
    let index = index_predictions(predictions);
    ground_truth
        .annotations
        .iter()
        .filter_map(|ann| {
            index.get(&ann.id).map(|p| DetectionResult {
                image_id: ann.image_id,
                category_id: p.category_id,
                bbox: ann.bbox,
                score: p.score,
            })
        })
        .collect()
}

/// 予測のある正解アノテーションの category_id を書き換え、書き換えた件数を返す
pub fn overwrite_categories(ground_truth: &mut AnnotationSet, predictions: &[Prediction]) -> usize {
    let index = index_predictions(predictions);
    let mut replaced = 0;
    for ann in &mut ground_truth.annotations {
        if let Some(p) = index.get(&ann.id) {
            ann.category_id = p.category_id;
            replaced += 1;
        }
    }
    replaced
}

/// 画像・カテゴリを保持したまま、予測のある注釈だけをスコア付きで格納
pub fn assemble_scored_dataset(ground_truth: &AnnotationSet, predictions: &[Prediction]) -> ScoredDataset {
    let index = index_predictions(predictions);
    let annotations = ground_truth
        .annotations
        .iter()
        .filter_map(|ann| {
            index.get(&ann.id).map(|p| ScoredAnnotation {
                id: ann.id,
                image_id: ann.image_id,
                category_id: p.category_id,
                bbox: ann.bbox,
                score: p.score,
            })
        })
        .collect();

    ScoredDataset {
        images: ground_truth.images.clone(),
        categories: ground_truth.categories.clone(),
        annotations,
    }
}

/// 同じ注釈について正解エントリと予測エントリを同じ順序で作る
pub fn assemble_paired(
    ground_truth: &AnnotationSet,
    predictions: &[Prediction],
) -> (Vec<GroundTruthEntry>, Vec<DetectionResult>) {
    let index = index_predictions(predictions);
    ground_truth
        .annotations
        .iter()
        .filter_map(|ann| {
            index.get(&ann.id).map(|p| {
                (
                    GroundTruthEntry {
                        image_id: ann.image_id,
                        category_id: ann.category_id,
                        bbox: ann.bbox,
                        iscrowd: ann.iscrowd,
                    },
                    DetectionResult {
                        image_id: ann.image_id,
                        category_id: p.category_id,
                        bbox: ann.bbox,
                        score: p.score,
                    },
                )
            })
        })
        .unzip()
}

/// パッチCSVに現れる `(id, image_id)` の注釈だけを残す（画像・カテゴリはそのまま）
pub fn filter_ground_truth(ground_truth: &AnnotationSet, rows: &[PatchRow]) -> AnnotationSet {
    let keep: HashSet<(u64, u64)> = rows
        .iter()
        .map(|r| (r.patch_id, r.original_image_id))
        .collect();

    AnnotationSet {
        images: ground_truth.images.clone(),
        categories: ground_truth.categories.clone(),
        annotations: ground_truth
            .annotations
            .iter()
            .filter(|ann| keep.contains(&(ann.id, ann.image_id)))
            .cloned()
            .collect(),
    }
}

/// 正解をそのまま高スコアの検出結果にする
pub fn high_match_results(ground_truth: &AnnotationSet) -> Vec<DetectionResult> {
    ground_truth
        .annotations
        .iter()
        .map(|ann| DetectionResult {
            image_id: ann.image_id,
            category_id: ann.category_id,
            bbox: ann.bbox,
            score: HIGH_MATCH_SCORE,
        })
        .collect()
}

/// 検出結果が使っているが正解のカテゴリに存在しないIDの一覧（昇順）
pub fn missing_category_ids(results: &[DetectionResult], ground_truth: &AnnotationSet) -> Vec<u64> {
    let known: HashSet<u64> = ground_truth.categories.iter().map(|c| c.id).collect();
    let mut missing: Vec<u64> = results
        .iter()
        .map(|r| r.category_id)
        .filter(|id| !known.contains(id))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    missing.sort_unstable();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SimilarityRow;
    use xr_interaction_common::{Annotation, BBox, Category, ImageEntry};

    fn ann(id: u64, image_id: u64, category_id: u64) -> Annotation {
        Annotation {
            id,
            image_id,
            category_id,
            bbox: BBox::new(id as f64, 0.0, 10.0, 10.0),
            area: 100.0,
            iscrowd: 0,
            segmentation: None,
        }
    }

    fn ground_truth() -> AnnotationSet {
        AnnotationSet {
            images: vec![ImageEntry { id: 1, file_name: "a.jpg".into(), width: 100, height: 100 }],
            categories: vec![
                Category { id: 1, name: "grab".into(), supercategory: None },
                Category { id: 2, name: "Shoot".into(), supercategory: None },
            ],
            annotations: vec![ann(10, 1, 1), ann(11, 1, 2), ann(12, 1, 1)],
        }
    }

    fn prediction(patch_id: u64, category_id: u64, score: f64) -> Prediction {
        Prediction {
            patch_id,
            category_id,
            category_name: String::new(),
            score,
        }
    }

    #[test]
    fn test_predictions_from_labels_case_insensitive() {
        let rows = vec![
            PredictionRow { patch_id: 10, predicted_category: "shoot".into(), score: None },
            PredictionRow { patch_id: 11, predicted_category: "grab".into(), score: Some(0.4) },
            PredictionRow { patch_id: 12, predicted_category: "throw".into(), score: None },
        ];

        let resolved = predictions_from_labels(&rows, &ground_truth(), DEFAULT_LABEL_SCORE);
        assert_eq!(resolved.predictions.len(), 2);
        assert_eq!(resolved.predictions[0].category_id, 2);
        assert_eq!(resolved.predictions[0].category_name, "Shoot");
        assert_eq!(resolved.predictions[0].score, 1.0);
        assert_eq!(resolved.predictions[1].score, 0.4);
        assert_eq!(resolved.unresolved, vec![(12, "throw".to_string())]);
    }

    #[test]
    fn test_predictions_from_similarity_top1() {
        let table = SimilarityTable {
            categories: vec!["grab".into(), "Shoot".into()],
            rows: vec![
                SimilarityRow { patch_id: 10, scores: vec![0.2, 0.7] },
                SimilarityRow { patch_id: 11, scores: vec![0.6, 0.1] },
            ],
        };

        let resolved = predictions_from_similarity(&table, &ground_truth());
        assert_eq!(resolved.predictions[0].category_id, 2);
        assert!((resolved.predictions[0].score - 0.7).abs() < 1e-6);
        assert_eq!(resolved.predictions[1].category_id, 1);
    }

    #[test]
    fn test_assemble_results_omits_unpredicted() {
        let preds = vec![prediction(12, 2, 0.8), prediction(10, 1, 0.5)];
        let results = assemble_results(&ground_truth(), &preds);

        assert_eq!(results.len(), 2);
        // 正解アノテーションの順序
        assert_eq!(results[0].bbox, BBox::new(10.0, 0.0, 10.0, 10.0));
        assert_eq!(results[1].category_id, 2);
        assert_eq!(results[1].score, 0.8);
    }

    #[test]
    fn test_first_prediction_wins_for_duplicate_ids() {
        let preds = vec![prediction(10, 2, 0.9), prediction(10, 1, 0.1)];
        let results = assemble_results(&ground_truth(), &preds);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].category_id, 2);
    }

    #[test]
    fn test_overwrite_categories_in_place() {
        let mut gt = ground_truth();
        let replaced = overwrite_categories(&mut gt, &[prediction(10, 2, 1.0)]);

        assert_eq!(replaced, 1);
        assert_eq!(gt.annotations[0].category_id, 2);
        assert_eq!(gt.annotations[1].category_id, 2);
        assert_eq!(gt.annotations[2].category_id, 1);
        assert_eq!(gt.annotations.len(), 3);
    }

    #[test]
    fn test_assemble_scored_dataset_keeps_ids() {
        let dataset = assemble_scored_dataset(&ground_truth(), &[prediction(11, 1, 0.3)]);
        assert_eq!(dataset.images.len(), 1);
        assert_eq!(dataset.categories.len(), 2);
        assert_eq!(dataset.annotations.len(), 1);
        assert_eq!(dataset.annotations[0].id, 11);
        assert_eq!(dataset.annotations[0].category_id, 1);
    }

    #[test]
    fn test_assemble_paired_aligned() {
        let (truths, preds) = assemble_paired(&ground_truth(), &[prediction(11, 1, 1.0), prediction(12, 1, 1.0)]);
        assert_eq!(truths.len(), 2);
        assert_eq!(truths[0].category_id, 2);
        assert_eq!(preds[0].category_id, 1);
        assert_eq!(truths[1].bbox, preds[1].bbox);
    }

    #[test]
    fn test_filter_ground_truth_by_patch_rows() {
        let rows = vec![
            PatchRow {
                patch_id: 11,
                original_image_id: 1,
                interaction_category: "Shoot".into(),
                semantic_category: String::new(),
                interaction_bbox: BBox::new(11.0, 0.0, 10.0, 10.0),
            },
            // image_id が違うので対象外
            PatchRow {
                patch_id: 12,
                original_image_id: 2,
                interaction_category: "grab".into(),
                semantic_category: String::new(),
                interaction_bbox: BBox::new(12.0, 0.0, 10.0, 10.0),
            },
        ];

        let filtered = filter_ground_truth(&ground_truth(), &rows);
        assert_eq!(filtered.annotations.len(), 1);
        assert_eq!(filtered.annotations[0].id, 11);
        assert_eq!(filtered.images.len(), 1);
    }

    #[test]
    fn test_high_match_results() {
        let results = high_match_results(&ground_truth());
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.score == HIGH_MATCH_SCORE));
        assert_eq!(results[1].category_id, 2);
    }

    #[test]
    fn test_missing_category_ids() {
        let results = vec![
            DetectionResult { image_id: 1, category_id: 7, bbox: BBox::default(), score: 1.0 },
            DetectionResult { image_id: 1, category_id: 1, bbox: BBox::default(), score: 1.0 },
            DetectionResult { image_id: 1, category_id: 3, bbox: BBox::default(), score: 1.0 },
            DetectionResult { image_id: 1, category_id: 7, bbox: BBox::default(), score: 1.0 },
        ];
        assert_eq!(missing_category_ids(&results, &ground_truth()), vec![3, 7]);
    }
}
