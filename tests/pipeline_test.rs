//! 予測CSVからCOCO結果・評価レポートまでの結合テスト

use serde_json::json;
use std::path::Path;
use tempfile::tempdir;
use xr_interaction::{assembler, evaluator, store};
use xr_interaction_common::{AnnotationSet, DetectionResult, GroundTruthEntry, ScoredDataset};

/// パッチID 1..=4 の正解（grab, grab, shoot, open）
fn write_ground_truth(path: &Path) {
    let value = json!({
        "images": [{ "id": 7, "file_name": "frame.png", "width": 640, "height": 480 }],
        "categories": [
            { "id": 1, "name": "grab" },
            { "id": 2, "name": "shoot" },
            { "id": 3, "name": "open" }
        ],
        "annotations": [
            { "id": 1, "image_id": 7, "category_id": 1, "bbox": [0, 0, 10, 10], "area": 100, "iscrowd": 0 },
            { "id": 2, "image_id": 7, "category_id": 1, "bbox": [10, 0, 10, 10], "area": 100, "iscrowd": 0 },
            { "id": 3, "image_id": 7, "category_id": 2, "bbox": [20, 0, 10, 10], "area": 100, "iscrowd": 0 },
            { "id": 4, "image_id": 7, "category_id": 3, "bbox": [30, 0, 10, 10], "area": 100, "iscrowd": 0 }
        ]
    });
    std::fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
}

const PREDICTIONS: &str = "patch_id,predicted_category,score\n1,grab,0.9\n2,Shoot,0.6\n3,shoot,\n5,grab,0.8\n";

fn setup(root: &Path) -> AnnotationSet {
    write_ground_truth(&root.join("gt.json"));
    std::fs::write(root.join("predictions.csv"), PREDICTIONS).unwrap();
    store::load_annotations(&root.join("gt.json")).unwrap()
}

#[test]
fn test_results_mode_uses_ground_truth_geometry() {
    let dir = tempdir().unwrap();
    let gt = setup(dir.path());
    let rows = store::read_prediction_rows(&dir.path().join("predictions.csv")).unwrap();

    let resolved = assembler::predictions_from_labels(&rows, &gt, assembler::DEFAULT_LABEL_SCORE);
    let results = assembler::assemble_results(&gt, &resolved.predictions);

    // パッチ5は正解にないので出力されない、パッチ4は予測がないので出力されない
    assert_eq!(results.len(), 3);
    assert_eq!(results[1].category_id, 2);
    assert_eq!(results[1].score, 0.6);
    assert_eq!(results[2].score, assembler::DEFAULT_LABEL_SCORE);
    assert_eq!(results[2].bbox, gt.annotations[2].bbox);

    let path = dir.path().join("results.json");
    store::save_json(&path, &results).unwrap();
    let loaded: Vec<DetectionResult> = store::load_json(&path).unwrap();
    assert_eq!(loaded, results);
    assert!(assembler::missing_category_ids(&loaded, &gt).is_empty());
}

#[test]
fn test_overwrite_and_dataset_modes() {
    let dir = tempdir().unwrap();
    let mut gt = setup(dir.path());
    let rows = store::read_prediction_rows(&dir.path().join("predictions.csv")).unwrap();
    let resolved = assembler::predictions_from_labels(&rows, &gt, assembler::DEFAULT_LABEL_SCORE);

    let dataset: ScoredDataset = assembler::assemble_scored_dataset(&gt, &resolved.predictions);
    assert_eq!(dataset.annotations.len(), 3);
    assert_eq!(dataset.categories.len(), 3);

    let replaced = assembler::overwrite_categories(&mut gt, &resolved.predictions);
    assert_eq!(replaced, 3);
    assert_eq!(gt.annotations[1].category_id, 2);
    // 予測のない注釈はそのまま
    assert_eq!(gt.annotations[3].category_id, 3);
}

#[test]
fn test_paired_mode_keeps_order() {
    let dir = tempdir().unwrap();
    let gt = setup(dir.path());
    let rows = store::read_prediction_rows(&dir.path().join("predictions.csv")).unwrap();
    let resolved = assembler::predictions_from_labels(&rows, &gt, assembler::DEFAULT_LABEL_SCORE);

    let (truths, results): (Vec<GroundTruthEntry>, Vec<DetectionResult>) =
        assembler::assemble_paired(&gt, &resolved.predictions);
    assert_eq!(truths.len(), results.len());
    assert_eq!(truths[1].category_id, 1);
    assert_eq!(results[1].category_id, 2);
    assert_eq!(truths[1].bbox, results[1].bbox);
}

#[test]
fn test_evaluate_prediction_csv() {
    let dir = tempdir().unwrap();
    let gt = setup(dir.path());
    let rows = store::read_prediction_rows(&dir.path().join("predictions.csv")).unwrap();

    let evaluation = evaluator::evaluate_predictions(&gt, &rows);
    let metrics = &evaluation.metrics;

    assert_eq!(evaluation.unmatched_patch_ids, vec![5]);
    assert_eq!(metrics.samples, 3);
    assert!((metrics.accuracy - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(metrics.confusion.labels, vec!["grab", "shoot", "open"]);
    assert_eq!(metrics.confusion.get("grab", "shoot"), Some(1));

    let out = dir.path().join("report");
    evaluator::write_text_report(&out.join("evaluation.txt"), metrics, "pipeline").unwrap();
    evaluator::write_metrics_csv(&out.join("metrics.csv"), metrics).unwrap();
    evaluator::write_confusion_csv(&out.join("confusion_matrix.csv"), &metrics.confusion).unwrap();

    let text = std::fs::read_to_string(out.join("evaluation.txt")).unwrap();
    assert!(text.contains("Accuracy: 0.6667"));
    let confusion = std::fs::read_to_string(out.join("confusion_matrix.csv")).unwrap();
    assert_eq!(confusion.lines().next(), Some(",grab,shoot,open"));
}

#[test]
fn test_evaluate_repeated_patch_row_counts_once() {
    let dir = tempdir().unwrap();
    let gt = setup(dir.path());
    let path = dir.path().join("repeated.csv");
    // 再開時に追記が重なったCSV（パッチ1が2回）
    std::fs::write(
        &path,
        "patch_id,predicted_category,score\n1,grab,0.9\n3,grab,0.7\n1,grab,0.9\n",
    )
    .unwrap();
    let rows = store::read_prediction_rows(&path).unwrap();
    assert_eq!(rows.len(), 3);

    let evaluation = evaluator::evaluate_predictions(&gt, &rows);
    assert_eq!(evaluation.metrics.samples, 2);
    assert_eq!(evaluation.metrics.accuracy, 0.5);
    assert_eq!(evaluation.metrics.confusion.get("grab", "grab"), Some(1));
    assert!(evaluation.unmatched_patch_ids.is_empty());
}

#[test]
fn test_ground_truth_filtered_by_patch_csv() {
    let dir = tempdir().unwrap();
    let gt = setup(dir.path());
    let csv_path = dir.path().join("patches.csv");
    std::fs::write(
        &csv_path,
        "patch_id,original_image_id,interaction_category,semantic_category,interaction_bbox\n\
         2,7,grab,cup,\"[10.0, 0.0, 10.0, 10.0]\"\n\
         4,8,open,door,\"[30.0, 0.0, 10.0, 10.0]\"\n",
    )
    .unwrap();

    let rows = store::read_patch_rows(&csv_path).unwrap();
    let filtered = assembler::filter_ground_truth(&gt, &rows);

    // パッチ4は image_id が一致しない
    assert_eq!(filtered.annotations.len(), 1);
    assert_eq!(filtered.annotations[0].id, 2);
    assert_eq!(filtered.images, gt.images);
}

#[test]
fn test_high_match_results_score_every_annotation() {
    let dir = tempdir().unwrap();
    let gt = setup(dir.path());

    let results = assembler::high_match_results(&gt);
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.score == assembler::HIGH_MATCH_SCORE));
    assert_eq!(results[3].category_id, 3);
}
