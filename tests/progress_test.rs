//! 分類の再開テスト
//!
//! 進捗カーソルの位置から再開し、処理済みの項目を再分類しないことを検証

use std::path::Path;
use std::sync::Mutex;
use tempfile::tempdir;
use xr_interaction::classifier::{
    self, Classification, ClassifyOutcome, PatchClassifier, PatchInput, PatchJob, ProgressCursor, RunOutputs,
    SkipReason,
};
use xr_interaction::scanner::PatchIndex;
use xr_interaction::store;

/// 呼ばれたパッチIDを記録し、`reject` のIDだけ語彙外の返答として扱う
struct Recording {
    vocabulary: Vec<String>,
    reject: Option<u64>,
    seen: Mutex<Vec<u64>>,
}

impl Recording {
    fn new(reject: Option<u64>) -> Self {
        Self {
            vocabulary: vec!["grab".to_string(), "shoot".to_string()],
            reject,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

impl PatchClassifier for Recording {
    fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    async fn classify(&self, patch: &PatchInput) -> ClassifyOutcome {
        self.seen.lock().unwrap().push(patch.patch_id);
        if self.reject == Some(patch.patch_id) {
            return Err(SkipReason::UnexpectedCategory("maybe".into()));
        }
        Ok(Classification {
            label: "grab".into(),
            score: None,
            scores: None,
        })
    }
}

fn setup(root: &Path, count: u64) -> (Vec<PatchJob>, PatchIndex, RunOutputs) {
    let patches = root.join("patches");
    std::fs::create_dir_all(&patches).unwrap();
    for id in 1..=count {
        std::fs::write(patches.join(format!("{}.jpg", id)), b"jpeg").unwrap();
    }

    let jobs = (1..=count)
        .map(|patch_id| PatchJob {
            patch_id,
            semantic_category: String::new(),
            ground_truth: None,
        })
        .collect();
    let outputs = RunOutputs {
        predictions: root.join("predictions.csv"),
        similarity: None,
        errors: root.join("errors.csv"),
        progress: root.join("progress.txt"),
    };
    (jobs, PatchIndex::build(&patches).unwrap(), outputs)
}

#[tokio::test]
async fn test_resume_skips_processed_items() {
    let dir = tempdir().unwrap();
    let (jobs, index, outputs) = setup(dir.path(), 5);

    // 2件処理した時点で中断した状態
    ProgressCursor::load(&outputs.progress).set(2).unwrap();

    let recording = Recording::new(None);
    let summary = classifier::run_classification(&recording, &jobs, &index, &outputs, 2)
        .await
        .unwrap();

    assert_eq!(recording.seen(), vec![3, 4, 5]);
    assert_eq!(summary.start_index, 2);
    assert_eq!(summary.processed, 3);
    assert_eq!(ProgressCursor::load(&outputs.progress).next_index(), 5);

    let rows = store::read_prediction_rows(&outputs.predictions).unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_finished_run_does_nothing_on_rerun() {
    let dir = tempdir().unwrap();
    let (jobs, index, outputs) = setup(dir.path(), 3);

    let first = Recording::new(None);
    classifier::run_classification(&first, &jobs, &index, &outputs, 32)
        .await
        .unwrap();
    assert_eq!(first.seen(), vec![1, 2, 3]);

    let second = Recording::new(None);
    let summary = classifier::run_classification(&second, &jobs, &index, &outputs, 32)
        .await
        .unwrap();
    assert!(second.seen().is_empty());
    assert_eq!(summary.processed, 0);

    // 追記モードでもヘッダは1回だけ
    let content = std::fs::read_to_string(&outputs.predictions).unwrap();
    assert_eq!(content.matches("patch_id").count(), 1);
    assert_eq!(store::read_prediction_rows(&outputs.predictions).unwrap().len(), 3);
}

#[tokio::test]
async fn test_unexpected_category_still_advances_cursor() {
    let dir = tempdir().unwrap();
    let (jobs, index, outputs) = setup(dir.path(), 3);

    let recording = Recording::new(Some(2));
    let summary = classifier::run_classification(&recording, &jobs, &index, &outputs, 1)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped.get("unexpected category"), Some(&1));
    assert_eq!(ProgressCursor::load(&outputs.progress).next_index(), 3);

    let errors = std::fs::read_to_string(&outputs.errors).unwrap();
    assert!(errors.contains("2,unexpected category,"));
}

#[tokio::test]
async fn test_reset_starts_from_first_item() {
    let dir = tempdir().unwrap();
    let (jobs, index, outputs) = setup(dir.path(), 2);
    ProgressCursor::load(&outputs.progress).set(2).unwrap();

    assert!(ProgressCursor::clear(&outputs.progress).unwrap());
    assert!(!ProgressCursor::clear(&outputs.progress).unwrap());

    let recording = Recording::new(None);
    classifier::run_classification(&recording, &jobs, &index, &outputs, 4)
        .await
        .unwrap();
    assert_eq!(recording.seen(), vec![1, 2]);
}

#[tokio::test]
async fn test_corrupt_progress_file_restarts() {
    let dir = tempdir().unwrap();
    let (jobs, index, outputs) = setup(dir.path(), 2);
    std::fs::write(&outputs.progress, "not a number").unwrap();

    let recording = Recording::new(None);
    classifier::run_classification(&recording, &jobs, &index, &outputs, 4)
        .await
        .unwrap();
    assert_eq!(recording.seen(), vec![1, 2]);
}
