//! パッチ切り出し
//!
//! 画像ごとにインタラクション注釈のbboxを切り出し、セマンティック注釈と対応付けて
//! パッチCSVの行と切り出し画像を出力する。
//! 読めない画像・不正なbbox・対応なしは `ExtractionIssue` として記録し、処理は続行する。

mod matching;

pub use matching::{MatchMode, MatchOutcome, MatchPolicy, SemanticCandidate, SemanticIndex};

use crate::error::Result;
use crate::logging::create_progress_bar;
use crate::store::{self, ErrorLogEntry};
use clap::ValueEnum;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xr_interaction_common::{
    Annotation, AnnotationSet, BBox, ImageEntry, PatchRow, DEFAULT_BBOX_TOLERANCE,
};

/// 切り出し画像のファイル名規則
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PatchNaming {
    /// `{annotation_id}.jpg`
    #[default]
    Id,
    /// `{annotation_id}_{image_id}_{interaction}_{semantic}.jpg`
    Descriptive,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub match_mode: MatchMode,
    pub naming: PatchNaming,
    pub tolerance: f64,
    pub first_match_only: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            match_mode: MatchMode::default(),
            naming: PatchNaming::default(),
            tolerance: DEFAULT_BBOX_TOLERANCE,
            first_match_only: true,
        }
    }
}

impl ExtractOptions {
    fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            mode: self.match_mode,
            tolerance: self.tolerance,
            first_match_only: self.first_match_only,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IssueKind {
    UnreadableImage,
    MissingImageEntry,
    UnknownCategory,
    InvalidBbox,
    Unmatched,
    WriteFailed,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::UnreadableImage => "unreadable image",
            IssueKind::MissingImageEntry => "missing image entry",
            IssueKind::UnknownCategory => "unknown category",
            IssueKind::InvalidBbox => "invalid bbox",
            IssueKind::Unmatched => "unmatched",
            IssueKind::WriteFailed => "write failed",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 切り出しをスキップした理由（1件 = 1注釈または1画像）
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionIssue {
    pub kind: IssueKind,
    pub image_id: u64,
    pub annotation_id: Option<u64>,
    pub detail: String,
}

impl ExtractionIssue {
    pub fn to_log_entry(&self) -> ErrorLogEntry {
        ErrorLogEntry::new(
            self.annotation_id,
            self.kind.as_str(),
            format!("image {}: {}", self.image_id, self.detail),
        )
    }
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// 重複除去済みのパッチ行
    pub rows: Vec<PatchRow>,
    /// 切り出し画像そのものを画像とするCOCOデータセット
    pub crop_dataset: AnnotationSet,
    pub issues: Vec<ExtractionIssue>,
    pub patches_written: usize,
    pub images_processed: usize,
    pub images_skipped: usize,
    pub duplicates_removed: usize,
}

impl ExtractionReport {
    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn unmatched(&self) -> usize {
        self.count(IssueKind::Unmatched)
    }

    /// 理由ごとの件数（件数0は含まない）
    pub fn counts_by_kind(&self) -> Vec<(IssueKind, usize)> {
        let mut counts: HashMap<IssueKind, usize> = HashMap::new();
        for issue in &self.issues {
            *counts.entry(issue.kind).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort();
        counts
    }

    pub fn error_log_entries(&self) -> Vec<ErrorLogEntry> {
        self.issues.iter().map(ExtractionIssue::to_log_entry).collect()
    }
}

/// 切り出し結果の出力先
#[derive(Debug, Clone)]
pub struct ExtractOutputs {
    pub patch_csv: PathBuf,
    pub error_log: PathBuf,
    pub crop_annotations: Option<PathBuf>,
}

/// ファイル名に使えない文字を置換
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// 切り出し画像のファイル名
pub fn patch_file_name(naming: PatchNaming, row: &PatchRow) -> String {
    match naming {
        PatchNaming::Id => format!("{}.jpg", row.patch_id),
        PatchNaming::Descriptive if row.semantic_category.is_empty() => format!(
            "{}_{}_{}.jpg",
            row.patch_id,
            row.original_image_id,
            sanitize_name(&row.interaction_category)
        ),
        PatchNaming::Descriptive => format!(
            "{}_{}_{}_{}.jpg",
            row.patch_id,
            row.original_image_id,
            sanitize_name(&row.interaction_category),
            sanitize_name(&row.semantic_category)
        ),
    }
}

fn crop_annotation(ann: &Annotation, width: u32, height: u32) -> Annotation {
    Annotation {
        id: ann.id,
        image_id: ann.id,
        category_id: ann.category_id,
        bbox: BBox::new(0.0, 0.0, width as f64, height as f64),
        area: width as f64 * height as f64,
        iscrowd: ann.iscrowd,
        segmentation: None,
    }
}

/// パッチを切り出す
///
/// # Arguments
/// * `interaction` - インタラクション注釈（切り出し対象）
/// * `semantic` - セマンティック注釈（`MatchMode::Off` のときは無視）
/// * `image_dir` - 元画像フォルダ（`file_name` をここから解決）
/// * `output_dir` - 切り出し画像の出力先
pub fn extract_patches(
    interaction: &AnnotationSet,
    semantic: Option<&AnnotationSet>,
    image_dir: &Path,
    output_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractionReport> {
    std::fs::create_dir_all(output_dir)?;

    let policy = options.policy();
    let semantic_index = match (policy.mode, semantic) {
        (MatchMode::Off, _) | (_, None) => SemanticIndex::default(),
        (_, Some(set)) => SemanticIndex::build(set),
    };
    if policy.mode != MatchMode::Off && semantic.is_none() {
        warn!("セマンティック注釈が指定されていないため、すべての注釈が対応なしになります");
    }

    let category_names = interaction.category_names_by_id();
    let annotations_by_image = interaction.annotations_by_image();

    let mut report = ExtractionReport {
        crop_dataset: AnnotationSet {
            categories: interaction.categories.clone(),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut rows = Vec::new();
    let mut written: HashSet<PathBuf> = HashSet::new();

    let pb = create_progress_bar(interaction.images.len() as u64, "extract");

    for image_entry in &interaction.images {
        pb.inc(1);

        let Some(annotations) = annotations_by_image.get(&image_entry.id) else {
            continue;
        };

        let image_path = image_dir.join(&image_entry.file_name);
        let image = match image::open(&image_path) {
            Ok(img) => img,
            Err(e) => {
                warn!("画像を読み込めません {}: {}", image_path.display(), e);
                report.images_skipped += 1;
                report.issues.push(ExtractionIssue {
                    kind: IssueKind::UnreadableImage,
                    image_id: image_entry.id,
                    annotation_id: None,
                    detail: format!("{}: {}", image_path.display(), e),
                });
                continue;
            }
        };
        report.images_processed += 1;

        for ann in annotations {
            extract_annotation(
                ann,
                image_entry,
                &image,
                &category_names,
                &semantic_index,
                &policy,
                options.naming,
                output_dir,
                &mut written,
                &mut rows,
                &mut report,
            );
        }
    }

    pb.finish_and_clear();

    // 画像エントリのない注釈
    let image_ids: HashSet<u64> = interaction.images.iter().map(|i| i.id).collect();
    for ann in &interaction.annotations {
        if !image_ids.contains(&ann.image_id) {
            report.issues.push(ExtractionIssue {
                kind: IssueKind::MissingImageEntry,
                image_id: ann.image_id,
                annotation_id: Some(ann.id),
                detail: "images に存在しない image_id".into(),
            });
        }
    }

    let total_rows = rows.len();
    report.rows = store::dedup_rows(rows, PatchRow::dedup_key);
    report.duplicates_removed = total_rows - report.rows.len();

    info!(
        "切り出し完了: rows={} patches={} images={} skipped_images={} issues={}",
        report.rows.len(),
        report.patches_written,
        report.images_processed,
        report.images_skipped,
        report.issues.len()
    );

    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn extract_annotation(
    ann: &Annotation,
    image_entry: &ImageEntry,
    image: &image::DynamicImage,
    category_names: &HashMap<u64, &str>,
    semantic_index: &SemanticIndex,
    policy: &MatchPolicy,
    naming: PatchNaming,
    output_dir: &Path,
    written: &mut HashSet<PathBuf>,
    rows: &mut Vec<PatchRow>,
    report: &mut ExtractionReport,
) {
    let issue = |kind: IssueKind, detail: String| ExtractionIssue {
        kind,
        image_id: image_entry.id,
        annotation_id: Some(ann.id),
        detail,
    };

    let Some(interaction_name) = category_names.get(&ann.category_id) else {
        report.issues.push(issue(
            IssueKind::UnknownCategory,
            format!("category_id {}", ann.category_id),
        ));
        return;
    };

    let rect = match ann.bbox.to_crop_rect(image.width(), image.height()) {
        Ok(rect) => rect,
        Err(e) => {
            debug!("注釈 {} のbboxを拒否: {}", ann.id, e);
            report.issues.push(issue(IssueKind::InvalidBbox, format!("{} {}", ann.bbox, e)));
            return;
        }
    };

    let semantic_names = match semantic_index.match_annotation(policy, image_entry.id, &ann.bbox) {
        MatchOutcome::Standalone => vec![String::new()],
        MatchOutcome::Matched(names) => names,
        MatchOutcome::Unmatched => {
            debug!("注釈 {} に対応するセマンティック注釈がありません", ann.id);
            report.issues.push(issue(IssueKind::Unmatched, format!("bbox {}", ann.bbox)));
            return;
        }
    };

    let patch = image.crop_imm(rect.x, rect.y, rect.width, rect.height).to_rgb8();
    let mut first_file_name = None;

    for semantic_name in semantic_names {
        let row = PatchRow {
            patch_id: ann.id,
            original_image_id: image_entry.id,
            interaction_category: interaction_name.to_string(),
            semantic_category: semantic_name,
            interaction_bbox: ann.bbox,
        };

        let file_name = patch_file_name(naming, &row);
        let path = output_dir.join(&file_name);

        // 同じファイルは一度だけ書く
        if written.insert(path.clone()) {
            if let Err(e) = patch.save(&path) {
                warn!("パッチを書き込めません {}: {}", path.display(), e);
                written.remove(&path);
                report.issues.push(issue(IssueKind::WriteFailed, format!("{}: {}", path.display(), e)));
                continue;
            }
            report.patches_written += 1;
        }

        first_file_name.get_or_insert(file_name);
        rows.push(row);
    }

    if let Some(file_name) = first_file_name {
        report.crop_dataset.images.push(ImageEntry {
            id: ann.id,
            file_name,
            width: rect.width,
            height: rect.height,
        });
        report
            .crop_dataset
            .annotations
            .push(crop_annotation(ann, rect.width, rect.height));
    }
}

/// 切り出し結果を保存（パッチCSV・エラーログ・切り出しデータセット）
pub fn save_report(report: &ExtractionReport, outputs: &ExtractOutputs) -> Result<()> {
    store::write_patch_rows(&outputs.patch_csv, &report.rows)?;
    store::write_error_log(&outputs.error_log, report.unmatched(), &report.error_log_entries())?;
    if let Some(path) = &outputs.crop_annotations {
        store::save_json(path, &report.crop_dataset)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(semantic: &str) -> PatchRow {
        PatchRow {
            patch_id: 12,
            original_image_id: 3,
            interaction_category: "touch/press".into(),
            semantic_category: semantic.into(),
            interaction_bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
        }
    }

    #[test]
    fn test_patch_file_name_id() {
        assert_eq!(patch_file_name(PatchNaming::Id, &row("cup")), "12.jpg");
    }

    #[test]
    fn test_patch_file_name_descriptive() {
        assert_eq!(
            patch_file_name(PatchNaming::Descriptive, &row("cup")),
            "12_3_touch_press_cup.jpg"
        );
        assert_eq!(
            patch_file_name(PatchNaming::Descriptive, &row("")),
            "12_3_touch_press.jpg"
        );
    }

    #[test]
    fn test_crop_annotation_starts_at_origin() {
        let ann = Annotation {
            id: 5,
            image_id: 1,
            category_id: 2,
            bbox: BBox::new(10.0, 10.0, 30.0, 20.0),
            area: 600.0,
            iscrowd: 1,
            segmentation: None,
        };
        let cropped = crop_annotation(&ann, 30, 20);
        assert_eq!(cropped.image_id, 5);
        assert_eq!(cropped.bbox, BBox::new(0.0, 0.0, 30.0, 20.0));
        assert_eq!(cropped.area, 600.0);
        assert_eq!(cropped.iscrowd, 1);
    }

    #[test]
    fn test_issue_log_entry() {
        let issue = ExtractionIssue {
            kind: IssueKind::Unmatched,
            image_id: 1,
            annotation_id: Some(7),
            detail: "bbox [1, 2, 3, 4]".into(),
        };
        let entry = issue.to_log_entry();
        assert_eq!(entry.patch_id, Some(7));
        assert_eq!(entry.reason, "unmatched");
        assert_eq!(entry.detail, "image 1: bbox [1, 2, 3, 4]");
    }
}
