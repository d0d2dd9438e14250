//! アノテーション・パッチ・予測の型定義
//!
//! - COCO形式: ImageEntry / Category / Annotation / AnnotationSet
//! - パッチCSV: PatchRow
//! - 分類結果: PredictionRow / Prediction
//! - COCO結果形式: DetectionResult / GroundTruthEntry / ScoredDataset

use crate::bbox::{self, BBox};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// COCO画像エントリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub id: u64,
    pub file_name: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// COCOカテゴリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supercategory: Option<String>,
}

/// COCOアノテーション（idは下流でパッチIDとして使われる）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub bbox: BBox,
    #[serde(default)]
    pub area: f64,
    #[serde(default)]
    pub iscrowd: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<serde_json::Value>,
}

/// COCO形式のアノテーションファイル全体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSet {
    #[serde(default)]
    pub images: Vec<ImageEntry>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// 参照整合性の問題
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// 存在しない画像IDを参照
    DanglingImage { annotation_id: u64, image_id: u64 },
    /// 存在しないカテゴリIDを参照
    DanglingCategory { annotation_id: u64, category_id: u64 },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::DanglingImage { annotation_id, image_id } => write!(
                f,
                "annotation {} が存在しない image_id {} を参照",
                annotation_id, image_id
            ),
            IntegrityIssue::DanglingCategory { annotation_id, category_id } => write!(
                f,
                "annotation {} が存在しない category_id {} を参照",
                annotation_id, category_id
            ),
        }
    }
}

impl AnnotationSet {
    /// カテゴリID → カテゴリ名
    pub fn category_names_by_id(&self) -> HashMap<u64, &str> {
        self.categories
            .iter()
            .map(|c| (c.id, c.name.as_str()))
            .collect()
    }

    /// カテゴリ名 → カテゴリID
    pub fn category_ids_by_name(&self) -> HashMap<&str, u64> {
        self.categories
            .iter()
            .map(|c| (c.name.as_str(), c.id))
            .collect()
    }

    /// カテゴリ名の一覧（ファイル内の順序を保持）
    pub fn vocabulary(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }

    /// 画像ID → その画像のアノテーション（ファイル内の順序を保持）
    pub fn annotations_by_image(&self) -> HashMap<u64, Vec<&Annotation>> {
        let mut index: HashMap<u64, Vec<&Annotation>> = HashMap::new();
        for ann in &self.annotations {
            index.entry(ann.image_id).or_default().push(ann);
        }
        index
    }

    /// アノテーションID → アノテーション
    pub fn annotations_by_id(&self) -> HashMap<u64, &Annotation> {
        self.annotations.iter().map(|a| (a.id, a)).collect()
    }

    /// 参照整合性を検査
    pub fn integrity_issues(&self) -> Vec<IntegrityIssue> {
        let image_ids: std::collections::HashSet<u64> = self.images.iter().map(|i| i.id).collect();
        let category_ids: std::collections::HashSet<u64> =
            self.categories.iter().map(|c| c.id).collect();

        let mut issues = Vec::new();
        for ann in &self.annotations {
            if !image_ids.contains(&ann.image_id) {
                issues.push(IntegrityIssue::DanglingImage {
                    annotation_id: ann.id,
                    image_id: ann.image_id,
                });
            }
            if !category_ids.contains(&ann.category_id) {
                issues.push(IntegrityIssue::DanglingCategory {
                    annotation_id: ann.id,
                    category_id: ann.category_id,
                });
            }
        }
        issues
    }
}

/// パッチCSVの1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRow {
    pub patch_id: u64,
    pub original_image_id: u64,
    pub interaction_category: String,
    #[serde(default)]
    pub semantic_category: String,
    #[serde(with = "bbox::as_list_string")]
    pub interaction_bbox: BBox,
}

impl PatchRow {
    /// 行全体の完全一致判定に使うキー
    pub fn dedup_key(&self) -> (u64, u64, String, String, [u64; 4]) {
        (
            self.patch_id,
            self.original_image_id,
            self.interaction_category.clone(),
            self.semantic_category.clone(),
            self.interaction_bbox.to_bits(),
        )
    }
}

/// 予測CSVの1行（patch_id, predicted_category, score）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub patch_id: u64,
    pub predicted_category: String,
    #[serde(default)]
    pub score: Option<f64>,
}

/// カテゴリIDに解決済みの予測
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub patch_id: u64,
    pub category_id: u64,
    pub category_name: String,
    pub score: f64,
}

/// COCO結果形式の検出結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub image_id: u64,
    pub category_id: u64,
    pub bbox: BBox,
    pub score: f64,
}

/// 予測と対になる正解エントリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthEntry {
    pub image_id: u64,
    pub category_id: u64,
    pub bbox: BBox,
    pub iscrowd: u8,
}

/// スコア付きアノテーション（idはパッチID）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub bbox: BBox,
    pub score: f64,
}

/// 画像・カテゴリを保持したまま予測を格納するCOCO構造
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredDataset {
    pub images: Vec<ImageEntry>,
    pub categories: Vec<Category>,
    pub annotations: Vec<ScoredAnnotation>,
}
