//! XR Interaction Common Library
//!
//! CLIで共有される型・幾何計算・プロンプト・評価指標

pub mod bbox;
pub mod error;
pub mod export;
pub mod metrics;
pub mod parser;
pub mod prompts;
pub mod types;

pub use bbox::{BBox, BBoxIssue, CropRect, DEFAULT_BBOX_TOLERANCE};
pub use error::{Error, Result};
pub use metrics::{ConfusionMatrix, Metrics};
pub use parser::{clean_reply, normalize_label, parse_category_reply};
pub use prompts::{build_chat_instruction, build_text_prompts, DEFAULT_PROMPT_TEMPLATE};
pub use types::{
    Annotation, AnnotationSet, Category, DetectionResult, GroundTruthEntry, ImageEntry,
    IntegrityIssue, PatchRow, Prediction, PredictionRow, ScoredAnnotation, ScoredDataset,
};
