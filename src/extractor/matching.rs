//! インタラクション注釈とセマンティック注釈の対応付け

use clap::ValueEnum;
use std::collections::HashMap;
use tracing::warn;
use xr_interaction_common::{AnnotationSet, BBox};

/// 対応付けモード
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum MatchMode {
    /// セマンティック注釈を使わない
    #[value(name = "none")]
    Off,
    /// 同じ画像のセマンティック注釈すべてと組み合わせる
    Exact,
    /// bboxの近似一致
    #[default]
    Fuzzy,
}

/// 近似一致の判定条件
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchPolicy {
    pub mode: MatchMode,
    pub tolerance: f64,
    /// 最初に一致した候補だけを採用する
    pub first_match_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticCandidate {
    pub annotation_id: u64,
    pub bbox: BBox,
    pub name: String,
}

/// 対応付けの結果
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// セマンティック注釈なしで1行出力する
    Standalone,
    Matched(Vec<String>),
    Unmatched,
}

/// 画像ID → セマンティック注釈の索引
#[derive(Debug, Default)]
pub struct SemanticIndex {
    by_image: HashMap<u64, Vec<SemanticCandidate>>,
}

impl SemanticIndex {
    /// カテゴリ名を引けない注釈は警告して除外
    pub fn build(set: &AnnotationSet) -> Self {
        let names = set.category_names_by_id();
        let mut by_image: HashMap<u64, Vec<SemanticCandidate>> = HashMap::new();

        for ann in &set.annotations {
            let Some(name) = names.get(&ann.category_id) else {
                warn!(
                    "セマンティック注釈 {} のカテゴリ {} が見つかりません",
                    ann.id, ann.category_id
                );
                continue;
            };
            by_image.entry(ann.image_id).or_default().push(SemanticCandidate {
                annotation_id: ann.id,
                bbox: ann.bbox,
                name: name.to_string(),
            });
        }

        Self { by_image }
    }

    pub fn candidates(&self, image_id: u64) -> &[SemanticCandidate] {
        self.by_image.get(&image_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// インタラクション注釈に対応するセマンティックカテゴリ名を求める
    ///
    /// 近似一致では、インタラクション側のbboxを基準に差分の割合を評価する。
    pub fn match_annotation(&self, policy: &MatchPolicy, image_id: u64, bbox: &BBox) -> MatchOutcome {
        let candidates = self.candidates(image_id);

        let names: Vec<String> = match policy.mode {
            MatchMode::Off => return MatchOutcome::Standalone,
            MatchMode::Exact => candidates.iter().map(|c| c.name.clone()).collect(),
            MatchMode::Fuzzy => {
                let mut accepted = candidates.iter().filter(|c| c.bbox.is_similar_to(bbox, policy.tolerance));
                if policy.first_match_only {
                    accepted.next().map(|c| vec![c.name.clone()]).unwrap_or_default()
                } else {
                    accepted.map(|c| c.name.clone()).collect()
                }
            }
        };

        if names.is_empty() {
            MatchOutcome::Unmatched
        } else {
            MatchOutcome::Matched(names)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xr_interaction_common::{Annotation, Category};

    fn ann(id: u64, image_id: u64, category_id: u64, bbox: [f64; 4]) -> Annotation {
        Annotation {
            id,
            image_id,
            category_id,
            bbox: bbox.into(),
            area: bbox[2] * bbox[3],
            iscrowd: 0,
            segmentation: None,
        }
    }

    fn semantic_set() -> AnnotationSet {
        AnnotationSet {
            images: vec![],
            categories: vec![
                Category { id: 1, name: "cup".into(), supercategory: None },
                Category { id: 2, name: "door".into(), supercategory: None },
            ],
            annotations: vec![
                ann(10, 1, 1, [100.0, 100.0, 50.0, 50.0]),
                ann(11, 1, 2, [102.0, 101.0, 51.0, 49.0]),
                ann(12, 2, 2, [0.0, 0.0, 10.0, 10.0]),
                ann(13, 1, 99, [100.0, 100.0, 50.0, 50.0]),
            ],
        }
    }

    fn policy(mode: MatchMode, first_match_only: bool) -> MatchPolicy {
        MatchPolicy { mode, tolerance: 0.1, first_match_only }
    }

    #[test]
    fn test_unknown_semantic_category_excluded() {
        let index = SemanticIndex::build(&semantic_set());
        assert_eq!(index.candidates(1).len(), 2);
        assert!(index.candidates(3).is_empty());
    }

    #[test]
    fn test_off_mode_is_standalone() {
        let index = SemanticIndex::default();
        let outcome = index.match_annotation(&policy(MatchMode::Off, true), 1, &BBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(outcome, MatchOutcome::Standalone);
    }

    #[test]
    fn test_exact_mode_fans_out() {
        let index = SemanticIndex::build(&semantic_set());
        let outcome = index.match_annotation(&policy(MatchMode::Exact, true), 1, &BBox::new(0.0, 0.0, 5.0, 5.0));
        assert_eq!(outcome, MatchOutcome::Matched(vec!["cup".into(), "door".into()]));
    }

    #[test]
    fn test_exact_mode_without_semantic_is_unmatched() {
        let index = SemanticIndex::build(&semantic_set());
        let outcome = index.match_annotation(&policy(MatchMode::Exact, true), 5, &BBox::new(0.0, 0.0, 5.0, 5.0));
        assert_eq!(outcome, MatchOutcome::Unmatched);
    }

    #[test]
    fn test_fuzzy_first_match_wins() {
        let index = SemanticIndex::build(&semantic_set());
        let bbox = BBox::new(100.0, 100.0, 50.0, 50.0);
        let outcome = index.match_annotation(&policy(MatchMode::Fuzzy, true), 1, &bbox);
        assert_eq!(outcome, MatchOutcome::Matched(vec!["cup".into()]));
    }

    #[test]
    fn test_fuzzy_all_matches() {
        let index = SemanticIndex::build(&semantic_set());
        let bbox = BBox::new(100.0, 100.0, 50.0, 50.0);
        let outcome = index.match_annotation(&policy(MatchMode::Fuzzy, false), 1, &bbox);
        assert_eq!(outcome, MatchOutcome::Matched(vec!["cup".into(), "door".into()]));
    }

    #[test]
    fn test_fuzzy_no_candidate_in_tolerance() {
        let index = SemanticIndex::build(&semantic_set());
        let bbox = BBox::new(300.0, 300.0, 50.0, 50.0);
        let outcome = index.match_annotation(&policy(MatchMode::Fuzzy, true), 1, &bbox);
        assert_eq!(outcome, MatchOutcome::Unmatched);
    }
}
