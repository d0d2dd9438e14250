//! 分類指標の計算
//!
//! 正解ラベルと予測ラベルの組から以下を求める:
//! - Accuracy（完全一致の割合）
//! - Precision / Recall / F1（正解に現れるカテゴリでのマクロ平均、ゼロ除算は0）
//! - mAP（カテゴリごとの one-vs-rest Average Precision の平均）
//! - Top-k Accuracy（スコア分布が必要）
//! - 混同行列（行=正解、列=予測、語彙順）

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// 混同行列
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// 語彙順の混同行列を作成
    ///
    /// 語彙にないラベルを含む組は数えない。
    pub fn build(truths: &[String], predictions: &[String], vocabulary: &[String]) -> Self {
        let index: HashMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();

        let mut counts = vec![vec![0usize; vocabulary.len()]; vocabulary.len()];
        for (truth, pred) in truths.iter().zip(predictions) {
            if let (Some(&row), Some(&col)) = (index.get(truth.as_str()), index.get(pred.as_str())) {
                counts[row][col] += 1;
            }
        }

        Self {
            labels: vocabulary.to_vec(),
            counts,
        }
    }

    pub fn get(&self, truth: &str, prediction: &str) -> Option<usize> {
        let row = self.labels.iter().position(|l| l == truth)?;
        let col = self.labels.iter().position(|l| l == prediction)?;
        Some(self.counts[row][col])
    }

    /// 対角成分の合計
    pub fn trace(&self) -> usize {
        (0..self.labels.len()).map(|i| self.counts[i][i]).sum()
    }
}

/// 1カテゴリ分の適合率・再現率・F1
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScores {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// マクロ平均の指標
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MacroScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// 評価結果一式
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub samples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub map: f64,
    /// スコア分布から求めたmAP（分布がある場合のみ）
    pub score_map: Option<f64>,
    /// (k, accuracy)
    pub top_k: Vec<(usize, f64)>,
    pub per_class: Vec<ClassScores>,
    pub confusion: ConfusionMatrix,
}

impl Metrics {
    /// レポートに並べる指標名と値（表示順）
    pub fn summary_rows(&self) -> Vec<(String, f64)> {
        let mut rows = vec![
            ("Accuracy".to_string(), self.accuracy),
            ("Precision".to_string(), self.precision),
            ("Recall".to_string(), self.recall),
            ("F1-Score".to_string(), self.f1),
            ("mAP".to_string(), self.map),
        ];
        if let Some(score_map) = self.score_map {
            rows.push(("mAP (scores)".to_string(), score_map));
        }
        for (k, value) in &self.top_k {
            rows.push((format!("Top-{} Accuracy", k), *value));
        }
        rows
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// 完全一致の割合（空入力は0）
pub fn accuracy(truths: &[String], predictions: &[String]) -> f64 {
    let correct = truths
        .iter()
        .zip(predictions)
        .filter(|(t, p)| t == p)
        .count();
    ratio(correct, truths.len().min(predictions.len()))
}

/// 正解に現れるカテゴリ（ソート済み）
fn ground_truth_labels(truths: &[String]) -> Vec<String> {
    truths
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// カテゴリごとの適合率・再現率・F1
pub fn per_class_scores(truths: &[String], predictions: &[String]) -> Vec<ClassScores> {
    ground_truth_labels(truths)
        .into_iter()
        .map(|label| {
            let mut tp = 0;
            let mut fp = 0;
            let mut fn_ = 0;
            for (t, p) in truths.iter().zip(predictions) {
                match (t == &label, p == &label) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }

            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            ClassScores {
                label,
                precision,
                recall,
                f1,
                support: tp + fn_,
            }
        })
        .collect()
}

/// 正解に現れるカテゴリでのマクロ平均
pub fn macro_scores(truths: &[String], predictions: &[String]) -> MacroScores {
    let classes = per_class_scores(truths, predictions);
    if classes.is_empty() {
        return MacroScores::default();
    }

    let n = classes.len() as f64;
    MacroScores {
        precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
        recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
        f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
    }
}

/// Average Precision（補間なし・階段和）
///
/// スコア降順に並べ、異なるスコア値ごとに適合率・再現率を求めて
/// `Σ (R_n - R_{n-1}) * P_n` を返す。正例が1つもない場合は0。
///
/// # Examples
/// ```
/// use xr_interaction_common::metrics::average_precision;
///
/// let truth = [true, false, true, false];
/// let score = [1.0, 1.0, 0.0, 0.0];
/// assert!((average_precision(&truth, &score) - 0.5).abs() < 1e-12);
/// ```
pub fn average_precision(truth: &[bool], scores: &[f64]) -> f64 {
    let positives = truth.iter().filter(|&&t| t).count();
    if positives == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..truth.len().min(scores.len())).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut ap = 0.0;
    let mut prev_recall = 0.0;
    let mut tp = 0usize;
    let mut seen = 0usize;

    let mut i = 0;
    while i < order.len() {
        // 同点のスコアは1つのしきい値として扱う
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]].total_cmp(&threshold).is_eq() {
            if truth[order[i]] {
                tp += 1;
            }
            seen += 1;
            i += 1;
        }

        let precision = tp as f64 / seen as f64;
        let recall = tp as f64 / positives as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }

    ap
}

/// ラベル予測からのmAP
///
/// 正解に現れるカテゴリごとに、正解・予測を0/1の指示ベクトルにしてAPを求め平均する。
pub fn mean_average_precision(truths: &[String], predictions: &[String]) -> f64 {
    let labels = ground_truth_labels(truths);
    if labels.is_empty() {
        return 0.0;
    }

    let aps: Vec<f64> = labels
        .iter()
        .map(|label| {
            let truth: Vec<bool> = truths.iter().map(|t| t == label).collect();
            let scores: Vec<f64> = predictions
                .iter()
                .map(|p| if p == label { 1.0 } else { 0.0 })
                .collect();
            average_precision(&truth, &scores)
        })
        .collect();

    aps.iter().sum::<f64>() / aps.len() as f64
}

/// スコア分布からのmAP
///
/// `scores[i][j]` はサンプルiの語彙jに対するスコア。正解に現れるカテゴリで平均する。
pub fn mean_average_precision_from_scores(
    truths: &[String],
    scores: &[Vec<f32>],
    vocabulary: &[String],
) -> f64 {
    let labels = ground_truth_labels(truths);
    let aps: Vec<f64> = labels
        .iter()
        .filter_map(|label| {
            let column = vocabulary.iter().position(|v| v == label)?;
            let truth: Vec<bool> = truths.iter().map(|t| t == label).collect();
            let column_scores: Vec<f64> = scores
                .iter()
                .map(|row| row.get(column).copied().unwrap_or(f32::MIN) as f64)
                .collect();
            Some(average_precision(&truth, &column_scores))
        })
        .collect();

    if aps.is_empty() {
        return 0.0;
    }
    aps.iter().sum::<f64>() / aps.len() as f64
}

/// スコア上位k件のインデックス（降順）
pub fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(k);
    order
}

/// Top-k Accuracy
///
/// 正解ラベルがスコア上位k件に含まれるサンプルの割合。
pub fn top_k_accuracy(truths: &[String], scores: &[Vec<f32>], vocabulary: &[String], k: usize) -> f64 {
    let hits = truths
        .iter()
        .zip(scores)
        .filter(|(truth, row)| {
            top_k_indices(row, k)
                .into_iter()
                .any(|i| vocabulary.get(i) == Some(*truth))
        })
        .count();
    ratio(hits, truths.len().min(scores.len()))
}

/// ラベル予測から評価指標を計算
pub fn evaluate(truths: &[String], predictions: &[String], vocabulary: &[String]) -> Metrics {
    let macro_avg = macro_scores(truths, predictions);
    Metrics {
        samples: truths.len().min(predictions.len()),
        accuracy: accuracy(truths, predictions),
        precision: macro_avg.precision,
        recall: macro_avg.recall,
        f1: macro_avg.f1,
        map: mean_average_precision(truths, predictions),
        score_map: None,
        top_k: Vec::new(),
        per_class: per_class_scores(truths, predictions),
        confusion: ConfusionMatrix::build(truths, predictions, vocabulary),
    }
}

/// スコア分布つきで評価指標を計算（Top-k と スコアmAP を追加）
pub fn evaluate_with_scores(
    truths: &[String],
    predictions: &[String],
    scores: &[Vec<f32>],
    vocabulary: &[String],
    ks: &[usize],
) -> Metrics {
    let mut metrics = evaluate(truths, predictions, vocabulary);
    metrics.top_k = ks
        .iter()
        .map(|&k| (k, top_k_accuracy(truths, scores, vocabulary, k)))
        .collect();
    metrics.score_map = Some(mean_average_precision_from_scores(truths, scores, vocabulary));
    metrics
}
