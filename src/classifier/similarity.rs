//! 埋め込み類似度による分類
//!
//! バッチ内の画像は1回のバックエンド呼び出しで埋め込み、テキストプロンプトは
//! セマンティックカテゴリごとに1回だけ埋め込む。

use super::backend::EmbeddingBackend;
use super::{Classification, ClassifyOutcome, PatchClassifier, PatchInput, SkipReason};
use crate::store::argmax;
use image::DynamicImage;
use std::collections::HashMap;
use tracing::debug;
use xr_interaction_common::build_text_prompts;

/// L2正規化（ノルム0はそのまま）
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// 画像埋め込みと各テキスト埋め込みのコサイン類似度
pub fn cosine_scores(image: &[f32], texts: &[Vec<f32>]) -> Vec<f32> {
    let image = l2_normalize(image);
    texts
        .iter()
        .map(|t| {
            l2_normalize(t)
                .iter()
                .zip(&image)
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

pub struct SimilarityClassifier<B> {
    backend: B,
    vocabulary: Vec<String>,
    template: String,
}

impl<B: EmbeddingBackend> SimilarityClassifier<B> {
    pub fn new(backend: B, vocabulary: Vec<String>, template: impl Into<String>) -> Self {
        Self {
            backend,
            vocabulary,
            template: template.into(),
        }
    }

    fn score(&self, image_embedding: &[f32], text_embeddings: &[Vec<f32>]) -> ClassifyOutcome {
        let scores = cosine_scores(image_embedding, text_embeddings);
        let best = argmax(&scores).ok_or_else(|| SkipReason::Backend("語彙が空です".into()))?;

        Ok(Classification {
            label: self.vocabulary[best].clone(),
            score: Some(scores[best]),
            scores: Some(scores),
        })
    }

    async fn encode_prompts(&self, semantic_category: &str) -> Result<Vec<Vec<f32>>, SkipReason> {
        let prompts = build_text_prompts(&self.template, semantic_category, &self.vocabulary);
        let embeddings = self
            .backend
            .encode_texts(&prompts)
            .await
            .map_err(|e| SkipReason::Backend(e.to_string()))?;

        if embeddings.len() != prompts.len() {
            return Err(SkipReason::BatchMismatch {
                expected: prompts.len(),
                actual: embeddings.len(),
            });
        }
        Ok(embeddings)
    }
}

impl<B: EmbeddingBackend> PatchClassifier for SimilarityClassifier<B> {
    fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    async fn classify(&self, patch: &PatchInput) -> ClassifyOutcome {
        self.classify_batch(std::slice::from_ref(patch))
            .await
            .pop()
            .unwrap_or_else(|| Err(SkipReason::Backend("結果がありません".into())))
    }

    async fn classify_batch(&self, patches: &[PatchInput]) -> Vec<ClassifyOutcome> {
        let mut outcomes: Vec<Option<ClassifyOutcome>> = vec![None; patches.len()];

        // 画像読み込み（失敗はその項目だけスキップ）
        let mut positions = Vec::new();
        let mut images: Vec<DynamicImage> = Vec::new();
        for (i, patch) in patches.iter().enumerate() {
            match image::open(&patch.path) {
                Ok(img) => {
                    positions.push(i);
                    images.push(img);
                }
                Err(e) => {
                    outcomes[i] = Some(Err(SkipReason::ImageLoad(format!("{}: {}", patch.path.display(), e))));
                }
            }
        }

        if !images.is_empty() {
            match self.backend.encode_images(&images).await {
                Err(e) => {
                    let reason = SkipReason::Backend(e.to_string());
                    for &i in &positions {
                        outcomes[i] = Some(Err(reason.clone()));
                    }
                }
                Ok(embeddings) if embeddings.len() != images.len() => {
                    let reason = SkipReason::BatchMismatch {
                        expected: images.len(),
                        actual: embeddings.len(),
                    };
                    for &i in &positions {
                        outcomes[i] = Some(Err(reason.clone()));
                    }
                }
                Ok(embeddings) => {
                    let mut prompt_cache: HashMap<String, Result<Vec<Vec<f32>>, SkipReason>> = HashMap::new();

                    for (&i, embedding) in positions.iter().zip(&embeddings) {
                        let semantic = patches[i].semantic_category.as_str();
                        if !prompt_cache.contains_key(semantic) {
                            debug!("プロンプトを埋め込み: semantic='{}'", semantic);
                            let encoded = self.encode_prompts(semantic).await;
                            prompt_cache.insert(semantic.to_string(), encoded);
                        }

                        outcomes[i] = Some(match prompt_cache.get(semantic) {
                            Some(Ok(text_embeddings)) => self.score(embedding, text_embeddings),
                            Some(Err(reason)) => Err(reason.clone()),
                            None => Err(SkipReason::Backend("プロンプト埋め込みがありません".into())),
                        });
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err(SkipReason::Backend("結果がありません".into()))))
            .collect()
    }
}
