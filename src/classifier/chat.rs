//! マルチモーダルチャットAPIによる分類

use super::backend::ChatBackend;
use super::{Classification, ClassifyOutcome, PatchClassifier, PatchInput, SkipReason};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;
use xr_interaction_common::{build_chat_instruction, parse_category_reply};

pub struct ChatClassifier<T> {
    backend: T,
    vocabulary: Vec<String>,
    instruction: String,
}

impl<T: ChatBackend> ChatClassifier<T> {
    pub fn new(backend: T, vocabulary: Vec<String>) -> Self {
        let instruction = build_chat_instruction(&vocabulary);
        Self {
            backend,
            vocabulary,
            instruction,
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }
}

impl<T: ChatBackend> PatchClassifier for ChatClassifier<T> {
    fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    async fn classify(&self, patch: &PatchInput) -> ClassifyOutcome {
        let bytes = tokio::fs::read(&patch.path)
            .await
            .map_err(|e| SkipReason::ImageLoad(format!("{}: {}", patch.path.display(), e)))?;
        let image_base64 = STANDARD.encode(&bytes);

        let reply = self
            .backend
            .complete(&image_base64, &self.instruction)
            .await
            .map_err(|e| SkipReason::Backend(e.to_string()))?;
        debug!("patch {}: reply='{}'", patch.patch_id, reply.trim());

        match parse_category_reply(&reply, &self.vocabulary) {
            Some(label) => Ok(Classification {
                label: label.to_string(),
                score: None,
                scores: None,
            }),
            None => Err(SkipReason::UnexpectedCategory(reply.trim().to_string())),
        }
    }
}
