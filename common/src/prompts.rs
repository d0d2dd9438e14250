//! プロンプト生成モジュール
//!
//! - build_text_prompts: 埋め込み類似度用（カテゴリごとに1文）
//! - build_chat_instruction: マルチモーダルチャット用（閉じた語彙を列挙）

/// 類似度プロンプトのデフォルトテンプレート
///
/// `{semantic}` は物体のセマンティックカテゴリ、`{interaction}` は候補のインタラクションカテゴリに置換される。
pub const DEFAULT_PROMPT_TEMPLATE: &str = "A picture of {semantic} that can be {interaction}";

/// 語彙の各カテゴリについてテキストプロンプトを生成
///
/// 戻り値は `vocabulary` と同じ順序・同じ長さ。
pub fn build_text_prompts(template: &str, semantic_category: &str, vocabulary: &[String]) -> Vec<String> {
    vocabulary
        .iter()
        .map(|interaction| {
            template
                .replace("{semantic}", semantic_category)
                .replace("{interaction}", interaction)
        })
        .collect()
}

/// チャットAPI用の分類指示文を生成
pub fn build_chat_instruction(vocabulary: &[String]) -> String {
    let categories = vocabulary.join(",");
    let example_first = vocabulary.first().map(String::as_str).unwrap_or("shoot");
    let example_second = vocabulary.get(1).map(String::as_str).unwrap_or(example_first);

    format!(
        "This is a picture of an interactable object in an XR Game. \
         Predict the interaction category for the given image and return the category name only. \
         The output must be one of the following categories: {{{categories}}} \
         Example return 1: {example_first},Example return 2: {example_second}"
    )
}
