//! チャットAPIの返答パーサー
//!
//! 自由記述の返答を正規化し、閉じた語彙のどれかに一致する場合だけ採用する。

/// 返答から取り除く装飾文字
const DECORATION_CHARS: &[char] = &['"', '\'', '`', '{', '}', '[', ']', '*'];

/// ラベルを比較用に正規化
///
/// 前後の空白を除去し、小文字化する。
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// 返答の1行目を取り出し、装飾（引用符・バッククォート・波括弧・末尾の句読点）を除去して正規化
pub fn clean_reply(reply: &str) -> String {
    let first_line = reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    let stripped = first_line
        .trim_matches(|c: char| DECORATION_CHARS.contains(&c) || c.is_whitespace())
        .trim_end_matches(['.', '。', ',', ';', ':'])
        .trim_matches(|c: char| DECORATION_CHARS.contains(&c) || c.is_whitespace());

    normalize_label(stripped)
}

/// 返答を語彙に照合
///
/// 一致した場合は語彙側の表記（元の大文字小文字）を返す。一致しない場合は `None`。
///
/// # Examples
/// ```
/// use xr_interaction_common::parse_category_reply;
///
/// let vocab = vec!["Grab".to_string(), "shoot".to_string()];
/// assert_eq!(parse_category_reply(" grab.\n", &vocab), Some("Grab"));
/// assert_eq!(parse_category_reply("I think it is grab", &vocab), None);
/// ```
pub fn parse_category_reply<'a>(reply: &str, vocabulary: &'a [String]) -> Option<&'a str> {
    let cleaned = clean_reply(reply);
    if cleaned.is_empty() {
        return None;
    }

    vocabulary
        .iter()
        .find(|label| normalize_label(label) == cleaned)
        .map(String::as_str)
}
