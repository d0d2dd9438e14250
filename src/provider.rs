use clap::ValueEnum;

/// 分類バックエンド
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ClassifierProvider {
    /// 埋め込み類似度（CLIP系エンコーダ）
    Clip,
    /// マルチモーダルチャットAPI
    Chat,
}

impl ClassifierProvider {
    pub fn display_name(&self) -> &'static str {
        match self {
            ClassifierProvider::Clip => "clip",
            ClassifierProvider::Chat => "chat",
        }
    }

    /// スコア分布（類似度CSV）を出力できるか
    pub fn has_score_vector(&self) -> bool {
        matches!(self, ClassifierProvider::Clip)
    }
}

impl std::fmt::Display for ClassifierProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
