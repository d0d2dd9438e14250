use thiserror::Error;

#[derive(Error, Debug)]
pub enum InteractionError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("APIキーが設定されていません。`xr-interaction config --set-api-key YOUR_KEY` で設定してください")]
    MissingApiKey,

    #[error("ファイルが見つかりません: {0}")]
    FileNotFound(String),

    #[error("フォルダが見つかりません: {0}")]
    FolderNotFound(String),

    #[error("API呼び出しエラー: {0}")]
    ApiCall(String),

    #[error("APIレスポンスのパースに失敗: {0}")]
    ApiParse(String),

    #[error("アノテーションが不正: {0}")]
    InvalidAnnotations(String),

    #[error("Excel生成エラー: {0}")]
    Excel(String),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSVエラー: {0}")]
    Csv(#[from] csv::Error),

    #[error("画像処理エラー: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTPエラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Common(#[from] xr_interaction_common::Error),
}

pub type Result<T> = std::result::Result<T, InteractionError>;
