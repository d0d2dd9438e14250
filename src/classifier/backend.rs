//! 推論バックエンドとのHTTP通信
//!
//! - 埋め込みサーバ: `POST {endpoint}/encode/image`, `POST {endpoint}/encode/text`
//! - チャットAPI: OpenAI互換の chat completions

use crate::error::{InteractionError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// 画像・テキストを埋め込みベクトルに変換するバックエンド
pub trait EmbeddingBackend: Send + Sync {
    /// 画像をまとめて埋め込み（戻り値は入力と同じ順序）
    fn encode_images(&self, images: &[DynamicImage]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;

    fn encode_texts(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;
}

/// 画像と指示文から自由記述の返答を得るバックエンド
pub trait ChatBackend: Send + Sync {
    /// `image_base64` は画像ファイルの内容をそのままBase64にしたもの
    fn complete(&self, image_base64: &str, instruction: &str) -> impl Future<Output = Result<String>> + Send;
}

fn build_client(timeout_seconds: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()?)
}

/// 非2xxの応答をエラーに変換
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InteractionError::ApiCall(format!("HTTP {}: {}", status, body)))
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    images: &'a [String],
}

#[derive(Serialize)]
struct TextRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// 画像をPNGにエンコードしてBase64化
pub fn encode_png_base64(image: &DynamicImage) -> Result<String> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(STANDARD.encode(&buffer))
}

/// HTTP経由の埋め込みサーバ
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEmbeddingBackend {
    pub fn new(endpoint: &str, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_seconds)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}{}", self.endpoint, path);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        let response = check_status(response).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| InteractionError::ApiParse(format!("{}: {}", url, e)))?;
        Ok(parsed.embeddings)
    }
}

impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn encode_images(&self, images: &[DynamicImage]) -> Result<Vec<Vec<f32>>> {
        let encoded = images
            .iter()
            .map(encode_png_base64)
            .collect::<Result<Vec<String>>>()?;
        self.post("/encode/image", &ImageRequest { images: &encoded }).await
    }

    async fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.post("/encode/text", &TextRequest { texts }).await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// チャットAPIのリクエストボディを生成
fn chat_request_body<'a>(model: &'a str, image_base64: &'a str, instruction: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: image_base64 },
                },
                ContentPart::Text { text: instruction },
            ],
        }],
    }
}

/// HTTP経由のチャットAPI
pub struct HttpChatBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpChatBackend {
    pub fn new(endpoint: &str, model: &str, api_key: String, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_seconds)?,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
        })
    }
}

impl ChatBackend for HttpChatBackend {
    async fn complete(&self, image_base64: &str, instruction: &str) -> Result<String> {
        let body = chat_request_body(&self.model, image_base64, instruction);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| InteractionError::ApiParse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InteractionError::ApiParse("choices[0].message.content がありません".into()))
    }
}
