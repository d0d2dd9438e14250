use crate::error::{InteractionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xr_interaction_common::{DEFAULT_BBOX_TOLERANCE, DEFAULT_PROMPT_TEMPLATE};

/// APIキーを上書きする環境変数
pub const API_KEY_ENV: &str = "ZHIPUAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub chat_endpoint: String,
    pub chat_model: String,
    pub embedding_endpoint: String,
    pub prompt_template: String,
    pub default_batch_size: usize,
    pub timeout_seconds: u64,
    pub bbox_tolerance: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            chat_endpoint: "https://open.bigmodel.cn/api/paas/v4/chat/completions".into(),
            chat_model: "glm-4v".into(),
            embedding_endpoint: "http://127.0.0.1:8000".into(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.into(),
            default_batch_size: 32,
            timeout_seconds: 120,
            bbox_tolerance: DEFAULT_BBOX_TOLERANCE,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// 指定パスから読み込み（存在しなければデフォルト）
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| InteractionError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("xr-interaction").join("config.json"))
    }

    fn validate(&self) -> Result<()> {
        if self.default_batch_size == 0 {
            return Err(InteractionError::Config("default_batch_size は1以上にしてください".into()));
        }
        if self.bbox_tolerance.is_nan() || self.bbox_tolerance < 0.0 {
            return Err(InteractionError::Config(format!(
                "bbox_tolerance が不正です: {}",
                self.bbox_tolerance
            )));
        }
        Ok(())
    }

    pub fn get_api_key(&self) -> Result<String> {
        // 環境変数を優先
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }

        self.api_key.clone().ok_or(InteractionError::MissingApiKey)
    }

    pub fn set_api_key(&mut self, key: String) -> Result<()> {
        self.api_key = Some(key);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_returns_default() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.default_batch_size, 32);
        assert_eq!(config.bbox_tolerance, 0.1);
        assert_eq!(config.prompt_template, DEFAULT_PROMPT_TEMPLATE);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"chat_model": "glm-4v-plus", "bbox_tolerance": 0.2}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.chat_model, "glm-4v-plus");
        assert_eq!(config.bbox_tolerance, 0.2);
        assert_eq!(config.timeout_seconds, 120);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.embedding_endpoint = "http://localhost:9000".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.embedding_endpoint, "http://localhost:9000");
    }

    #[test]
    fn test_invalid_batch_size_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"default_batch_size": 0}"#).unwrap();

        let result = Config::load_from(&path);
        assert!(matches!(result, Err(InteractionError::Config(_))));
    }

    #[test]
    fn test_corrupt_config_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(Config::load_from(&path), Err(InteractionError::JsonParse(_))));
    }
}
