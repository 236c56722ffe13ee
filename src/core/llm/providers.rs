use std::sync::Arc;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{TutorError, Result};
use crate::config::LlmConfig;
use super::model::{LanguageModel, ModelError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Factory function to create the appropriate backend based on config
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        _ => Err(TutorError::Config(
            format!("Unsupported LLM provider: {}", config.provider)
        )),
    }
}

fn resolve_api_key(config: &LlmConfig, env_var: &str) -> Option<String> {
    config.api_key.clone()
        .or_else(|| std::env::var(env_var).ok())
        .filter(|key| !key.trim().is_empty())
}

/// Maps non-success statuses onto [`ModelError`], keeping `retry-after` for 429s
async fn check_status(response: reqwest::Response) -> std::result::Result<reqwest::Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        return Err(ModelError::RateLimited { retry_after_secs });
    }

    let message = response.text().await.unwrap_or_default();
    Err(ModelError::Api { status: status.as_u16(), message })
}

fn extract_text(body: &Value, pointer: &str, provider: &str) -> std::result::Result<String, ModelError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ModelError::Malformed(format!("{} response has no text at {}", provider, pointer)))
}

/// OpenAI chat completions, or any endpoint speaking the same protocol
pub struct OpenAiProvider {
    config: LlmConfig,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(config, "OPENAI_API_KEY");

        // Self-hosted compatible endpoints usually don't need a key
        if api_key.is_none() && config.base_url.is_none() {
            return Err(TutorError::Config(
                "API key required for OpenAI (set llm.api_key or OPENAI_API_KEY)".to_string()
            ));
        }

        Ok(Self {
            config: config.clone(),
            api_key,
            base_url: config.base_url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, ModelError> {
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "max_tokens": self.config.max_tokens.unwrap_or(8000),
            "temperature": self.config.temperature.unwrap_or(0.3)
        });

        let mut request = self.client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = check_status(request.send().await?).await?;
        let body: Value = response.json().await?;
        extract_text(&body, "/choices/0/message/content", "OpenAI")
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Anthropic Messages API
pub struct AnthropicProvider {
    config: LlmConfig,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(config, "ANTHROPIC_API_KEY").ok_or_else(|| {
            TutorError::Config("API key required for Anthropic (set llm.api_key or ANTHROPIC_API_KEY)".to_string())
        })?;

        Ok(Self {
            config: config.clone(),
            api_key,
            base_url: config.base_url.clone().unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl LanguageModel for AnthropicProvider {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, ModelError> {
        let payload = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens.unwrap_or(8000),
            "temperature": self.config.temperature.unwrap_or(0.3),
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        let response = self.client
            .post(format!("{}/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        let body: Value = check_status(response).await?.json().await?;
        extract_text(&body, "/content/0/text", "Anthropic")
    }

    fn provider_name(&self) -> &str {
        "Anthropic"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Google Gemini generateContent
pub struct GeminiProvider {
    config: LlmConfig,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(config, "GEMINI_API_KEY").ok_or_else(|| {
            TutorError::Config("API key required for Gemini (set llm.api_key or GEMINI_API_KEY)".to_string())
        })?;

        Ok(Self {
            config: config.clone(),
            api_key,
            base_url: config.base_url.clone().unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiProvider {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, ModelError> {
        let payload = json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": {
                "maxOutputTokens": self.config.max_tokens.unwrap_or(8000),
                "temperature": self.config.temperature.unwrap_or(0.3)
            }
        });

        let response = self.client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url.trim_end_matches('/'),
                self.config.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;

        let body: Value = check_status(response).await?.json().await?;
        extract_text(&body, "/candidates/0/content/parts/0/text", "Gemini")
    }

    fn provider_name(&self) -> &str {
        "Gemini"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_unknown_provider_is_config_error() {
        let mut config = Config::default().llm;
        config.provider = "carrier-pigeon".to_string();
        assert!(matches!(create_model(&config), Err(TutorError::Config(_))));
    }

    #[test]
    fn test_openai_compatible_endpoint_without_key() {
        let mut config = Config::default().llm;
        config.api_key = None;
        config.base_url = Some("http://localhost:11434/v1".to_string());
        let model = create_model(&config).unwrap();
        assert_eq!(model.provider_name(), "OpenAI");
        assert_eq!(model.model_name(), "gpt-4o");
    }

    #[test]
    fn test_extract_text_reports_missing_content() {
        let body = json!({ "choices": [] });
        let err = extract_text(&body, "/choices/0/message/content", "OpenAI").unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));

        let body = json!({ "content": [ { "type": "text", "text": "hello" } ] });
        assert_eq!(extract_text(&body, "/content/0/text", "Anthropic").unwrap(), "hello");
    }
}
