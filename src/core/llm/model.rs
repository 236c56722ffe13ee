use async_trait::async_trait;
use thiserror::Error;

/// Errors a backend can report for a single generation request
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Connection failure, DNS, TLS and the like
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API answered with a non-success status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The transport response didn't have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request timed out")]
    Timeout,

    /// Missing credentials or an unusable provider setup
    #[error("configuration error: {0}")]
    Config(String),
}

impl ModelError {
    /// Whether repeating the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Http(_) | ModelError::Malformed(_) | ModelError::Timeout => true,
            ModelError::RateLimited { .. } => true,
            ModelError::Api { status, .. } => *status >= 500 || *status == 408,
            ModelError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelError::Timeout
        } else if err.is_decode() {
            ModelError::Malformed(err.to_string())
        } else {
            ModelError::Http(err.to_string())
        }
    }
}

/// A text generation backend: prompt in, text out
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for a single user prompt
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;

    /// Get the provider name (e.g., "OpenAI", "Anthropic")
    fn provider_name(&self) -> &str;

    /// Get the model name being used
    fn model_name(&self) -> &str;
}
