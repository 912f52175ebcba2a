//! Natural-language explanations of medical and insurance terms, answered by an
//! external language model.

use async_trait::async_trait;
use thiserror::Error;

pub mod gemini;

pub use gemini::GeminiClient;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Language model service failed: {0}")]
    ExternalService(String),
    #[error("Language model returned no text")]
    EmptyResponse,
    #[error("No API key configured; set [assistant] api_key or GEMINI_API_KEY")]
    MissingApiKey,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn explain(&self, prompt: &str) -> Result<String, AssistantError>;
}
