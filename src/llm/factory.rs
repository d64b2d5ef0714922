//! LLM client factory.
//!
//! Resolves a single configured provider (`AppConfig::llm_provider`) into a
//! boxed [`LlmClient`]. Unlike a REPL, this service does not switch providers
//! at runtime — the provider is fixed for the process lifetime.

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::llm::{AnthropicClient, AnthropicConfig, LlmClient, MockLlmClient};

/// Builds the configured LLM client from `AppConfig`.
pub fn create_client(config: &AppConfig) -> Result<Box<dyn LlmClient>> {
    match config.llm_provider.as_str() {
        "anthropic" => {
            let key = config.llm_api_key().ok_or_else(|| {
                AppError::config("ANTHROPIC_API_KEY must be set when llm_provider = \"anthropic\"")
            })?;
            Ok(Box::new(AnthropicClient::new(AnthropicConfig::new(
                key,
                config.llm_model.clone(),
            ))?))
        }
        "mock" => Ok(Box::new(MockLlmClient::new())),
        other => Err(AppError::config(format!("unknown llm_provider: {other}"))),
    }
}
