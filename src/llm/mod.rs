//! LLM integration (C6).
//!
//! A thin trait over chat-completion providers plus two response extractors:
//! [`parser::parse_llm_response`] (markdown-fenced SQL, used by the generator)
//! and [`json_parser::parse_json_response`] (markdown-fenced JSON, used by the
//! intent classifier).

pub mod anthropic;
pub mod factory;
pub mod json_parser;
pub mod mock;
pub mod parser;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use factory::create_client;
pub use json_parser::parse_json_response;
pub use mock::MockLlmClient;
pub use parser::{parse_llm_response, ParsedResponse};
pub use types::{Message, Role};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// Trait for LLM clients that can generate completions.
///
/// Every pipeline stage that calls an LLM (intent, generator, interpreter)
/// goes through this trait so it can run against [`MockLlmClient`] in tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generates a completion for the given messages.
    async fn complete(&self, messages: &[Message]) -> Result<String>;

    /// Generates a streaming completion for the given messages.
    async fn complete_stream(&self, messages: &[Message]) -> Result<BoxStream<'static, Result<String>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_implements_trait() {
        let client: Box<dyn LlmClient> = Box::new(MockLlmClient::new());
        let messages = vec![Message::user("Show me all users")];
        let response = client.complete(&messages).await.unwrap();
        assert!(response.contains("SELECT"));
    }
}
