#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::time::Duration;

use anyhow::Result;
use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest},
};

use super::engine::Completion;
use crate::config::LlmConfig;

/// Inference failures.
#[derive(thiserror::Error, Debug)]
pub enum CompletionError {
    /// The API call failed.
    #[error("Inference request failed: {0}")]
    Api(#[from] OpenAIError),
    /// The call did not finish in time.
    #[error("Inference request timed out after {0:?}")]
    Timeout(Duration),
    /// The model returned no text.
    #[error("The model returned an empty response")]
    Empty,
}

/// Completion client for an OpenAI-compatible chat endpoint (Ollama's `/v1`
/// by default).
pub struct OpenAiCompletion {
    /// API client.
    client:      OpenAIClient<OpenAIConfig>,
    /// Model identifier.
    model:       String,
    /// Sampling temperature.
    temperature: f32,
    /// Maximum generated tokens.
    max_tokens:  u32,
    /// Per-call timeout.
    timeout:     Duration,
}

impl OpenAiCompletion {
    /// Creates a client from the inference settings.
    pub fn new(config: &LlmConfig) -> Self {
        let client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_base(config.endpoint.clone())
                .with_api_key(config.api_key.clone()),
        );
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout,
        }
    }

    /// Returns the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends one chat request carrying `prompt` as the user message.
    #[allow(deprecated)]
    async fn request(&self, prompt: &str) -> Result<String, CompletionError> {
        let messages = vec![
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()?
                .into(),
        ];

        let chat = self.client.chat();
        let call = chat.create(CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
            // Ollama's compatibility layer reads `max_tokens`.
            max_tokens: Some(self.max_tokens),
            n: Some(1),
            stream: Some(false),
            ..Default::default()
        });
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| CompletionError::Timeout(self.timeout))??;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::Empty)
    }
}

impl Completion for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(self.request(prompt).await?)
    }
}
