//! Inference provider seam.
//!
//! Everything the executor knows about a model lives behind [`InferenceProvider`]: a chat
//! transcript goes in, a schema-validated JSON object (or plain text) comes out with token
//! usage and latency attached. Adapters never retry; that is the executor's job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use coachdesk_core::config::LlmConfig;
use coachdesk_core::domain::decision::TokenUsage;

pub mod openai;
pub mod scripted;

pub use openai::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
pub use scripted::{ScriptedCall, ScriptedProvider};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructuredCompletion {
    pub parsed: Value,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub model: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextCompletion {
    pub text: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub model: String,
}

/// Every variant is retryable from the executor's point of view.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider timed out")]
    Timeout,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed output: {0}")]
    MalformedOutput(String),
    #[error("output violates schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Provider key used for cost attribution and budgets (`openai`, `ollama`, ...).
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    async fn structured_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<StructuredCompletion, ProviderError>;

    async fn text_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TextCompletion, ProviderError>;
}

/// Checks a decoded provider payload against the JSON schema it was asked to follow.
pub fn validate_structured(schema: &Value, instance: &Value) -> Result<(), ProviderError> {
    if !instance.is_object() {
        return Err(ProviderError::MalformedOutput("expected a JSON object".to_string()));
    }

    let validator = jsonschema::validator_for(schema)
        .map_err(|error| ProviderError::MalformedOutput(format!("unusable schema: {error}")))?;
    let violations: Vec<String> =
        validator.iter_errors(instance).map(|error| error.to_string()).collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ProviderError::SchemaViolation(violations))
    }
}

/// Builds the configured network adapter.
pub fn provider_from_config(
    config: &LlmConfig,
) -> Result<Arc<dyn InferenceProvider>, ProviderError> {
    let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig::from_llm_config(config))?;
    Ok(Arc::new(provider))
}
