use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use coachdesk_core::config::{LlmConfig, LlmProvider};
use coachdesk_core::domain::decision::TokenUsage;

use super::{
    validate_structured, ChatMessage, InferenceProvider, ProviderError, StructuredCompletion,
    TextCompletion,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct OpenAiCompatibleConfig {
    pub provider_name: String,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiCompatibleConfig {
    pub fn from_llm_config(config: &LlmConfig) -> Self {
        let default_base = match config.provider {
            LlmProvider::OpenAi => OPENAI_BASE_URL,
            LlmProvider::Ollama => OLLAMA_BASE_URL,
        };

        Self {
            provider_name: config.provider.as_str().to_string(),
            base_url: config.base_url.clone().unwrap_or_else(|| default_base.to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Chat-completions adapter for OpenAI and any server speaking the same protocol (Ollama,
/// vLLM). Structured calls use `response_format: json_schema` and are validated locally as
/// well, since local servers treat the schema as a hint.
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(config.timeout)
            .build()
            .map_err(|error| ProviderError::Unavailable(format!("http client: {error}")))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<(CompletionResponse, u64), ProviderError> {
        let started = Instant::now();
        let mut builder = self.client.post(self.endpoint()).json(request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited(truncate(&body)));
        }
        if !status.is_success() {
            return Err(ProviderError::Status { status: status.as_u16(), body: truncate(&body) });
        }

        let decoded = serde_json::from_str::<CompletionResponse>(&body)
            .map_err(|error| ProviderError::MalformedOutput(format!("response envelope: {error}")))?;

        debug!(
            event_name = "llm.completion_received",
            provider = %self.config.provider_name,
            latency_ms,
            "provider responded"
        );
        Ok((decoded, latency_ms))
    }
}

#[async_trait]
impl InferenceProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.provider_name
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn structured_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<StructuredCompletion, ProviderError> {
        let request = CompletionRequest {
            model,
            messages,
            temperature: 0.2,
            response_format: Some(json!({
                "type": "json_schema",
                "json_schema": { "name": "decision_output", "schema": schema, "strict": false }
            })),
        };
        let (response, latency_ms) = self.send(&request).await?;

        let content = first_content(&response)?;
        let parsed: Value = serde_json::from_str(strip_code_fence(content))
            .map_err(|error| ProviderError::MalformedOutput(format!("not JSON: {error}")))?;
        validate_structured(schema, &parsed)?;

        Ok(StructuredCompletion {
            parsed,
            usage: usage_of(&response),
            latency_ms,
            model: response.model.clone().unwrap_or_else(|| model.to_string()),
        })
    }

    async fn text_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TextCompletion, ProviderError> {
        let request = CompletionRequest { model, messages, temperature: 0.7, response_format: None };
        let (response, latency_ms) = self.send(&request).await?;

        Ok(TextCompletion {
            text: first_content(&response)?.to_string(),
            usage: usage_of(&response),
            latency_ms,
            model: response.model.clone().unwrap_or_else(|| model.to_string()),
        })
    }
}

fn map_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(error.to_string())
    }
}

fn first_content(response: &CompletionResponse) -> Result<&str, ProviderError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_deref())
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ProviderError::MalformedOutput("empty completion".to_string()))
}

fn usage_of(response: &CompletionResponse) -> TokenUsage {
    response
        .usage
        .as_ref()
        .map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
        .unwrap_or_default()
}

/// Local models sometimes wrap JSON in a markdown fence despite `response_format`.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(body: &str) -> String {
    body.chars().take(300).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coachdesk_core::config::{AppConfig, LlmProvider};

    use super::{strip_code_fence, OpenAiCompatibleConfig, OpenAiCompatibleProvider};
    use crate::llm::InferenceProvider;

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn base_url_defaults_follow_the_provider() {
        let mut config = AppConfig::default().llm;
        config.base_url = None;

        config.provider = LlmProvider::OpenAi;
        let openai = OpenAiCompatibleConfig::from_llm_config(&config);
        assert_eq!(openai.base_url, "https://api.openai.com/v1");
        assert_eq!(openai.provider_name, "openai");

        config.provider = LlmProvider::Ollama;
        let ollama = OpenAiCompatibleConfig::from_llm_config(&config);
        assert_eq!(ollama.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn provider_reports_its_identity() {
        let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig {
            provider_name: "ollama".to_string(),
            base_url: "http://localhost:11434/v1/".to_string(),
            api_key: None,
            model: "llama3.1".to_string(),
            timeout: Duration::from_secs(5),
        })
        .expect("client builds");

        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.default_model(), "llama3.1");
        assert_eq!(provider.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
