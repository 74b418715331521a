use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use coachdesk_core::domain::decision::TokenUsage;
use coachdesk_core::outputs::DecisionOutput;

use super::{
    validate_structured, ChatMessage, InferenceProvider, ProviderError, StructuredCompletion,
    TextCompletion,
};

const TEXT_KEY: &str = "__text__";

#[derive(Clone, Debug)]
enum ScriptedReply {
    Output { body: Value, usage: TokenUsage },
    Text { text: String, usage: TokenUsage },
    Failure(ProviderError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScriptedCall {
    /// Schema title of the requested output, e.g. `BidEvaluation`
    pub output: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Deterministic provider for tests and dry runs.
///
/// Replies are queued per output type (keyed by the schema title). The last reply queued
/// for a type is sticky, so one scripted email covers every personalization call in a
/// stage. Structured replies still go through schema validation.
pub struct ScriptedProvider {
    name: String,
    model: String,
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedProvider {
    pub const DEFAULT_USAGE: TokenUsage = TokenUsage { prompt_tokens: 1_000, completion_tokens: 200 };

    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond<T: DecisionOutput>(self, body: Value) -> Self {
        self.respond_with_usage::<T>(body, Self::DEFAULT_USAGE)
    }

    pub fn respond_with_usage<T: DecisionOutput>(self, body: Value, usage: TokenUsage) -> Self {
        self.push(output_key::<T>(), ScriptedReply::Output { body, usage })
    }

    pub fn fail<T: DecisionOutput>(self, error: ProviderError) -> Self {
        self.push(output_key::<T>(), ScriptedReply::Failure(error))
    }

    pub fn respond_text(self, text: impl Into<String>) -> Self {
        self.push(
            TEXT_KEY.to_string(),
            ScriptedReply::Text { text: text.into(), usage: Self::DEFAULT_USAGE },
        )
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub fn calls_for<T: DecisionOutput>(&self) -> usize {
        let key = output_key::<T>();
        self.calls().iter().filter(|call| call.output == key).count()
    }

    /// Queues a reply after construction, for outputs that reference ids created mid-run.
    pub fn push_response<T: DecisionOutput>(&self, body: Value) {
        self.enqueue_reply(output_key::<T>(), ScriptedReply::Output { body, usage: Self::DEFAULT_USAGE });
    }

    fn push(self, key: String, reply: ScriptedReply) -> Self {
        self.enqueue_reply(key, reply);
        self
    }

    fn enqueue_reply(&self, key: String, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(key).or_default().push_back(reply);
        }
    }

    fn next_reply(&self, key: &str, model: &str, messages: &[ChatMessage]) -> Option<ScriptedReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ScriptedCall {
                output: key.to_string(),
                model: model.to_string(),
                messages: messages.to_vec(),
            });
        }

        let mut replies = self.replies.lock().ok()?;
        let queue = replies.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn structured_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<StructuredCompletion, ProviderError> {
        let key = schema_title(schema);
        match self.next_reply(&key, model, messages) {
            Some(ScriptedReply::Output { body, usage }) => {
                validate_structured(schema, &body)?;
                Ok(StructuredCompletion { parsed: body, usage, latency_ms: 5, model: model.to_string() })
            }
            Some(ScriptedReply::Failure(error)) => Err(error),
            Some(ScriptedReply::Text { .. }) | None => {
                Err(ProviderError::Unavailable(format!("no scripted reply for {key}")))
            }
        }
    }

    async fn text_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TextCompletion, ProviderError> {
        match self.next_reply(TEXT_KEY, model, messages) {
            Some(ScriptedReply::Text { text, usage }) => {
                Ok(TextCompletion { text, usage, latency_ms: 5, model: model.to_string() })
            }
            Some(ScriptedReply::Failure(error)) => Err(error),
            Some(ScriptedReply::Output { .. }) | None => {
                Err(ProviderError::Unavailable("no scripted text reply".to_string()))
            }
        }
    }
}

fn output_key<T: DecisionOutput>() -> String {
    schema_title(&T::output_schema())
}

fn schema_title(schema: &Value) -> String {
    schema.get("title").and_then(Value::as_str).unwrap_or("untitled").to_string()
}
