//! Model access for the deep-analysis tier.
//!
//! [`LlmProvider`] is the seam: the Anthropic Messages API in production,
//! [`MockProvider`] in tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport failure: {0}")]
    Transport(String),

    /// Non-2xx answer. A 429 carries its `retry-after` in the message.
    #[error("provider answered {status}: {message}")]
    Api { status: u16, message: String },

    /// The reply did not have the shape the caller needed.
    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("provider timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Sampling parameters for one review request.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// Text the model produced, concatenated across content blocks.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, messages: &[LlmMessage], params: &ModelParams) -> Result<Completion, LlmError>;

    fn name(&self) -> &str;
}

/// Anthropic Messages API over `reqwest`.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a LlmMessage>,
}

impl<'a> MessagesRequest<'a> {
    /// The API takes system text as a top-level field, never as a turn.
    fn new(messages: &'a [LlmMessage], params: &'a ModelParams) -> Self {
        let (system, turns): (Vec<&LlmMessage>, Vec<&LlmMessage>) =
            messages.iter().partition(|m| m.role == Role::System);
        let system = (!system.is_empty()).then(|| {
            system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        });
        Self {
            model: &params.model,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system,
            messages: turns,
        }
    }
}

#[derive(Deserialize)]
struct MessagesReply {
    model: String,
    #[serde(default)]
    content: Vec<ReplyBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl AnthropicProvider {
    /// `timeout` is applied on the client as well, so a hung connection is
    /// dropped even if the caller's own deadline is missed.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api_key: api_key.into() })
    }

    /// `None` when `ANTHROPIC_API_KEY` is unset or blank.
    pub fn from_env(timeout: Duration) -> Option<Self> {
        let key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        if key.trim().is_empty() {
            return None;
        }
        Self::new(key, timeout).ok()
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, messages: &[LlmMessage], params: &ModelParams) -> Result<Completion, LlmError> {
        let resp = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&MessagesRequest::new(messages, params))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.text().await.unwrap_or_default();
            let message = match retry_after {
                Some(secs) => format!("{body} (retry after {secs}s)"),
                None => body,
            };
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        let reply: MessagesReply = resp.json().await.map_err(|e| LlmError::Malformed(e.to_string()))?;
        let text = reply
            .content
            .into_iter()
            .filter_map(|block| match block {
                ReplyBlock::Text { text } => Some(text),
                ReplyBlock::Other => None,
            })
            .collect();
        Ok(Completion { text, model: reply.model })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Scripted provider. Each call takes the next queued outcome; once the
/// queue is empty it answers with an empty JSON report.
#[derive(Clone, Default)]
pub struct MockProvider {
    script: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
    seen: Arc<Mutex<Vec<Vec<LlmMessage>>>>,
    delay: Option<Duration>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        guard(&self.script).push_back(Ok(text.into()));
        self
    }

    pub fn with_error(self, error: LlmError) -> Self {
        guard(&self.script).push_back(Err(error));
        self
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn captured_requests(&self) -> Vec<Vec<LlmMessage>> {
        guard(&self.seen).clone()
    }

    pub fn call_count(&self) -> usize {
        guard(&self.seen).len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(&self, messages: &[LlmMessage], params: &ModelParams) -> Result<Completion, LlmError> {
        guard(&self.seen).push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = guard(&self.script).pop_front();
        let text = match outcome {
            Some(result) => result?,
            None => "{}".to_string(),
        };
        Ok(Completion { text, model: params.model.clone() })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_text_moves_to_top_level() {
        let messages = [
            LlmMessage::system("Review this."),
            LlmMessage::system("JSON only."),
            LlmMessage::user("fn main() {}"),
        ];
        let params = ModelParams::default();
        let body = serde_json::to_value(MessagesRequest::new(&messages, &params)).unwrap();
        assert_eq!(body["system"], "Review this.\nJSON only.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn no_system_field_without_system_messages() {
        let messages = [LlmMessage::user("hi")];
        let params = ModelParams::default();
        let body = serde_json::to_value(MessagesRequest::new(&messages, &params)).unwrap();
        assert!(body.get("system").is_none());
    }

    #[test]
    fn reply_keeps_only_text_blocks() {
        let reply: MessagesReply = serde_json::from_str(
            r#"{"model":"m","content":[{"type":"text","text":"{\"a\":"},{"type":"tool_use","id":"x"},{"type":"text","text":"1}"}]}"#,
        )
        .unwrap();
        let text: String = reply
            .content
            .into_iter()
            .filter_map(|b| match b {
                ReplyBlock::Text { text } => Some(text),
                ReplyBlock::Other => None,
            })
            .collect();
        assert_eq!(text, "{\"a\":1}");
    }

    #[tokio::test]
    async fn mock_follows_script_then_answers_empty_report() {
        let mock = MockProvider::new()
            .with_response("first")
            .with_error(LlmError::Timeout);
        let params = ModelParams::default();
        let msgs = [LlmMessage::user("hi")];

        assert_eq!(mock.complete(&msgs, &params).await.unwrap().text, "first");
        assert!(matches!(mock.complete(&msgs, &params).await, Err(LlmError::Timeout)));
        assert_eq!(mock.complete(&msgs, &params).await.unwrap().text, "{}");
        assert_eq!(mock.call_count(), 3);
    }
}
