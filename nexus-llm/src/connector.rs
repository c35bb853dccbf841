//! Model connectors.
//!
//! A connector owns the wire protocol for one model endpoint. The dispatcher
//! treats connectors uniformly through [`ModelConnector`]; capability sets
//! drive selection filtering.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use nexus_core::error::{NexusError, Result};
use nexus_engine::prompt::{Prompt, Role};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Identity and advertised capabilities of a model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub capabilities: HashSet<String>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, capabilities: &[&str]) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

/// One element of a streamed response: text deltas, then a terminal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseChunk {
    Delta { text: String },
    Done { tokens_used: usize },
}

/// A model endpoint the dispatcher can execute against.
#[async_trait]
pub trait ModelConnector: Send + Sync + std::fmt::Debug {
    /// Identity and capabilities
    fn info(&self) -> ModelInfo;

    /// Execute the prompt and return the full response text
    async fn send(&self, prompt: &Prompt, options: &LlmOptions) -> Result<String>;

    /// Execute the prompt as a lazy finite chunk sequence. The default wraps
    /// `send` into one delta plus the terminal record.
    async fn send_stream(
        &self,
        prompt: &Prompt,
        options: &LlmOptions,
    ) -> Result<BoxStream<'static, Result<ResponseChunk>>> {
        let text = self.send(prompt, options).await?;
        let tokens_used = (prompt.text_len() + text.len()) / 4;
        let chunks = vec![
            Ok(ResponseChunk::Delta { text }),
            Ok(ResponseChunk::Done { tokens_used }),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

// ============================================================================
// OpenAI-compatible HTTP connector
// ============================================================================

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
        }
    }
}

/// Connector for OpenAI-compatible chat and completion APIs.
#[derive(Debug)]
pub struct OpenAiConnector {
    client: reqwest::Client,
    config: OpenAiConfig,
    info: ModelInfo,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

impl OpenAiConnector {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| NexusError::config("OpenAI API key not configured"))?;

        let mut headers = reqwest::header::HeaderMap::new();
        let auth_header = format!("Bearer {}", api_key)
            .parse()
            .map_err(|e| NexusError::config(format!("Invalid authorization header: {}", e)))?;
        headers.insert("Authorization", auth_header);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()
            .map_err(|e| NexusError::config(format!("HTTP client build failed: {}", e)))?;

        let info = ModelInfo::new(&config.model, &["chat", "completion", "streaming"]);
        Ok(Self {
            client,
            config,
            info,
        })
    }

    async fn send_chat(&self, prompt: &Prompt, options: &LlmOptions) -> Result<String> {
        let Prompt::Chat { messages, .. } = prompt else {
            return self.send_completion(prompt, options).await;
        };

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let url = format!("{}/chat/completions", self.config.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| NexusError::unavailable(format!("chat request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NexusError::unavailable(format!(
                "chat API error {}: {}",
                status, body
            )));
        }

        let response: ChatResponse = response
            .json()
            .await
            .map_err(|e| NexusError::unavailable(format!("chat response decode failed: {}", e)))?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| NexusError::unavailable("chat response carried no choices"))
    }

    async fn send_completion(&self, prompt: &Prompt, options: &LlmOptions) -> Result<String> {
        let text = match prompt {
            Prompt::Completion { text, .. } => text.clone(),
            Prompt::Chat { messages, .. } => messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        };

        let request = CompletionRequest {
            model: self.config.model.clone(),
            prompt: text,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let url = format!("{}/completions", self.config.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| NexusError::unavailable(format!("completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NexusError::unavailable(format!(
                "completion API error {}: {}",
                status, body
            )));
        }

        let response: CompletionResponse = response.json().await.map_err(|e| {
            NexusError::unavailable(format!("completion response decode failed: {}", e))
        })?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| NexusError::unavailable("completion response carried no choices"))
    }
}

#[async_trait]
impl ModelConnector for OpenAiConnector {
    fn info(&self) -> ModelInfo {
        self.info.clone()
    }

    async fn send(&self, prompt: &Prompt, options: &LlmOptions) -> Result<String> {
        debug!(model = %self.config.model, "sending prompt");
        match prompt {
            Prompt::Chat { .. } => self.send_chat(prompt, options).await,
            Prompt::Completion { .. } => self.send_completion(prompt, options).await,
        }
    }
}

// ============================================================================
// Mock connector
// ============================================================================

/// Scriptable in-process connector for tests and standalone mode.
///
/// Responses are served from a queue; when the queue is empty the connector
/// echoes a canned reply. Call counts are observable.
#[derive(Debug)]
pub struct MockConnector {
    info: ModelInfo,
    scripted: Mutex<VecDeque<Result<String>>>,
    fail_always: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockConnector {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            info: ModelInfo::new(id, &["chat", "completion", "streaming"]),
            scripted: Mutex::new(VecDeque::new()),
            fail_always: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.info.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Queue one successful response.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.scripted.lock().push_back(Ok(text.into()));
        self
    }

    /// Queue one failure.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.scripted
            .lock()
            .push_back(Err(NexusError::unavailable(message.into())));
        self
    }

    /// Every call fails, regardless of the queue.
    pub fn failing(mut self) -> Self {
        self.fail_always = true;
        self
    }

    /// Simulate latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `send` invocations observed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelConnector for MockConnector {
    fn info(&self) -> ModelInfo {
        self.info.clone()
    }

    async fn send(&self, _prompt: &Prompt, _options: &LlmOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_always {
            return Err(NexusError::unavailable(format!(
                "{} is configured to fail",
                self.info.id
            )));
        }
        match self.scripted.lock().pop_front() {
            Some(result) => result,
            None => Ok(format!("mock response from {}", self.info.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_engine::prompt::Prompt;

    fn prompt() -> Prompt {
        Prompt::Completion {
            text: "QUESTION: test\n\nANSWER:".to_string(),
            tokens: 4,
            model_type: "mock".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_scripted_then_default() {
        let connector = MockConnector::new("m1").with_response("first");
        assert_eq!(connector.send(&prompt(), &LlmOptions::default()).await.unwrap(), "first");
        assert_eq!(
            connector.send(&prompt(), &LlmOptions::default()).await.unwrap(),
            "mock response from m1"
        );
        assert_eq!(connector.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let connector = MockConnector::new("m1").failing();
        assert!(connector.send(&prompt(), &LlmOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_default_stream_wraps_send() {
        let connector = MockConnector::new("m1").with_response("hello world");
        let mut stream = connector
            .send_stream(&prompt(), &LlmOptions::default())
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, ResponseChunk::Delta { ref text } if text == "hello world"));
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, ResponseChunk::Done { .. }));
        assert!(stream.next().await.is_none());
    }
}
