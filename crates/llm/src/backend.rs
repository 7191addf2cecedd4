//! LLM Backend implementations
//!
//! A single OpenAI-compatible chat completions backend. Responses are
//! streamed over SSE; reasoning deltas (`reasoning_content`) are skipped
//! so only answer text reaches the caller.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::prompt::Message;
use crate::LlmError;
use voice_agent_config::LlmSettings;

/// LLM generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Generated text
    pub text: String,
    /// Content deltas received
    pub tokens: usize,
    /// Time to first content (ms)
    pub time_to_first_token_ms: u64,
    /// Total generation time (ms)
    pub total_time_ms: u64,
    /// Finish reason
    pub finish_reason: FinishReason,
}

/// Finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    /// Receiver went away before the stream ended
    Cancelled,
}

impl FinishReason {
    fn from_api(reason: Option<&str>) -> Self {
        match reason {
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        }
    }
}

/// LLM Backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a response
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError>;

    /// Generate with streaming
    ///
    /// Each content increment is sent on `tx` as it arrives. Returns once
    /// the stream ends or `tx` is closed.
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    /// Check if model is available
    async fn is_available(&self) -> bool;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Configuration for OpenAI-compatible backends
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API endpoint (OpenAI: https://api.openai.com/v1, or any compatible server)
    pub endpoint: String,
    /// API key
    pub api_key: String,
    /// Model name
    pub model: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Temperature (0-2)
    pub temperature: f32,
    /// Top-p sampling
    pub top_p: f32,
    /// Frequency penalty
    pub frequency_penalty: f32,
    /// Request timeout
    pub timeout: Duration,
    /// Retries for requests that fail before streaming starts
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry)
    pub initial_backoff: Duration,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            timeout: Duration::from_secs(300),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl OpenAIConfig {
    /// Create config for OpenAI
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Create config for local OpenAI-compatible server (vLLM, Ollama, etc.)
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: "not-needed".to_string(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Build from settings, falling back to `OPENAI_API_KEY`
    pub fn from_settings(settings: &LlmSettings) -> Self {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            endpoint: settings.endpoint.clone(),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            frequency_penalty: settings.frequency_penalty,
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
            ..Default::default()
        }
    }

    fn is_local(&self) -> bool {
        self.endpoint.starts_with("http://localhost") || self.endpoint.starts_with("http://127.0.0.1")
    }
}

/// OpenAI-compatible backend
///
/// Works with OpenAI, vLLM, Ollama's `/v1` API and other servers that
/// speak the chat completions protocol.
pub struct OpenAIBackend {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIBackend {
    /// Create new OpenAI backend
    pub fn new(config: OpenAIConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() && !config.is_local() {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        tracing::info!(
            endpoint = %config.endpoint,
            model = %config.model,
            "OpenAI-compatible backend initialized"
        );

        Ok(Self { config, client })
    }

    /// Get the full API URL for chat completions
    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    /// Build request headers
    fn build_headers(&self) -> reqwest::header::HeaderMap {
        use reqwest::header::HeaderValue;

        let mut headers = reqwest::header::HeaderMap::new();

        let auth_value = format!("Bearer {}", self.config.api_key);
        if let Ok(val) = HeaderValue::from_str(&auth_value) {
            headers.insert(reqwest::header::AUTHORIZATION, val);
        }

        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        headers
    }

    fn build_request(&self, messages: &[Message], stream: bool) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(OpenAIMessage::from).collect(),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            frequency_penalty: Some(self.config.frequency_penalty),
            stream: Some(stream),
        }
    }

    /// Send a request, retrying transient failures with doubling backoff
    async fn send_with_retry(
        &self,
        request: &OpenAIChatRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;

        loop {
            match self.execute_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.max_retries && Self::is_retryable(&e) => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute a single request (used by retry logic)
    async fn execute_request(
        &self,
        request: &OpenAIChatRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            // 5xx and 429 are retryable, other 4xx are not
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(LlmError::Network(format!("HTTP {}: {}", status, error)));
            }
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error)));
        }

        Ok(response)
    }

    /// Check if an error is retryable
    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let request = self.build_request(messages, false);

        let response = self.send_with_retry(&request).await?;
        let response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        let total_time_ms = start.elapsed().as_millis() as u64;
        let tokens = response.usage.map(|u| u.completion_tokens).unwrap_or(0);

        Ok(GenerationResult {
            text: choice.message.content.clone().unwrap_or_default(),
            tokens,
            time_to_first_token_ms: total_time_ms,
            total_time_ms,
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        use futures::StreamExt;

        let start = Instant::now();
        let mut first_token_time: Option<u64> = None;
        let mut full_text = String::new();
        let mut token_count = 0;
        let mut finish_reason = FinishReason::Stop;

        tracing::info!(
            url = %self.chat_url(),
            model = %self.config.model,
            max_tokens = self.config.max_tokens,
            messages = messages.len(),
            "Sending streaming LLM request"
        );

        let request = self.build_request(messages, true);
        let response = self.send_with_retry(&request).await?;
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "LLM response headers received"
        );

        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::default();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            lines.extend(&chunk);

            // Process complete SSE lines
            while let Some(line) = lines.next_line() {
                let Some(content) = parse_sse_line(&line) else {
                    continue;
                };

                match content {
                    SseEvent::Done => break 'outer,
                    SseEvent::Reasoning => continue,
                    SseEvent::Finish(reason) => finish_reason = reason,
                    SseEvent::Content(content) => {
                        if first_token_time.is_none() {
                            let elapsed = start.elapsed().as_millis() as u64;
                            first_token_time = Some(elapsed);
                            tracing::info!(time_to_first_token_ms = elapsed, "First LLM content");
                        }
                        full_text.push_str(&content);
                        token_count += 1;
                        if tx.send(content).await.is_err() {
                            finish_reason = FinishReason::Cancelled;
                            break 'outer;
                        }
                    }
                }
            }
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            total_time_ms,
            tokens = token_count,
            chars = full_text.chars().count(),
            "LLM stream finished"
        );

        Ok(GenerationResult {
            text: full_text,
            tokens: token_count,
            time_to_first_token_ms: first_token_time.unwrap_or(total_time_ms),
            total_time_ms,
            finish_reason,
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .headers(self.build_headers())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Splits a byte stream into SSE lines
///
/// Network chunks can end inside a multi-byte character, so bytes are kept
/// raw until a full line is available and only then decoded.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Next complete line, trimmed, without its terminator
    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// One meaningful SSE line
#[derive(Debug, PartialEq)]
enum SseEvent {
    Content(String),
    Reasoning,
    Finish(FinishReason),
    Done,
}

fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let chunk: OpenAIStreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable SSE chunk");
            return None;
        }
    };
    let choice = chunk.choices.into_iter().next()?;

    if let Some(delta) = choice.delta {
        if delta.reasoning_content.is_some() {
            return Some(SseEvent::Reasoning);
        }
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            return Some(SseEvent::Content(content));
        }
    }

    choice
        .finish_reason
        .map(|reason| SseEvent::Finish(FinishReason::from_api(Some(&reason))))
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl From<&Message> for OpenAIMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: Some(msg.content.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: Option<OpenAIDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_config_default() {
        let config = OpenAIConfig::default();
        assert_eq!(config.endpoint, "https://api.openai.com/v1");
        assert_eq!(config.max_tokens, 500);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = LlmSettings {
            api_key: Some("sk-test".to_string()),
            model: "qwen-plus".to_string(),
            frequency_penalty: 0.3,
            ..Default::default()
        };
        let config = OpenAIConfig::from_settings(&settings);
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "qwen-plus");
        assert_eq!(config.frequency_penalty, 0.3);
    }

    #[test]
    fn test_openai_backend_creation() {
        // Local endpoint should work without API key
        let config = OpenAIConfig::local("http://localhost:8000/v1", "test");
        assert!(OpenAIBackend::new(config).is_ok());

        // Remote endpoint requires API key
        let config = OpenAIConfig::default();
        assert!(OpenAIBackend::new(config).is_err());

        let config = OpenAIConfig::openai("sk-xxx", "gpt-4o");
        assert!(OpenAIBackend::new(config).is_ok());
    }

    #[test]
    fn test_openai_chat_url() {
        let config = OpenAIConfig::local("http://localhost:8000/v1/", "test");
        let backend = OpenAIBackend::new(config).unwrap();
        assert_eq!(backend.chat_url(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_openai_request_serialization() {
        let backend = OpenAIBackend::new(OpenAIConfig::openai("sk-xxx", "gpt-4o")).unwrap();
        let request = backend.build_request(&[Message::user("Hello")], true);

        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Hello");
        assert_eq!(json["max_tokens"], 500);
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_parse_sse_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_line(line), Some(SseEvent::Content("Hi".to_string())));
    }

    #[test]
    fn test_parse_sse_skips_reasoning() {
        let line = r#"data: {"choices":[{"delta":{"content":null,"reasoning_content":"hmm"}}]}"#;
        assert_eq!(parse_sse_line(line), Some(SseEvent::Reasoning));
    }

    #[test]
    fn test_parse_sse_control_lines() {
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("data: not json"), None);

        let finish = r#"data: {"choices":[{"delta":{},"finish_reason":"length"}]}"#;
        assert_eq!(
            parse_sse_line(finish),
            Some(SseEvent::Finish(FinishReason::Length))
        );
    }

    #[test]
    fn test_line_buffer_keeps_split_characters() {
        let line = "data: 你好\n".as_bytes();
        let split = "data: ".len() + 1;

        let mut lines = SseLineBuffer::default();
        lines.extend(&line[..split]);
        assert_eq!(lines.next_line(), None);

        lines.extend(&line[split..]);
        assert_eq!(lines.next_line(), Some("data: 你好".to_string()));
        assert_eq!(lines.next_line(), None);
    }

    /// Serve one chunked SSE response, writing each slice as its own chunk
    async fn serve_chunked(body: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let content_length: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while request.len() < header_end + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for chunk in body {
                socket
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await
                    .unwrap();
                socket.write_all(&chunk).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });

        format!("http://127.0.0.1:{}/v1", port)
    }

    #[tokio::test]
    async fn test_stream_decodes_characters_split_across_chunks() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = sse.as_bytes();
        let split = sse.find('你').unwrap() + 1;
        let endpoint = serve_chunked(vec![bytes[..split].to_vec(), bytes[split..].to_vec()]).await;

        let backend = OpenAIBackend::new(OpenAIConfig::local(endpoint, "test")).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let result = backend
            .generate_stream(&[Message::user("hi")], tx)
            .await
            .unwrap();

        let mut streamed = String::new();
        while let Some(piece) = rx.recv().await {
            streamed.push_str(&piece);
        }
        assert_eq!(streamed, "你好");
        assert_eq!(result.text, "你好");
        assert_eq!(result.finish_reason, FinishReason::Stop);
    }
}
