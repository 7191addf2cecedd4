//! Management API client
//!
//! Every endpoint answers with an envelope `{code, msg, data}`. Code 0 is
//! success; 10041 and 10042 are device lookup failures the caller handles
//! specially; any other code is a business error.

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use voice_agent_config::ReportingConfig;

use crate::{ReportError, RetryPolicy};

const CODE_OK: i64 = 0;
const CODE_DEVICE_NOT_FOUND: i64 = 10041;
const CODE_DEVICE_BIND: i64 = 10042;

/// Retries for agent model lookups, which gate session setup
const AGENT_MODELS_MAX_RETRIES: u32 = 10;

/// One transcript line as the chat history endpoint expects it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReport {
    pub mac_address: String,
    pub session_id: String,
    pub chat_type: u8,
    pub content: String,
    /// Unix seconds
    pub report_time: i64,
    pub audio_base64: Option<String>,
}

impl ChatReport {
    pub fn with_audio(mut self, audio: &[u8]) -> Self {
        if !audio.is_empty() {
            self.audio_base64 = Some(base64::engine::general_purpose::STANDARD.encode(audio));
        }
        self
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Chat history reporting seam
#[async_trait]
pub trait ChatHistoryApi: Send + Sync {
    /// Report one transcript line; `Ok(None)` when there was nothing to send
    async fn report_chat(&self, report: ChatReport) -> Result<Option<Value>, ReportError>;
}

/// HTTP client for the management API
#[derive(Clone)]
pub struct ManageApiClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ManageApiClient {
    pub fn new(config: &ReportingConfig) -> Result<Self, ReportError> {
        if config.url.trim().is_empty() {
            return Err(ReportError::Configuration(
                "reporting.url is required".to_string(),
            ));
        }
        if config.secret.trim().is_empty() {
            return Err(ReportError::Configuration(
                "reporting.secret is required".to_string(),
            ));
        }

        let client = Client::builder()
            .default_headers(Self::build_headers(&config.secret)?)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .http1_only()
            .build()
            .map_err(|e| ReportError::Configuration(e.to_string()))?;

        tracing::info!(url = %config.url, "Management API client initialized");

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_settings(config),
        })
    }

    fn build_headers(secret: &str) -> Result<HeaderMap, ReportError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", secret))
            .map_err(|_| ReportError::Configuration("secret is not a valid header".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("voice-agent/", env!("CARGO_PKG_VERSION"))),
        );
        Ok(headers)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Fetch the server base configuration
    pub async fn server_config(&self) -> Result<Option<Value>, ReportError> {
        self.execute(&self.retry, Method::POST, "/config/server-base", None)
            .await
    }

    /// Fetch model configuration for a device
    pub async fn agent_models(
        &self,
        mac_address: &str,
        client_id: &str,
        selected_module: Value,
    ) -> Result<Option<Value>, ReportError> {
        tracing::debug!(mac_address, client_id, "Requesting agent models");
        let body = serde_json::json!({
            "macAddress": mac_address,
            "clientId": client_id,
            "selectedModule": selected_module,
        });
        let retry = self.retry.clone().with_max_retries(AGENT_MODELS_MAX_RETRIES);
        self.execute(&retry, Method::POST, "/config/agent-models", Some(body))
            .await
    }

    /// Store a short-term memory summary for a device
    pub async fn save_memory(
        &self,
        mac_address: &str,
        summary: &str,
    ) -> Result<Option<Value>, ReportError> {
        let body = serde_json::json!({ "summaryMemory": summary });
        let endpoint = format!("/agent/saveMemory/{}", mac_address);
        self.execute(&self.retry, Method::PUT, &endpoint, Some(body))
            .await
    }

    async fn execute(
        &self,
        retry: &RetryPolicy,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, ReportError> {
        let label = format!("{} {}", method, endpoint);
        retry
            .run(&label, || self.request(method.clone(), endpoint, body.as_ref()))
            .await
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, ReportError> {
        let mut request = self.client.request(method, self.url(endpoint));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Value = response.json().await?;
        parse_envelope(envelope)
    }
}

#[async_trait]
impl ChatHistoryApi for ManageApiClient {
    async fn report_chat(&self, report: ChatReport) -> Result<Option<Value>, ReportError> {
        if report.content.is_empty() {
            return Ok(None);
        }
        let body = serde_json::to_value(&report)
            .map_err(|e| ReportError::InvalidResponse(e.to_string()))?;
        self.execute(
            &self.retry,
            Method::POST,
            "/agent/chat-history/report",
            Some(body),
        )
        .await
    }
}

/// Unwrap a `{code, msg, data}` envelope
pub fn parse_envelope(value: Value) -> Result<Option<Value>, ReportError> {
    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|e| ReportError::InvalidResponse(e.to_string()))?;
    let msg = envelope.msg.unwrap_or_default();

    match envelope.code {
        Some(CODE_OK) => Ok(envelope.data.filter(|d| !d.is_null())),
        Some(CODE_DEVICE_NOT_FOUND) => Err(ReportError::DeviceNotFound(msg)),
        Some(CODE_DEVICE_BIND) => Err(ReportError::DeviceBind { bind_code: msg }),
        Some(code) => Err(ReportError::Api {
            code,
            message: if msg.is_empty() {
                "unknown error".to_string()
            } else {
                msg
            },
        }),
        None => Err(ReportError::InvalidResponse(
            "response has no code".to_string(),
        )),
    }
}
