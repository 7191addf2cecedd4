//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Template secrets that were never filled in
const PLACEHOLDER_SECRETS: &[&str] = &[
    "your-server-secret",
    "your_server_secret",
    "your-secret",
    "<secret>",
    "changeme",
];

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Audio delivery configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmSettings,

    /// Speech synthesis configuration
    #[serde(default)]
    pub tts: TtsConfig,

    /// Management API reporting configuration
    #[serde(default)]
    pub reporting: ReportingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_delivery()?;
        self.validate_reporting()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port must be non-zero".to_string(),
            });
        }

        if self.server.idle_check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.idle_check_interval_secs".to_string(),
                message: "Check interval must be at least 1 second".to_string(),
            });
        }

        if self.server.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_sessions".to_string(),
                message: "At least one session must be allowed".to_string(),
            });
        }

        Ok(())
    }

    fn validate_delivery(&self) -> Result<(), ConfigError> {
        let delivery = &self.delivery;

        if !(10..=120).contains(&delivery.frame_duration_ms) {
            return Err(ConfigError::InvalidValue {
                field: "delivery.frame_duration_ms".to_string(),
                message: format!(
                    "Must be between 10 and 120, got {}",
                    delivery.frame_duration_ms
                ),
            });
        }

        if delivery.pre_buffer_frames > 10 {
            return Err(ConfigError::InvalidValue {
                field: "delivery.pre_buffer_frames".to_string(),
                message: format!("Must be at most 10, got {}", delivery.pre_buffer_frames),
            });
        }

        if delivery.enable_stop_tts_notify && delivery.stop_tts_notify_voice.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "delivery.stop_tts_notify_voice".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_reporting(&self) -> Result<(), ConfigError> {
        let reporting = &self.reporting;
        if !reporting.enabled {
            return Ok(());
        }

        if reporting.url.trim().is_empty() {
            return Err(ConfigError::MissingField("reporting.url".to_string()));
        }

        if reporting.secret.trim().is_empty() {
            return Err(ConfigError::MissingField("reporting.secret".to_string()));
        }

        // the shipped template fills the secret with a Chinese hint
        let lowered = reporting.secret.trim().to_lowercase();
        if lowered.contains('你') || PLACEHOLDER_SECRETS.contains(&lowered.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "reporting.secret".to_string(),
                message: "Secret still holds a placeholder value".to_string(),
            });
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Close a connection after this long without activity
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the idle watcher looks at a connection
    #[serde(default = "default_idle_check_interval")]
    pub idle_check_interval_secs: u64,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_sessions() -> usize {
    1000
}
fn default_idle_timeout() -> u64 {
    120
}
fn default_idle_check_interval() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout(),
            idle_check_interval_secs: default_idle_check_interval(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Audio delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Playback duration of one encoded frame
    #[serde(default = "default_frame_duration")]
    pub frame_duration_ms: u64,

    /// Frames sent without pacing at the start of a response
    #[serde(default = "default_pre_buffer_frames")]
    pub pre_buffer_frames: usize,

    /// Close the connection once the response finishes
    #[serde(default)]
    pub close_after_chat: bool,

    /// Sentinel transcript that ends a turn without an echo
    #[serde(default)]
    pub end_prompt: Option<String>,

    /// Play a chime after the last sentence
    #[serde(default)]
    pub enable_stop_tts_notify: bool,

    /// Chime cue file
    #[serde(default = "default_stop_tts_notify_voice")]
    pub stop_tts_notify_voice: String,
}

fn default_frame_duration() -> u64 {
    60
}
fn default_pre_buffer_frames() -> usize {
    3
}
fn default_stop_tts_notify_voice() -> String {
    "config/assets/tts_notify.opus".to_string()
}

impl DeliveryConfig {
    /// Chime path, if stop notification is enabled
    pub fn stop_chime(&self) -> Option<&str> {
        self.enable_stop_tts_notify
            .then_some(self.stop_tts_notify_voice.as_str())
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            frame_duration_ms: default_frame_duration(),
            pre_buffer_frames: default_pre_buffer_frames(),
            close_after_chat: false,
            end_prompt: None,
            enable_stop_tts_notify: false,
            stop_tts_notify_voice: default_stop_tts_notify_voice(),
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// OpenAI-compatible base URL
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key (falls back to OPENAI_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default)]
    pub frequency_penalty: f32,

    /// Request timeout
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Retries for failed requests before any content is streamed
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    1.0
}
fn default_llm_timeout() -> u64 {
    300
}
fn default_llm_retries() -> u32 {
    3
}
fn default_system_prompt() -> String {
    "You are a friendly voice assistant. Answer briefly in plain spoken sentences.".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Frames of silence produced per character by the built-in synthesizer
    #[serde(default = "default_frames_per_char")]
    pub frames_per_char: f32,
}

fn default_frames_per_char() -> f32 {
    1.0
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            frames_per_char: default_frames_per_char(),
        }
    }
}

/// Management API reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Report transcripts to the management API
    #[serde(default)]
    pub enabled: bool,

    /// Management API base URL
    #[serde(default)]
    pub url: String,

    /// Bearer secret
    #[serde(default)]
    pub secret: String,

    /// Retries after the first attempt
    #[serde(default = "default_report_retries")]
    pub max_retries: u32,

    /// Initial backoff for unavailable/rate-limited responses
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Fixed retry interval for would-block I/O errors
    #[serde(default = "default_transient_retry_delay")]
    pub transient_retry_delay_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

fn default_report_retries() -> u32 {
    6
}
fn default_retry_delay() -> u64 {
    10
}
fn default_transient_retry_delay() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_pool_max_idle() -> usize {
    5
}
fn default_pool_idle_timeout() -> u64 {
    30
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            secret: String::new(),
            max_retries: default_report_retries(),
            retry_delay_secs: default_retry_delay(),
            transient_retry_delay_ms: default_transient_retry_delay(),
            max_backoff_secs: default_max_backoff(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable the Prometheus recorder and /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::with_name("config/default").required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("VOICE_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
