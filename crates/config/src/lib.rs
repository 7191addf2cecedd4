//! Configuration management for the voice agent
//!
//! Supports loading configuration from:
//! - `config/default.{toml,yaml,json}`
//! - `config/{env}` overrides
//! - Environment variables (`VOICE_AGENT__` prefix, `__` separator)

pub mod settings;

pub use settings::{
    load_settings, DeliveryConfig, LlmSettings, ObservabilityConfig, ReportingConfig,
    ServerConfig, Settings, TtsConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
