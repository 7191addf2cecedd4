//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use voice_agent_config::Settings;
use voice_agent_core::{NoopSink, TranscriptSink};
use voice_agent_llm::{LlmBackend, OpenAIBackend, OpenAIConfig};
use voice_agent_persistence::{ChatReporter, ManageApiClient};

use crate::session::SessionManager;
use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration loaded at startup
    pub config: Arc<Settings>,
    /// Live connections
    pub sessions: Arc<SessionManager>,
    /// Text generator shared by all connections
    pub llm: Arc<dyn LlmBackend>,
    /// Transcript reporting (no-op when reporting is disabled)
    pub reporter: Arc<dyn TranscriptSink>,
}

impl AppState {
    /// Build state from settings: LLM backend and, when enabled, the
    /// management API reporter
    pub fn from_settings(config: Settings) -> Result<Self, ServerError> {
        let llm = OpenAIBackend::new(OpenAIConfig::from_settings(&config.llm))
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let reporter: Arc<dyn TranscriptSink> = if config.reporting.enabled {
            let client = ManageApiClient::new(&config.reporting)
                .map_err(|e| ServerError::Config(e.to_string()))?;
            tracing::info!("Transcript reporting enabled");
            Arc::new(ChatReporter::new(Arc::new(client)))
        } else {
            Arc::new(NoopSink)
        };

        Ok(Self::new(config, Arc::new(llm), reporter))
    }

    /// Create state from explicit collaborators
    pub fn new(
        config: Settings,
        llm: Arc<dyn LlmBackend>,
        reporter: Arc<dyn TranscriptSink>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(config.server.max_sessions));
        Self {
            config: Arc::new(config),
            sessions,
            llm,
            reporter,
        }
    }

    pub fn get_config(&self) -> &Settings {
        &self.config
    }
}
