//! Voice response delivery pipeline
//!
//! Features:
//! - Real-time frame pacing with a pre-buffer burst and cooperative abort
//! - Session coordinator sequencing STT/TTS signals and end-of-turn teardown
//! - Sentence splitting of streamed model output
//! - Response driver tying generation, synthesis and delivery together

pub mod coordinator;
pub mod pacer;
pub mod response;
pub mod sentence;
pub mod session;
pub mod tts;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::{CoordinatorConfig, SessionCoordinator};
pub use pacer::{AudioFramePacer, DeliveryReport};
pub use response::{ResponseDriver, ResponseOutcome};
pub use sentence::{SentenceSplitter, SentenceSplitterConfig};
pub use session::{AbortFlag, ActivityClock, ConversationSession};
pub use tts::SilenceSynthesizer;

use thiserror::Error;
use voice_agent_core::TransportError;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Generation task failed: {0}")]
    Task(String),
}

impl From<voice_agent_core::Error> for PipelineError {
    fn from(err: voice_agent_core::Error) -> Self {
        match err {
            voice_agent_core::Error::Transport(e) => PipelineError::Transport(e),
            voice_agent_core::Error::Llm(e) => PipelineError::Llm(e),
            other => PipelineError::Tts(other.to_string()),
        }
    }
}

impl From<voice_agent_llm::LlmError> for PipelineError {
    fn from(err: voice_agent_llm::LlmError) -> Self {
        PipelineError::Llm(err.to_string())
    }
}

impl PipelineError {
    /// The client connection is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, PipelineError::Transport(e) if e.is_closed())
    }
}
