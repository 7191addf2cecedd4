//! Session state coordinator
//!
//! Owns one connection's `ConversationSession` and sequences everything the
//! client sees for a response:
//!
//! ```text
//! handle_user_speech      stt:<transcript>, tts:start
//! handle_sentence_ready   tts:sentence_start(text), <frames...>
//!   (last, generation done)   [chime frames], tts:stop, [close]
//! end_response            tts:stop (abort or empty response)
//! ```
//!
//! Each response opens with exactly one `tts:start` and closes with exactly
//! one `tts:stop`. Sentences are delivered strictly one after another.

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use voice_agent_config::DeliveryConfig;
use voice_agent_core::{
    clean_transcript, strip_emoji, AudioFrame, ChatType, SentenceUnit, ServerMessage,
    SpeechSynthesizer, TranscriptEntry, TranscriptSink, Transport, TtsState,
};

use crate::{AbortFlag, AudioFramePacer, ConversationSession, DeliveryReport, PipelineError};

/// Coordinator configuration
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Transcript that ends the user's turn without being echoed
    pub end_prompt: Option<String>,
    /// Cue played after the last sentence of a response
    pub stop_chime: Option<PathBuf>,
    /// Close the connection once a response finishes
    pub close_after_chat: bool,
}

impl CoordinatorConfig {
    pub fn from_settings(config: &DeliveryConfig) -> Self {
        Self {
            end_prompt: config.end_prompt.clone().filter(|p| !p.is_empty()),
            stop_chime: config.stop_chime().map(PathBuf::from),
            close_after_chat: config.close_after_chat,
        }
    }
}

/// Structured transcript sent by recognizers that identify the speaker
#[derive(Debug, Deserialize)]
struct SpeakerTranscript {
    content: String,
    #[serde(default)]
    speaker: Option<String>,
}

/// Per-connection signal sequencer
pub struct SessionCoordinator {
    session: ConversationSession,
    transport: Arc<dyn Transport>,
    pacer: AudioFramePacer,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn TranscriptSink>,
    config: CoordinatorConfig,
    /// `tts:start` sent and `tts:stop` still owed
    response_open: bool,
    chime: Option<Vec<AudioFrame>>,
}

impl SessionCoordinator {
    pub fn new(
        session: ConversationSession,
        transport: Arc<dyn Transport>,
        pacer: AudioFramePacer,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn TranscriptSink>,
        config: CoordinatorConfig,
    ) -> Self {
        let session = session.with_close_after_chat(config.close_after_chat);
        Self {
            session,
            transport,
            pacer,
            synthesizer,
            sink,
            config,
            response_open: false,
            chime: None,
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    /// Handle that an external trigger can use to stop the current utterance
    pub fn abort_flag(&self) -> AbortFlag {
        self.session.abort_flag().clone()
    }

    pub fn request_abort(&self) {
        tracing::info!(session_id = %self.session.id, "Abort requested");
        self.session.abort_flag().set();
    }

    pub fn set_close_after_chat(&mut self, close: bool) {
        self.session.close_after_chat = close;
    }

    /// A new response is about to be generated
    pub fn begin_response(&mut self) {
        self.session.abort_flag().clear();
        self.session.pipeline_start = Some(Instant::now());
        self.session.generation_complete = false;
        tracing::debug!(session_id = %self.session.id, "Response started");
    }

    /// Upstream generation for the current response has finished
    pub fn mark_generation_complete(&mut self) {
        self.session.generation_complete = true;
    }

    /// Recognized user speech arrived
    ///
    /// Returns the text to hand to the generator: the cleaned transcript,
    /// or the end prompt unchanged.
    pub async fn handle_user_speech(&mut self, text: &str) -> Result<String, PipelineError> {
        if self.config.end_prompt.as_deref() == Some(text) {
            tracing::debug!(session_id = %self.session.id, "End-of-turn prompt received");
            self.open_response().await?;
            return Ok(text.to_string());
        }

        let content = match parse_speaker_transcript(text) {
            Some(parsed) => {
                if parsed.speaker.is_some() {
                    self.session.current_speaker = parsed.speaker;
                }
                parsed.content
            }
            None => text.to_string(),
        };

        let transcript = clean_transcript(&content);
        self.session.listening = true;

        tracing::info!(
            session_id = %self.session.id,
            speaker = ?self.session.current_speaker,
            transcript = %transcript,
            "User speech"
        );

        self.send(ServerMessage::stt(transcript.clone(), self.session.id.clone()))
            .await?;
        self.open_response().await?;

        if !transcript.is_empty() {
            self.report(ChatType::User, transcript.clone());
        }
        Ok(transcript)
    }

    /// Deliver one synthesized sentence
    ///
    /// The first audio of a response is sent with a pre-buffer burst. On a
    /// delivery failure the abort flag is set and the error returned; the
    /// session itself stays usable.
    pub async fn handle_sentence_ready(
        &mut self,
        unit: SentenceUnit,
        synthesizer_first: bool,
    ) -> Result<DeliveryReport, PipelineError> {
        let SentenceUnit { kind, text, frames } = unit;
        let first_audio = synthesizer_first
            || (self.session.pipeline_start.is_some() && !self.session.first_audio_recorded);

        if first_audio && !self.session.first_audio_recorded {
            // without a start timestamp there is nothing to measure yet
            if let Some(start) = self.session.pipeline_start {
                let latency = start.elapsed();
                tracing::info!(
                    session_id = %self.session.id,
                    latency_ms = latency.as_millis() as u64,
                    "First audio of response"
                );
                metrics::histogram!("voice_agent_first_audio_seconds")
                    .record(latency.as_secs_f64());
                self.session.first_audio_recorded = true;
            }
        }

        if !self.response_open {
            self.open_response().await?;
        }

        let display_text = strip_emoji(&text);
        self.send(ServerMessage::tts(
            TtsState::SentenceStart,
            self.session.id.clone(),
            Some(display_text.clone()),
        ))
        .await?;
        self.session.speaking = true;

        tracing::info!(
            session_id = %self.session.id,
            kind = ?kind,
            frames = frames.len(),
            pre_buffer = first_audio,
            text = %display_text,
            "Sentence start"
        );

        if !display_text.trim().is_empty() {
            self.report(ChatType::Assistant, display_text);
        }

        let report = match self
            .pacer
            .deliver(self.transport.as_ref(), &frames, first_audio, &self.session)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                self.session.abort_flag().set();
                tracing::error!(session_id = %self.session.id, error = %e, "Audio delivery failed");
                return Err(e);
            }
        };

        if report.aborted {
            metrics::counter!("voice_agent_utterances_aborted_total").increment(1);
        }

        if kind.is_last() && self.session.generation_complete {
            self.finish_response(report.aborted).await?;
        }

        Ok(report)
    }

    /// Close the response without a final sentence (abort or nothing to say)
    pub async fn end_response(&mut self) -> Result<(), PipelineError> {
        if !self.response_open {
            return Ok(());
        }
        self.session.speaking = false;
        self.session.listening = false;
        self.send_stop().await
    }

    async fn finish_response(&mut self, aborted: bool) -> Result<(), PipelineError> {
        if !aborted {
            self.play_stop_chime().await;
        }

        self.session.speaking = false;
        self.session.listening = false;
        self.send_stop().await?;

        if self.session.close_after_chat && !aborted {
            tracing::info!(session_id = %self.session.id, "Closing connection after chat");
            self.transport.close().await?;
        }
        Ok(())
    }

    async fn play_stop_chime(&mut self) {
        let Some(path) = self.config.stop_chime.clone() else {
            return;
        };

        if self.chime.is_none() {
            match self.synthesizer.load_cue(&path).await {
                Ok(frames) => self.chime = Some(frames),
                Err(e) => {
                    tracing::warn!(
                        session_id = %self.session.id,
                        path = %path.display(),
                        error = %e,
                        "Failed to load stop chime"
                    );
                    return;
                }
            }
        }

        let frames = self.chime.as_deref().unwrap_or_default();
        if let Err(e) = self
            .pacer
            .deliver(self.transport.as_ref(), frames, false, &self.session)
            .await
        {
            tracing::warn!(session_id = %self.session.id, error = %e, "Failed to play stop chime");
        }
    }

    async fn open_response(&mut self) -> Result<(), PipelineError> {
        self.send(ServerMessage::tts(TtsState::Start, self.session.id.clone(), None))
            .await?;
        self.response_open = true;
        self.session.speaking = true;
        Ok(())
    }

    async fn send_stop(&mut self) -> Result<(), PipelineError> {
        self.response_open = false;
        self.send(ServerMessage::tts(TtsState::Stop, self.session.id.clone(), None))
            .await?;
        tracing::info!(session_id = %self.session.id, "Response finished");
        Ok(())
    }

    async fn send(&self, message: ServerMessage) -> Result<(), PipelineError> {
        self.transport.send_signal(&message).await?;
        Ok(())
    }

    fn report(&self, chat_type: ChatType, content: String) {
        self.sink.report(TranscriptEntry::new(
            self.session.id.clone(),
            self.session.device_id.clone(),
            chat_type,
            content,
        ));
    }
}

fn parse_speaker_transcript(text: &str) -> Option<SpeakerTranscript> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
